//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_COMPLETION_MODEL, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The loaded [`AppConfig`] is immutable from the point of view of running
//! sessions: each session gets a [`SessionOptions`] snapshot built once at
//! session creation by merging the client's `start_session` overrides over
//! the server defaults. There is no mutable global configuration state.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub recognition: RecognitionConfig,
    pub completion: CompletionConfig,
    pub synthesis: SynthesisConfig,
    pub session: SessionConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech recognition collaborator settings.
///
/// The recognizer itself is an external capability reached over HTTP; these
/// fields select the endpoint and the per-session decoding defaults a client
/// may override in its `start_session` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Base URL of the transcription service (OpenAI-style audio API)
    pub endpoint: String,
    /// Default recognition model identifier
    pub model: String,
    /// Default recognition language code (e.g., "en", "id")
    pub language: String,
    /// Default inbound sample rate in Hz
    pub sample_rate: u32,
    /// Per-call timeout for transcription requests (seconds)
    pub timeout_secs: u64,
    /// RMS amplitude below which a frame counts as silence (0..=32767)
    pub silence_threshold: f32,
    /// Trailing silence that finalizes an utterance (milliseconds)
    pub silence_hangover_ms: u32,
    /// Shortest buffered audio worth transcribing (milliseconds)
    pub min_utterance_ms: u32,
}

/// Language-generation backend settings (OpenAI chat-completions wire format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Full URL of the chat-completions endpoint
    pub endpoint: String,
    /// Default model identifier
    pub model: String,
    /// Persona/instructions message that always leads the chat history
    pub system_prompt: String,
    /// Default sampling temperature
    pub temperature: f32,
    /// Default maximum output length in tokens
    pub max_tokens: u32,
    /// Approximate token budget for the retained chat history
    pub max_history_tokens: usize,
    /// Per-call timeout for completion requests (seconds)
    pub timeout_secs: u64,
}

/// Speech synthesis collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Base URL of the synthesis service
    pub endpoint: String,
    /// Default synthesis model identifier
    pub model: String,
    /// Default speaker/voice identifier
    pub speaker: String,
    /// Default speech speed multiplier (1.0 = normal)
    pub speed: f32,
    /// Default outbound sample rate in Hz
    pub sample_rate: u32,
    /// Whether replies are split into sentences before synthesis
    pub split: bool,
    /// Per-segment timeout for synthesis requests (seconds)
    pub timeout_secs: u64,
    /// Size of each outbound audio frame in bytes (PCM16, must be even)
    pub frame_bytes: usize,
}

/// Per-session plumbing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum concurrent voice sessions
    pub max_concurrent_sessions: usize,
    /// Capacity of the inbound audio frame channel (frames)
    pub inbound_channel_capacity: usize,
    /// Capacity of the outbound event/audio channel (messages)
    pub outbound_channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            recognition: RecognitionConfig {
                endpoint: "http://127.0.0.1:8081".to_string(),
                model: "zipformer".to_string(),
                language: "en".to_string(),
                sample_rate: 16000, // 16kHz mono PCM16 is the expected input
                timeout_secs: 15,
                silence_threshold: 500.0,
                silence_hangover_ms: 600,
                min_utterance_ms: 300,
            },
            completion: CompletionConfig {
                endpoint: "http://127.0.0.1:8082/v1/chat/completions".to_string(),
                model: "qwen2.5-0.5b-instruct".to_string(),
                system_prompt: "You are a helpful voice assistant. Keep responses \
                    brief and natural, as they will be spoken aloud."
                    .to_string(),
                temperature: 0.7,
                max_tokens: 512,
                max_history_tokens: 800,
                timeout_secs: 30,
            },
            synthesis: SynthesisConfig {
                endpoint: "http://127.0.0.1:8083".to_string(),
                model: "vits".to_string(),
                speaker: "default".to_string(),
                speed: 1.0,
                sample_rate: 16000,
                split: true,
                timeout_secs: 30,
                frame_bytes: 4096,
            },
            session: SessionConfig {
                max_concurrent_sessions: 10,
                inbound_channel_capacity: 64,
                outbound_channel_capacity: 64,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and environment.
    ///
    /// Environment variables use the APP_ prefix with `_` separators
    /// (e.g., `APP_SERVER_PORT=3000`). `HOST` and `PORT` are honored as
    /// special cases for deployment platforms.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.session.inbound_channel_capacity == 0 || self.session.outbound_channel_capacity == 0 {
            return Err(anyhow::anyhow!("Channel capacities must be greater than 0"));
        }

        if self.completion.max_history_tokens == 0 {
            return Err(anyhow::anyhow!("History token budget must be greater than 0"));
        }

        if self.synthesis.frame_bytes == 0 || self.synthesis.frame_bytes % 2 != 0 {
            return Err(anyhow::anyhow!("Frame size must be a positive even number of bytes"));
        }

        if self.recognition.sample_rate == 0 || self.synthesis.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// Only the fields present in the JSON are touched; the result is
    /// re-validated before being accepted. Running sessions keep the snapshot
    /// they were created with.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(recognition) = partial_config.get("recognition") {
            if let Some(endpoint) = recognition.get("endpoint").and_then(|v| v.as_str()) {
                self.recognition.endpoint = endpoint.to_string();
            }
            if let Some(model) = recognition.get("model").and_then(|v| v.as_str()) {
                self.recognition.model = model.to_string();
            }
            if let Some(language) = recognition.get("language").and_then(|v| v.as_str()) {
                self.recognition.language = language.to_string();
            }
        }

        if let Some(completion) = partial_config.get("completion") {
            if let Some(endpoint) = completion.get("endpoint").and_then(|v| v.as_str()) {
                self.completion.endpoint = endpoint.to_string();
            }
            if let Some(model) = completion.get("model").and_then(|v| v.as_str()) {
                self.completion.model = model.to_string();
            }
            if let Some(prompt) = completion.get("system_prompt").and_then(|v| v.as_str()) {
                self.completion.system_prompt = prompt.to_string();
            }
            if let Some(budget) = completion.get("max_history_tokens").and_then(|v| v.as_u64()) {
                self.completion.max_history_tokens = budget as usize;
            }
        }

        if let Some(synthesis) = partial_config.get("synthesis") {
            if let Some(endpoint) = synthesis.get("endpoint").and_then(|v| v.as_str()) {
                self.synthesis.endpoint = endpoint.to_string();
            }
            if let Some(model) = synthesis.get("model").and_then(|v| v.as_str()) {
                self.synthesis.model = model.to_string();
            }
            if let Some(speaker) = synthesis.get("speaker").and_then(|v| v.as_str()) {
                self.synthesis.speaker = speaker.to_string();
            }
        }

        if let Some(session) = partial_config.get("session") {
            if let Some(sessions) = session.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.session.max_concurrent_sessions = sessions as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

/// Optional per-session overrides carried by the `start_session` message.
///
/// Every recognized option is enumerated here with its override type;
/// anything left unset falls back to the server default during
/// [`SessionOptions::merge`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOverrides {
    pub asr_model: Option<String>,
    pub asr_lang: Option<String>,
    pub llm_model: Option<String>,
    pub llm_system_prompt: Option<String>,
    pub llm_max_tokens: Option<u32>,
    pub llm_temperature: Option<f32>,
    pub sample_rate: Option<u32>,
    pub speed: Option<f32>,
    pub tts_model: Option<String>,
    pub tts_speaker: Option<String>,
    pub split: Option<bool>,
}

/// Immutable configuration snapshot for one session.
///
/// Built exactly once when the session starts; the session never observes
/// later runtime config updates.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub asr_model: String,
    pub asr_lang: String,
    pub llm_model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_history_tokens: usize,
    pub sample_rate: u32,
    pub speed: f32,
    pub tts_model: String,
    pub tts_speaker: String,
    pub split: bool,
    pub frame_bytes: usize,
}

impl SessionOptions {
    /// Merge client overrides over the server defaults.
    pub fn merge(config: &AppConfig, overrides: &SessionOverrides) -> Self {
        Self {
            asr_model: overrides
                .asr_model
                .clone()
                .unwrap_or_else(|| config.recognition.model.clone()),
            asr_lang: overrides
                .asr_lang
                .clone()
                .unwrap_or_else(|| config.recognition.language.clone()),
            llm_model: overrides
                .llm_model
                .clone()
                .unwrap_or_else(|| config.completion.model.clone()),
            system_prompt: overrides
                .llm_system_prompt
                .clone()
                .unwrap_or_else(|| config.completion.system_prompt.clone()),
            max_tokens: overrides.llm_max_tokens.unwrap_or(config.completion.max_tokens),
            temperature: overrides
                .llm_temperature
                .unwrap_or(config.completion.temperature),
            max_history_tokens: config.completion.max_history_tokens,
            sample_rate: overrides.sample_rate.unwrap_or(config.recognition.sample_rate),
            speed: overrides.speed.unwrap_or(config.synthesis.speed),
            tts_model: overrides
                .tts_model
                .clone()
                .unwrap_or_else(|| config.synthesis.model.clone()),
            tts_speaker: overrides
                .tts_speaker
                .clone()
                .unwrap_or_else(|| config.synthesis.speaker.clone()),
            split: overrides.split.unwrap_or(config.synthesis.split),
            frame_bytes: config.synthesis.frame_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.recognition.sample_rate, 16000);
        assert!(config.synthesis.split);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.synthesis.frame_bytes = 4095; // odd frame sizes would split samples
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "completion": {"model": "gemma-2b"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.completion.model, "gemma-2b");
        // Untouched fields keep their defaults
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_session_options_merge_defaults() {
        let config = AppConfig::default();
        let opts = SessionOptions::merge(&config, &SessionOverrides::default());
        assert_eq!(opts.llm_model, config.completion.model);
        assert_eq!(opts.sample_rate, 16000);
        assert_eq!(opts.speed, 1.0);
        assert!(opts.split);
    }

    #[test]
    fn test_session_options_merge_overrides() {
        let config = AppConfig::default();
        let overrides = SessionOverrides {
            llm_model: Some("llama3.1:8b".to_string()),
            sample_rate: Some(22050),
            split: Some(false),
            llm_temperature: Some(0.2),
            ..Default::default()
        };
        let opts = SessionOptions::merge(&config, &overrides);
        assert_eq!(opts.llm_model, "llama3.1:8b");
        assert_eq!(opts.sample_rate, 22050);
        assert_eq!(opts.temperature, 0.2);
        assert!(!opts.split);
        // Fields without an override fall back to server defaults
        assert_eq!(opts.asr_model, config.recognition.model);
    }
}
