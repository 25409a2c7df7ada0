//! # Remote HTTP Synthesizer
//!
//! Sends each segment to a TTS service that answers with raw little-endian
//! PCM16, then chops the response into bounded frames. A spawned task keeps
//! the stream lazy: segment *i* can be playing while segment *i+1* is still
//! being synthesized, but frames never interleave across segments. The
//! cancellation token is observed between frames and between segments.

use crate::audio::AudioFrame;
use crate::config::{SessionOptions, SynthesisConfig};
use crate::error::PipelineError;
use crate::synthesis::Synthesizer;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Frames buffered ahead of the consumer per utterance.
const STREAM_CAPACITY: usize = 32;

pub struct RemoteSynthesizer {
    client: reqwest::Client,
    url: String,
}

impl RemoteSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Synthesis(format!("failed to build client: {}", e)))?;

        info!(endpoint = %config.endpoint, "Synthesis client ready");
        Ok(Self {
            client,
            url: format!("{}/synthesize", config.endpoint.trim_end_matches('/')),
        })
    }

    async fn synthesize_segment(
        client: &reqwest::Client,
        url: &str,
        text: &str,
        options: &SessionOptions,
    ) -> Result<Vec<u8>, PipelineError> {
        let response = client
            .post(url)
            .json(&serde_json::json!({
                "text": text,
                "model": options.tts_model,
                "speaker": options.tts_speaker,
                "speed": options.speed,
                "sample_rate": options.sample_rate,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::Synthesis(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::Synthesis(format!(
                "synthesis endpoint returned {}",
                response.status()
            )));
        }

        let pcm = response
            .bytes()
            .await
            .map_err(|e| PipelineError::Synthesis(format!("truncated response: {}", e)))?
            .to_vec();

        if pcm.len() % 2 != 0 {
            return Err(PipelineError::Synthesis(
                "endpoint returned an odd number of PCM bytes".to_string(),
            ));
        }
        Ok(pcm)
    }
}

impl Synthesizer for RemoteSynthesizer {
    fn synthesize(
        &self,
        segments: Vec<String>,
        options: &SessionOptions,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<AudioFrame, PipelineError>> {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let client = self.client.clone();
        let url = self.url.clone();
        let options = options.clone();

        tokio::spawn(async move {
            for (idx, segment) in segments.iter().enumerate() {
                if cancel.is_cancelled() {
                    debug!(segment = idx, "Synthesis cancelled between segments");
                    return;
                }

                let pcm = tokio::select! {
                    result = Self::synthesize_segment(&client, &url, segment, &options) => {
                        match result {
                            Ok(pcm) => pcm,
                            Err(err) => {
                                warn!(segment = idx, error = %err, "Segment synthesis failed");
                                let _ = tx.send(Err(err)).await;
                                return;
                            }
                        }
                    }
                    _ = cancel.cancelled() => {
                        debug!(segment = idx, "Synthesis cancelled mid-segment");
                        return;
                    }
                };

                for chunk in pcm.chunks(options.frame_bytes) {
                    if chunk.is_empty() {
                        continue;
                    }
                    let frame = AudioFrame {
                        pcm: chunk.to_vec(),
                        sample_rate: options.sample_rate,
                    };
                    tokio::select! {
                        sent = tx.send(Ok(frame)) => {
                            if sent.is_err() {
                                return; // consumer gone
                            }
                        }
                        _ = cancel.cancelled() => return,
                    }
                }
            }
            // Dropping tx closes the stream: utterance exhausted.
        });

        rx
    }
}
