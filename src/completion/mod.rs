//! # Turn Completion Adapter
//!
//! Wraps the language-generation backend behind a request/response seam:
//! given an ordered, role-tagged chat history, produce exactly one assistant
//! utterance. The call blocks the thinking state but honors cooperative
//! cancellation — a barge-in aborts the outbound request rather than
//! returning a partial result. Backend errors (non-2xx, timeout, malformed
//! body) are recoverable; the orchestrator does not retry, one failure ends
//! the turn.

use crate::config::{CompletionConfig, SessionOptions};
use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message on the chat-completions wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// OpenAI-compatible request/response shapes
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Produces one assistant utterance for a chat history snapshot.
#[async_trait]
pub trait TurnCompleter: Send + Sync {
    /// Complete one turn. Returns the assistant's reply text, or
    /// [`PipelineError::Cancelled`] if the token fires first.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &SessionOptions,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError>;
}

/// Turn completer speaking the OpenAI chat-completions wire format.
pub struct HttpTurnCompleter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTurnCompleter {
    pub fn new(config: &CompletionConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Completion(format!("failed to build client: {}", e)))?;

        info!(endpoint = %config.endpoint, "Turn completion client ready");
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    async fn request(
        &self,
        messages: &[ChatMessage],
        options: &SessionOptions,
    ) -> Result<String, PipelineError> {
        let payload = ChatRequest {
            model: &options.llm_model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: false,
        };

        debug!(model = %options.llm_model, messages = messages.len(), "Requesting turn completion");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Completion("backend timed out".to_string())
                } else {
                    PipelineError::Completion(format!("backend unreachable: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(PipelineError::Completion(format!(
                "backend returned {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Completion(format!("malformed response: {}", e)))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| PipelineError::Completion("response carried no choices".to_string()))?;

        if content.is_empty() {
            return Err(PipelineError::Completion("backend returned empty reply".to_string()));
        }

        Ok(content)
    }
}

#[async_trait]
impl TurnCompleter for HttpTurnCompleter {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &SessionOptions,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        // Cancellation aborts the outbound call; dropping the request future
        // closes the connection, so no partial result can escape.
        tokio::select! {
            result = self.request(messages, options) => result,
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_role_serialization() {
        let json = serde_json::to_string(&ChatMessage::system("be brief")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"be brief"}"#);
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert!(json.contains(r#""role":"assistant""#));
    }

    #[test]
    fn test_chat_request_wire_shape() {
        let messages = vec![ChatMessage::system("persona"), ChatMessage::user("hello")];
        let payload = ChatRequest {
            model: "qwen2.5-0.5b-instruct",
            messages: &messages,
            temperature: 0.7,
            max_tokens: 512,
            stream: false,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["model"], "qwen2.5-0.5b-instruct");
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_chat_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":" hi there "}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content, " hi there ");
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_short_circuits() {
        let completer = HttpTurnCompleter::new(&crate::config::AppConfig::default().completion).unwrap();
        let options = crate::config::SessionOptions::merge(
            &crate::config::AppConfig::default(),
            &crate::config::SessionOverrides::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = completer
            .complete(&[ChatMessage::user("hello")], &options, &cancel)
            .await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
