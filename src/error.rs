//! # Error Handling
//!
//! Two error families live here:
//!
//! - [`AppError`] covers the HTTP surface (health, metrics, config endpoints)
//!   and converts to JSON error responses via `ResponseError`.
//! - [`PipelineError`] is the recoverable taxonomy for the voice pipeline
//!   adapters. A pipeline error never tears down the WebSocket connection;
//!   the session reports it to the client and returns to listening. Only
//!   transport failures and unrecoverable initialization failures close a
//!   session, and those travel as `PipelineError::Transport`.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors surfaced by the HTTP API endpoints.
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (500)
    Internal(String),

    /// Client sent invalid or malformed data (400)
    BadRequest(String),

    /// Configuration file or environment variable problems (500)
    ConfigError(String),

    /// User input failed validation rules (400)
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for Results on the HTTP surface.
pub type AppResult<T> = Result<T, AppError>;

/// Failures raised by the pipeline adapters during a session.
///
/// The session state machine maps each variant to the behavior required of
/// it: `Recognition`, `Completion` and `Synthesis` emit an error event and
/// return the session to listening; `Cancelled` is a normal transition
/// (barge-in or timeout), not reported as an error; `Transport` closes the
/// session.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Recognizer failed to open or to consume a frame.
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Language-generation backend unreachable, timed out, or returned a
    /// non-2xx / malformed response.
    #[error("turn completion error: {0}")]
    Completion(String),

    /// Speech synthesis failed mid-utterance.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// The in-flight call was cancelled (barge-in, interrupt, or teardown).
    #[error("cancelled")]
    Cancelled,

    /// Connection-level failure; the session cannot continue.
    #[error("transport error: {0}")]
    Transport(String),
}

impl PipelineError {
    /// Whether the session survives this error (stays alive and returns to
    /// listening) rather than closing.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PipelineError::Transport(_))
    }
}
