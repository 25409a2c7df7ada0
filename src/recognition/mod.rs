//! # Recognition Adapter
//!
//! Wraps the external speech-recognition capability behind a narrow seam:
//! the session state machine feeds it ordered audio frames and receives
//! ordered transcript events back. Decoding internals live on the other
//! side of the seam; the one shipped implementation ([`remote`]) talks to an
//! OpenAI-style transcription endpoint over HTTP.

pub mod remote;

use crate::audio::AudioFrame;
use crate::config::SessionOptions;
use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use remote::RemoteRecognizerFactory;

/// One recognition result.
///
/// Only a final event advances the pipeline; partial events are surfaced to
/// the client as a hint and never mutate chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// Recognized text so far (partial) or for the whole utterance (final)
    pub text: String,
    /// Whether this result is stable/complete
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_result(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// A live recognizer bound to one session.
///
/// `Sync` because the owning session task holds the boxed recognizer across
/// await points inside a spawned future.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Consume one audio frame, returning zero or more transcript events in
    /// order. May suspend while the capability computes.
    async fn feed(&mut self, frame: &AudioFrame) -> Result<Vec<TranscriptEvent>, PipelineError>;

    /// Clear internal decoding state at the start of a listening phase.
    ///
    /// After a reset, no stale transcript referencing earlier audio may be
    /// emitted.
    async fn reset(&mut self);

    /// Release recognizer resources.
    async fn close(&mut self);
}

/// Opens a recognizer for a session's merged configuration snapshot.
#[async_trait]
pub trait RecognizerFactory: Send + Sync {
    /// Open a fresh recognizer. Failure here is unrecoverable for the
    /// session being created.
    async fn open(&self, options: &SessionOptions) -> Result<Box<dyn Recognizer>, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_event_constructors() {
        let partial = TranscriptEvent::partial("hel");
        assert!(!partial.is_final);
        let fin = TranscriptEvent::final_result("hello");
        assert!(fin.is_final);
        assert_eq!(fin.text, "hello");
    }
}
