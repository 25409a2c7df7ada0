//! # Session Layer
//!
//! One module per concern: the token-budgeted chat history and the
//! per-connection state machine that drives the pipeline.

pub mod history;
pub mod machine;

pub use machine::{SessionControl, SessionEvent, SessionHandle, VoiceSession};
