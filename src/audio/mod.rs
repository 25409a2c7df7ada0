//! # Audio Plumbing
//!
//! The orchestrator treats audio as opaque blocks of little-endian PCM16
//! samples: it never resamples or reorders, it only counts samples and moves
//! frames between the transport and the adapters. [`frame::AudioFrame`] is
//! the unit of movement; [`channel::FrameChannel`] is the bounded ordered
//! conduit between the transport task and the session task.

pub mod channel;
pub mod frame;

pub use channel::{FrameChannel, FrameReceiver, FrameSender};
pub use frame::AudioFrame;
