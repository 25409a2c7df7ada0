//! # Synthesis Adapter
//!
//! Wraps the external text-to-speech capability: given an assistant
//! utterance (optionally pre-split into speakable segments), produce a
//! finite, ordered stream of audio frames. Each call yields a fresh stream;
//! segments are synthesized and emitted strictly in order, and cancellation
//! stops frame production within one segment boundary at most.

pub mod remote;

use crate::audio::AudioFrame;
use crate::config::SessionOptions;
use crate::error::PipelineError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use remote::RemoteSynthesizer;

/// Characters that end a speakable segment when splitting is enabled.
const SEGMENT_DELIMITERS: [char; 6] = ['.', '!', '?', ';', ':', '\n'];

/// Split an utterance into ordered speakable segments.
///
/// With `split` disabled the whole utterance is one segment. Enabled, the
/// text is cut at sentence-ending punctuation; empty pieces are dropped.
pub fn split_segments(text: &str, split: bool) -> Vec<String> {
    if !split {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        return vec![trimmed.to_string()];
    }

    text.split(SEGMENT_DELIMITERS)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Produces audio frame streams from utterance segments.
///
/// The returned receiver yields frames in strict production order and closes
/// when the utterance is exhausted, a synthesis error is delivered, or the
/// cancellation token fires.
pub trait Synthesizer: Send + Sync {
    fn synthesize(
        &self,
        segments: Vec<String>,
        options: &SessionOptions,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<AudioFrame, PipelineError>>;
}
