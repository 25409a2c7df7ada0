//! # Audio Frame Channel
//!
//! A bounded, ordered, single-producer/single-consumer conduit for audio
//! frames. The producer awaits when the channel is full (backpressure)
//! rather than dropping frames; frame order is preserved end to end.
//!
//! Closing is idempotent and unblocks both sides: a blocked `send` returns
//! an end-of-stream error and a blocked `recv` returns `None`. Feedback
//! prevention (discarding inbound audio during playback) is a session-state
//! decision made by the consumer, not a channel policy.

use crate::audio::frame::AudioFrame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// End-of-stream marker returned to a producer once the channel is closed.
#[derive(Debug, PartialEq)]
pub struct ChannelClosed;

/// Create a bounded frame channel with the given capacity.
pub struct FrameChannel;

impl FrameChannel {
    pub fn bounded(capacity: usize) -> (FrameSender, FrameReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let closed = Arc::new(AtomicBool::new(false));
        let close_signal = CancellationToken::new();
        (
            FrameSender {
                tx,
                closed: closed.clone(),
                close_signal: close_signal.clone(),
            },
            FrameReceiver {
                rx,
                closed,
                close_signal,
            },
        )
    }
}

/// Producer half of the frame channel.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<AudioFrame>,
    closed: Arc<AtomicBool>,
    close_signal: CancellationToken,
}

impl FrameSender {
    /// Send one frame, awaiting if the channel is full.
    ///
    /// Returns `Err(ChannelClosed)` once the channel is closed; the frame is
    /// dropped in that case (the stream has ended, there is nobody left to
    /// order it against).
    pub async fn send(&self, frame: AudioFrame) -> Result<(), ChannelClosed> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelClosed);
        }
        tokio::select! {
            result = self.tx.send(frame) => result.map_err(|_| ChannelClosed),
            _ = self.close_signal.cancelled() => Err(ChannelClosed),
        }
    }

    /// Close the channel. Idempotent; unblocks a waiting producer/consumer.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_signal.cancel();
        }
    }

    /// Whether the channel has been closed from either side.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

/// Consumer half of the frame channel.
pub struct FrameReceiver {
    rx: mpsc::Receiver<AudioFrame>,
    closed: Arc<AtomicBool>,
    close_signal: CancellationToken,
}

impl FrameReceiver {
    /// Receive the next frame in arrival order.
    ///
    /// Returns `None` on end-of-stream: either the channel was closed and
    /// drained, or close was requested while waiting.
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        // Drain buffered frames even after close so nothing in flight is lost.
        if let Ok(frame) = self.rx.try_recv() {
            return Some(frame);
        }
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        tokio::select! {
            frame = self.rx.recv() => frame,
            _ = self.close_signal.cancelled() => self.rx.try_recv().ok(),
        }
    }

    /// Close the channel from the consumer side. Idempotent.
    pub fn close(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_signal.cancel();
        }
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(n: u8) -> AudioFrame {
        AudioFrame::from_pcm(vec![n, n], 16000).unwrap()
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (tx, mut rx) = FrameChannel::bounded(8);
        for n in 0..5u8 {
            tx.send(frame(n)).await.unwrap();
        }
        for n in 0..5u8 {
            assert_eq!(rx.recv().await.unwrap(), frame(n));
        }
    }

    #[tokio::test]
    async fn test_full_channel_applies_backpressure() {
        let (tx, mut rx) = FrameChannel::bounded(1);
        tx.send(frame(1)).await.unwrap();

        // A second send must wait until the consumer drains one frame.
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), tx.send(frame(2))).await;
        assert!(blocked.is_err(), "send should block on a full channel");

        let tx2 = tx.clone();
        let producer = tokio::spawn(async move { tx2.send(frame(2)).await });
        assert_eq!(rx.recv().await.unwrap(), frame(1));
        producer.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap(), frame(2));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_unblocks_consumer() {
        let (tx, mut rx) = FrameChannel::bounded(4);
        tx.close();
        tx.close();
        assert!(rx.recv().await.is_none());
        assert!(tx.send(frame(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_close_unblocks_waiting_producer() {
        let (tx, _rx) = FrameChannel::bounded(1);
        tx.send(frame(1)).await.unwrap();

        let tx2 = tx.clone();
        let producer = tokio::spawn(async move { tx2.send(frame(2)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.close();
        assert!(producer.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_buffered_frames_drain_after_close() {
        let (tx, mut rx) = FrameChannel::bounded(4);
        tx.send(frame(1)).await.unwrap();
        tx.send(frame(2)).await.unwrap();
        tx.close();
        assert_eq!(rx.recv().await.unwrap(), frame(1));
        assert_eq!(rx.recv().await.unwrap(), frame(2));
        assert!(rx.recv().await.is_none());
    }
}
