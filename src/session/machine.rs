//! # Session State Machine
//!
//! The per-connection orchestrator. One [`VoiceSession`] owns the chat
//! history and the three adapters, and sequences them into coherent
//! conversational turns:
//!
//! ```text
//! Idle -> Listening -> Thinking -> Speaking -> Listening -> ...
//!                (any state) -> Closed
//! ```
//!
//! The session runs as its own tokio task, fed by two inbound channels (the
//! audio frame channel plus a small control channel) and drained through an
//! ordered event channel that carries notifications and synthesized audio
//! back to the transport. The current state gates which adapter may be
//! invoked, which is the only mutual exclusion the pipeline needs: nothing
//! here is shared across sessions.
//!
//! Key policies implemented here:
//! - **Mic-mute**: while `Speaking`, inbound audio is accepted and discarded
//!   so the pipeline never transcribes its own playback. Audio arriving
//!   during `Thinking` is set aside by the session and decoded at the next
//!   `Listening` entry, so the frame channel never backs up mid-turn.
//! - **Barge-in**: an interrupt (or a new final transcript) during
//!   `Thinking`/`Speaking` cancels the in-flight adapter call cooperatively
//!   and discards partially produced audio.
//! - **Recoverable errors**: adapter failures emit an error event and put
//!   the session back into `Listening`; the chat history keeps the user
//!   message (and the assistant message too when only synthesis failed).

use crate::audio::{AudioFrame, FrameChannel, FrameReceiver, FrameSender};
use crate::completion::TurnCompleter;
use crate::config::{SessionConfig, SessionOptions};
use crate::error::PipelineError;
use crate::recognition::{Recognizer, TranscriptEvent};
use crate::session::history::ChatHistory;
use crate::synthesis::{split_segments, Synthesizer};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Conversational state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created, start message not yet processed
    Idle,
    /// Accepting audio and feeding the recognizer
    Listening,
    /// Waiting on the language-generation backend
    Thinking,
    /// Streaming synthesized audio to the client
    Speaking,
    /// Terminal; resources released
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Thinking => "thinking",
            SessionState::Speaking => "speaking",
            SessionState::Closed => "closed",
        }
    }
}

/// Control messages from the transport task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// Explicit barge-in with no new speech
    Interrupt,
    /// Graceful end-session request
    End,
}

/// Ordered events emitted by the session toward the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Session is up; carries the merged configuration highlights
    Started {
        session_id: Uuid,
        asr_model: String,
        llm_model: String,
        tts_model: String,
    },
    /// The state machine moved to a new state
    StateChange(SessionState),
    /// Recognition result (partial results are a client-side hint only)
    Transcript(TranscriptEvent),
    /// One synthesized audio frame
    Audio(AudioFrame),
    /// The utterance finished streaming; total samples produced
    TurnFinished { samples: u64 },
    /// A recoverable pipeline error; the session stays alive
    Error { message: String },
    /// Terminal notification before the channel closes
    Ended,
}

/// Handle held by the transport side of a running session.
pub struct SessionHandle {
    pub id: Uuid,
    /// Inbound audio frames (bounded; producer awaits when full)
    pub audio: FrameSender,
    /// Interrupt / end control path
    pub control: mpsc::Sender<SessionControl>,
    /// Ordered notifications and synthesized audio
    pub events: mpsc::Receiver<SessionEvent>,
}

/// What a finished turn means for the session loop.
enum TurnOutcome {
    /// Return to listening (normally, after an error, or after a barge-in)
    Continue,
    /// Tear the session down
    Close,
}

/// The orchestrator itself. Constructed via [`VoiceSession::spawn`].
pub struct VoiceSession {
    id: Uuid,
    options: SessionOptions,
    state: SessionState,
    history: ChatHistory,
    recognizer: Box<dyn Recognizer>,
    completer: Arc<dyn TurnCompleter>,
    synthesizer: Arc<dyn Synthesizer>,
    events: mpsc::Sender<SessionEvent>,
    /// Frames accepted during `Thinking`, decoded at the next `Listening`
    pending_audio: VecDeque<AudioFrame>,
}

impl VoiceSession {
    /// Spawn a session task and hand back its transport-side handle.
    ///
    /// The recognizer is already opened by the caller because a failure to
    /// open is an unrecoverable session-creation error, reported before any
    /// task exists.
    pub fn spawn(
        id: Uuid,
        options: SessionOptions,
        recognizer: Box<dyn Recognizer>,
        completer: Arc<dyn TurnCompleter>,
        synthesizer: Arc<dyn Synthesizer>,
        channels: &SessionConfig,
    ) -> SessionHandle {
        let (audio_tx, audio_rx) = FrameChannel::bounded(channels.inbound_channel_capacity);
        let (control_tx, control_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(channels.outbound_channel_capacity);

        let session = VoiceSession {
            id,
            history: ChatHistory::new(&options.system_prompt, options.max_history_tokens),
            options,
            state: SessionState::Idle,
            recognizer,
            completer,
            synthesizer,
            events: event_tx,
            pending_audio: VecDeque::new(),
        };

        tokio::spawn(session.run(audio_rx, control_rx));

        SessionHandle {
            id,
            audio: audio_tx,
            control: control_tx,
            events: event_rx,
        }
    }

    /// Main session loop: drives `Listening` and dispatches turns.
    async fn run(
        mut self,
        mut audio: FrameReceiver,
        mut control: mpsc::Receiver<SessionControl>,
    ) {
        info!(session_id = %self.id, model = %self.options.llm_model, "Voice session started");

        let started = SessionEvent::Started {
            session_id: self.id,
            asr_model: self.options.asr_model.clone(),
            llm_model: self.options.llm_model.clone(),
            tts_model: self.options.tts_model.clone(),
        };
        if self.emit(started).await.is_err() || self.enter_listening().await.is_err() {
            self.shutdown(&mut audio).await;
            return;
        }

        'session: loop {
            // Audio set aside during a turn is decoded before new input.
            let frame = match self.pending_audio.pop_front() {
                Some(frame) => frame,
                None => tokio::select! {
                    cmd = control.recv() => match cmd {
                        Some(SessionControl::Interrupt) => {
                            // No turn in flight while listening; nothing to cancel.
                            debug!(session_id = %self.id, "Interrupt while listening ignored");
                            continue 'session;
                        }
                        Some(SessionControl::End) | None => break 'session,
                    },
                    frame = audio.recv() => match frame {
                        Some(frame) => frame,
                        None => break 'session,
                    },
                },
            };

            match self.recognizer.feed(&frame).await {
                Ok(events) => {
                    for event in events {
                        let turn_text = (event.is_final && !event.text.trim().is_empty())
                            .then(|| event.text.trim().to_string());
                        if self.emit(SessionEvent::Transcript(event)).await.is_err() {
                            break 'session;
                        }
                        let Some(text) = turn_text else { continue };

                        match self.run_turn(text, &mut audio, &mut control).await {
                            TurnOutcome::Continue => {
                                if self.enter_listening().await.is_err() {
                                    break 'session;
                                }
                                // Anything queued behind the final event is
                                // stale after the recognizer reset.
                                break;
                            }
                            TurnOutcome::Close => break 'session,
                        }
                    }
                }
                Err(err) => {
                    // Recoverable: report, reset, keep listening.
                    warn!(session_id = %self.id, error = %err, "Recognition failed");
                    if self.emit_error(&err).await.is_err() {
                        break 'session;
                    }
                    self.recognizer.reset().await;
                }
            }
        }

        self.shutdown(&mut audio).await;
    }

    /// One conversational turn: `Thinking` then `Speaking`.
    async fn run_turn(
        &mut self,
        text: String,
        audio: &mut FrameReceiver,
        control: &mut mpsc::Receiver<SessionControl>,
    ) -> TurnOutcome {
        self.state = SessionState::Thinking;
        if self.emit(SessionEvent::StateChange(SessionState::Thinking)).await.is_err() {
            return TurnOutcome::Close;
        }

        info!(session_id = %self.id, text = %text, "User turn finalized");
        self.history.append_user(&text);

        let cancel = CancellationToken::new();
        let snapshot = self.history.snapshot();
        let completer = self.completer.clone();
        let options = self.options.clone();

        // Thinking: block on the completion call but keep watching the
        // control channel so a barge-in can cancel it promptly, and keep the
        // frame channel drained so the barge-in is never stuck behind a full
        // channel. Drained frames are decoded at the next listening entry.
        let mut end_requested = false;
        // The pinned completion future borrows its arguments; it must not
        // outlive this block.
        let result = {
            let completion = completer.complete(&snapshot, &options, &cancel);
            tokio::pin!(completion);
            loop {
                tokio::select! {
                    result = &mut completion => break result,
                    cmd = control.recv() => match cmd {
                        Some(SessionControl::Interrupt) => cancel.cancel(),
                        Some(SessionControl::End) | None => {
                            cancel.cancel();
                            end_requested = true;
                        }
                    },
                    frame = audio.recv() => match frame {
                        Some(frame) => self.pending_audio.push_back(frame),
                        None => {
                            cancel.cancel();
                            end_requested = true;
                        }
                    },
                }
            }
        };

        if end_requested {
            return TurnOutcome::Close;
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(PipelineError::Cancelled) => {
                debug!(session_id = %self.id, "Turn completion cancelled by barge-in");
                return TurnOutcome::Continue;
            }
            Err(err) => {
                // The user message stays recorded so the next utterance can
                // retry with full context.
                warn!(session_id = %self.id, error = %err, "Turn completion failed");
                if self.emit_error(&err).await.is_err() {
                    return TurnOutcome::Close;
                }
                return TurnOutcome::Continue;
            }
        };

        info!(session_id = %self.id, reply = %reply, "Assistant turn completed");
        self.history.append_assistant(&reply);

        self.speak(&reply, cancel, audio, control).await
    }

    /// `Speaking`: stream the synthesized utterance while enforcing mic-mute
    /// and watching for barge-in.
    async fn speak(
        &mut self,
        reply: &str,
        cancel: CancellationToken,
        audio: &mut FrameReceiver,
        control: &mut mpsc::Receiver<SessionControl>,
    ) -> TurnOutcome {
        let segments = split_segments(reply, self.options.split);
        if segments.is_empty() {
            debug!(session_id = %self.id, "Reply had no speakable segments");
            return TurnOutcome::Continue;
        }

        // Synthesis starts before the speaking notification goes out, so the
        // client never sees "speaking" ahead of actual audio production.
        let mut stream = self
            .synthesizer
            .synthesize(segments, &self.options, cancel.clone());

        self.state = SessionState::Speaking;
        if self.emit(SessionEvent::StateChange(SessionState::Speaking)).await.is_err() {
            return TurnOutcome::Close;
        }

        let mut samples: u64 = 0;
        loop {
            tokio::select! {
                item = stream.recv() => match item {
                    Some(Ok(frame)) => {
                        samples += frame.sample_count();
                        if self.emit(SessionEvent::Audio(frame)).await.is_err() {
                            cancel.cancel();
                            return TurnOutcome::Close;
                        }
                    }
                    Some(Err(err)) => {
                        // Audio already sent is not retracted, and the text
                        // reply stays in history: only the voice failed.
                        warn!(session_id = %self.id, error = %err, "Synthesis failed");
                        if self.emit_error(&err).await.is_err() {
                            return TurnOutcome::Close;
                        }
                        return TurnOutcome::Continue;
                    }
                    None => {
                        // Utterance exhausted: finished notification first,
                        // then the caller emits the listening transition.
                        if self
                            .emit(SessionEvent::TurnFinished { samples })
                            .await
                            .is_err()
                        {
                            return TurnOutcome::Close;
                        }
                        return TurnOutcome::Continue;
                    }
                },
                cmd = control.recv() => match cmd {
                    Some(SessionControl::Interrupt) => {
                        // Barge-in: stop synthesis and drop whatever it has
                        // already queued; no turn-finished for this utterance.
                        info!(session_id = %self.id, "Barge-in during playback");
                        cancel.cancel();
                        return TurnOutcome::Continue;
                    }
                    Some(SessionControl::End) | None => {
                        cancel.cancel();
                        return TurnOutcome::Close;
                    }
                },
                frame = audio.recv() => match frame {
                    // Mic-mute: accepted so the transport stays flow
                    // controlled, never forwarded to the recognizer.
                    Some(_) => {}
                    None => {
                        cancel.cancel();
                        return TurnOutcome::Close;
                    }
                },
            }
        }
    }

    /// Enter (or re-enter) `Listening`: reset the recognizer so no stale
    /// transcript from a previous phase can surface, then notify the client.
    async fn enter_listening(&mut self) -> Result<(), ()> {
        self.recognizer.reset().await;
        self.state = SessionState::Listening;
        self.emit(SessionEvent::StateChange(SessionState::Listening)).await
    }

    /// Deterministic teardown, identical for every path into `Closed`.
    async fn shutdown(&mut self, audio: &mut FrameReceiver) {
        self.state = SessionState::Closed;
        audio.close();
        self.recognizer.close().await;
        let _ = self.events.send(SessionEvent::Ended).await;
        info!(session_id = %self.id, "Voice session closed");
    }

    async fn emit(&self, event: SessionEvent) -> Result<(), ()> {
        self.events.send(event).await.map_err(|_| ())
    }

    async fn emit_error(&self, err: &PipelineError) -> Result<(), ()> {
        self.emit(SessionEvent::Error {
            message: err.to_string(),
        })
        .await
    }
}
