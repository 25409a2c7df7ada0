//! # WebSocket Voice Transport
//!
//! Handles the duplex audio conversation at `/ws/speak`. Each connection is
//! an independent actor that bridges the socket to one [`VoiceSession`] task:
//!
//! - **Client → Server**: JSON control messages (`start_session`,
//!   `end_session`, `interrupt`, `ping`) plus binary frames of raw PCM16
//!   little-endian mono audio.
//! - **Server → Client**: JSON notifications (`session_started`,
//!   `state_change`, `transcript`, `turn_finished`, `error`,
//!   `session_ended`, `pong`) plus binary frames of synthesized PCM16 audio.
//!
//! The actor never runs pipeline code itself. Inbound audio goes through the
//! bounded frame channel (`ctx.wait` suspends the actor when the pipeline is
//! behind, so socket reads apply backpressure instead of dropping frames);
//! outbound events arrive via a forwarding task that re-enters the actor
//! through its address, which preserves the session's event ordering on the
//! wire.

use crate::audio::{AudioFrame, FrameSender};
use crate::completion::{HttpTurnCompleter, TurnCompleter};
use crate::config::{AppConfig, SessionOptions, SessionOverrides};
use crate::error::PipelineError;
use crate::recognition::{RecognizerFactory, RemoteRecognizerFactory};
use crate::session::{SessionControl, SessionEvent, SessionHandle, VoiceSession};
use crate::state::AppState;
use crate::synthesis::{RemoteSynthesizer, Synthesizer};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Messages accepted from the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Begin a voice session, optionally overriding server defaults
    #[serde(rename = "start_session")]
    StartSession {
        #[serde(flatten)]
        overrides: SessionOverrides,
    },

    /// Gracefully end the current session
    #[serde(rename = "end_session")]
    EndSession,

    /// Barge-in: stop thinking/speaking and go back to listening
    #[serde(rename = "interrupt")]
    Interrupt,

    /// Application-level heartbeat
    #[serde(rename = "ping")]
    Ping { timestamp: Option<u64> },
}

/// Messages sent to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session_started")]
    SessionStarted {
        session_id: String,
        asr_model: String,
        llm_model: String,
        tts_model: String,
    },

    #[serde(rename = "state_change")]
    StateChange { state: &'static str },

    #[serde(rename = "transcript")]
    Transcript { text: String, is_final: bool },

    #[serde(rename = "turn_finished")]
    TurnFinished { samples: u64 },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "session_ended")]
    SessionEnded,

    #[serde(rename = "pong")]
    Pong { timestamp: Option<u64> },
}

/// Transport-side handles of the running session.
struct ActiveSession {
    id: Uuid,
    audio: FrameSender,
    control: mpsc::Sender<SessionControl>,
    sample_rate: u32,
}

/// WebSocket actor bridging one connection to one voice session.
pub struct SpeakWebSocket {
    app_state: web::Data<AppState>,
    session: Option<ActiveSession>,
    /// A start_session is being set up asynchronously
    starting: bool,
    last_heartbeat: Instant,
}

impl SpeakWebSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        Self {
            app_state,
            session: None,
            starting: false,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(error = %err, "Failed to serialize server message"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, message: &str) {
        warn!(message, "Voice session error sent to client");
        self.send_message(
            ctx,
            &ServerMessage::Error {
                message: message.to_string(),
            },
        );
    }

    fn handle_start_session(
        &mut self,
        overrides: SessionOverrides,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        if self.session.is_some() || self.starting {
            self.send_error(ctx, "Session already started on this connection");
            return;
        }
        if !self.app_state.try_begin_session() {
            self.send_error(ctx, "Server is at capacity, try again later");
            return;
        }

        self.starting = true;
        let config = self.app_state.get_config();
        let options = SessionOptions::merge(&config, &overrides);
        let addr = ctx.address();

        // Adapter construction reaches out to the recognition backend, so it
        // runs off the actor; the result re-enters through the mailbox.
        tokio::spawn(async move {
            let sample_rate = options.sample_rate;
            match open_session(&config, options).await {
                Ok(handle) => addr.do_send(SessionReady {
                    handle,
                    sample_rate,
                }),
                Err(err) => addr.do_send(SessionFailed {
                    message: err.to_string(),
                }),
            }
        });
    }

    /// Forward one binary chunk into the session's frame channel.
    ///
    /// `ctx.wait` pauses the mailbox until the (possibly full) channel
    /// accepts the frame, which keeps frames ordered and pushes backpressure
    /// up to the socket.
    fn handle_audio(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session) = &self.session else {
            self.send_error(ctx, "Audio received before start_session");
            return;
        };

        let frame = match AudioFrame::from_pcm(data.to_vec(), session.sample_rate) {
            Ok(frame) => frame,
            Err(err) => {
                self.send_error(ctx, &format!("Rejected audio chunk: {}", err));
                return;
            }
        };

        let sender = session.audio.clone();
        ctx.wait(
            async move {
                // A closed channel means the session is tearing down; the
                // ended notification is already on its way.
                let _ = sender.send(frame).await;
            }
            .into_actor(self),
        );
    }

    fn send_control(&self, command: SessionControl, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session) = &self.session else {
            self.send_error(ctx, "No active session");
            return;
        };
        if session.control.try_send(command).is_err() {
            debug!(session_id = %session.id, "Control channel unavailable, session closing");
        }
    }

    /// Release the session slot exactly once, whether the session is live or
    /// still being set up. `starting` and `session` are mutually exclusive.
    fn release_session(&mut self) {
        if self.starting {
            // The slot was claimed by handle_start_session but SessionReady
            // never arrived; the orphaned session task tears itself down when
            // its event channel drops.
            self.starting = false;
            self.app_state.end_session();
            info!("Voice session slot released during setup");
        }
        if let Some(session) = self.session.take() {
            session.audio.close();
            self.app_state.end_session();
            info!(session_id = %session.id, "Voice session released");
        }
    }
}

/// Build the adapters and spawn the session task.
async fn open_session(
    config: &AppConfig,
    options: SessionOptions,
) -> Result<SessionHandle, PipelineError> {
    let factory = RemoteRecognizerFactory::new(config.recognition.clone());
    let recognizer = factory.open(&options).await?;
    let completer: Arc<dyn TurnCompleter> = Arc::new(HttpTurnCompleter::new(&config.completion)?);
    let synthesizer: Arc<dyn Synthesizer> = Arc::new(RemoteSynthesizer::new(&config.synthesis)?);

    Ok(VoiceSession::spawn(
        Uuid::new_v4(),
        options,
        recognizer,
        completer,
        synthesizer,
        &config.session,
    ))
}

/// Session setup finished; carries the transport handles.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionReady {
    handle: SessionHandle,
    /// Negotiated inbound sample rate for this session
    sample_rate: u32,
}

/// Session setup failed before the task existed.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionFailed {
    message: String,
}

/// One event from the session task, delivered in order.
#[derive(Message)]
#[rtype(result = "()")]
struct PipelineEvent(SessionEvent);

impl Actor for SpeakWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection started");

        ctx.run_interval(Duration::from_secs(30), |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > Duration::from_secs(60) {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("WebSocket connection stopped");
        // Closing the frame channel is what tells the session task the
        // transport is gone.
        self.release_session();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SpeakWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::StartSession { overrides }) => {
                    self.handle_start_session(overrides, ctx);
                }
                Ok(ClientMessage::EndSession) => {
                    self.send_control(SessionControl::End, ctx);
                }
                Ok(ClientMessage::Interrupt) => {
                    self.app_state.record_barge_in();
                    self.send_control(SessionControl::Interrupt, ctx);
                }
                Ok(ClientMessage::Ping { timestamp }) => {
                    self.last_heartbeat = Instant::now();
                    self.send_message(ctx, &ServerMessage::Pong { timestamp });
                }
                Err(err) => {
                    self.send_error(ctx, &format!("Invalid message: {}", err));
                }
            },
            Ok(ws::Message::Binary(data)) => {
                self.handle_audio(&data, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(reason = ?reason, "WebSocket closed by client");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<SessionReady> for SpeakWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionReady, ctx: &mut Self::Context) {
        self.starting = false;

        let SessionHandle {
            id,
            audio,
            control,
            mut events,
        } = msg.handle;

        self.session = Some(ActiveSession {
            id,
            audio,
            control,
            sample_rate: msg.sample_rate,
        });

        // Pump session events back into the mailbox; ordering is preserved
        // because both the channel and the mailbox are FIFO.
        let addr = ctx.address();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                addr.do_send(PipelineEvent(event));
            }
        });
    }
}

impl Handler<SessionFailed> for SpeakWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionFailed, ctx: &mut Self::Context) {
        self.starting = false;
        self.app_state.end_session();
        self.send_error(ctx, &format!("Failed to start session: {}", msg.message));
    }
}

impl Handler<PipelineEvent> for SpeakWebSocket {
    type Result = ();

    fn handle(&mut self, msg: PipelineEvent, ctx: &mut Self::Context) {
        match msg.0 {
            SessionEvent::Started {
                session_id,
                asr_model,
                llm_model,
                tts_model,
            } => {
                self.send_message(
                    ctx,
                    &ServerMessage::SessionStarted {
                        session_id: session_id.to_string(),
                        asr_model,
                        llm_model,
                        tts_model,
                    },
                );
            }
            SessionEvent::StateChange(state) => {
                self.send_message(ctx, &ServerMessage::StateChange { state: state.as_str() });
            }
            SessionEvent::Transcript(event) => {
                self.send_message(
                    ctx,
                    &ServerMessage::Transcript {
                        text: event.text,
                        is_final: event.is_final,
                    },
                );
            }
            SessionEvent::Audio(frame) => {
                ctx.binary(frame.pcm);
            }
            SessionEvent::TurnFinished { samples } => {
                self.app_state.record_turn_completed();
                self.send_message(ctx, &ServerMessage::TurnFinished { samples });
            }
            SessionEvent::Error { message } => {
                self.app_state.record_pipeline_error();
                self.send_message(ctx, &ServerMessage::Error { message });
            }
            SessionEvent::Ended => {
                self.send_message(ctx, &ServerMessage::SessionEnded);
                self.release_session();
            }
        }
    }
}

/// HTTP → WebSocket upgrade for `/ws/speak`.
pub async fn speak_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(peer = ?req.connection_info().peer_addr(), "New voice WebSocket connection");
    ws::start(SpeakWebSocket::new(app_state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_session_parses_overrides() {
        let json = r#"{"type":"start_session","llm_model":"llama3.1:8b","sample_rate":22050,"split":false}"#;
        match serde_json::from_str::<ClientMessage>(json).unwrap() {
            ClientMessage::StartSession { overrides } => {
                assert_eq!(overrides.llm_model.as_deref(), Some("llama3.1:8b"));
                assert_eq!(overrides.sample_rate, Some(22050));
                assert_eq!(overrides.split, Some(false));
                assert!(overrides.asr_model.is_none());
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_bare_start_session_parses() {
        let msg = serde_json::from_str::<ClientMessage>(r#"{"type":"start_session"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::StartSession { .. }));
    }

    #[test]
    fn test_control_messages_parse() {
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"interrupt"}"#).unwrap(),
            ClientMessage::Interrupt
        ));
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"end_session"}"#).unwrap(),
            ClientMessage::EndSession
        ));
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"ping","timestamp":17}"#).unwrap(),
            ClientMessage::Ping { timestamp: Some(17) }
        ));
    }

    #[test]
    fn test_disconnect_during_setup_frees_the_session_slot() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let mut ws = SpeakWebSocket::new(state.clone());

        // The slot is claimed as soon as start_session is admitted, before
        // the session handle exists.
        assert!(state.try_begin_session());
        ws.starting = true;

        ws.release_session();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
        assert!(!ws.starting);

        // A second release must not underflow the slot count.
        ws.release_session();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_server_message_wire_shape() {
        let json = serde_json::to_string(&ServerMessage::StateChange { state: "listening" }).unwrap();
        assert_eq!(json, r#"{"type":"state_change","state":"listening"}"#);

        let json = serde_json::to_string(&ServerMessage::TurnFinished { samples: 4800 }).unwrap();
        assert_eq!(json, r#"{"type":"turn_finished","samples":4800}"#);

        let json = serde_json::to_string(&ServerMessage::SessionEnded).unwrap();
        assert_eq!(json, r#"{"type":"session_ended"}"#);
    }
}
