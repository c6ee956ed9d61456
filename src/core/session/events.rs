//! Per-session event bus.
//!
//! Everything that happens to a call outside the PBX event stream arrives on
//! one ordered channel: realtime frames, synthesized audio, barge-in, caller
//! audio from the RTP ingress, and transfer or hangup requests. The bus is
//! created with the session and closed exactly once during cleanup.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::trace;

use crate::core::realtime::{FunctionCallRequest, RealtimeEvent};

/// Queue depth of one session's bus.
pub const SESSION_BUS_CAPACITY: usize = 1024;

/// Dialplan location to send the caller to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransferRequest {
    pub extension: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
}

impl TransferRequest {
    pub fn to_extension(extension: &str) -> Self {
        Self {
            extension: extension.to_string(),
            context: None,
            priority: None,
        }
    }
}

/// Something the session has to act on.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Realtime frame for the protocol dispatcher
    Protocol(RealtimeEvent),
    /// Synthesized audio for the RTP stream
    AudioDelta(Bytes),
    /// Caller started talking over the assistant
    Interrupt,
    /// Function call requested by the model
    FunctionCall(FunctionCallRequest),
    /// Caller audio received over RTP
    InboundAudio(Bytes),
    Transfer(TransferRequest),
    Hangup,
}

impl SessionEvent {
    /// Split a realtime frame into the events the session handles.
    ///
    /// Audio deltas skip the dispatcher; everything else reaches it, followed
    /// by the action the frame asks for.
    pub fn from_realtime(event: RealtimeEvent) -> Vec<SessionEvent> {
        match event {
            RealtimeEvent::AudioDelta { audio, .. } => vec![SessionEvent::AudioDelta(audio)],
            RealtimeEvent::SpeechStarted { .. } => {
                vec![SessionEvent::Interrupt, SessionEvent::Protocol(event)]
            }
            RealtimeEvent::FunctionCall(ref call) => {
                let call = call.clone();
                vec![SessionEvent::Protocol(event), SessionEvent::FunctionCall(call)]
            }
            other => vec![SessionEvent::Protocol(other)],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::AudioDelta(_) => "audio_delta",
            Self::Interrupt => "interrupt",
            Self::FunctionCall(_) => "function_call",
            Self::InboundAudio(_) => "inbound_audio",
            Self::Transfer(_) => "transfer",
            Self::Hangup => "hangup",
        }
    }
}

/// Publishing side of a session's bus.
///
/// Cloned into the realtime callback and the RTP ingress sink. Publishers
/// look the sender up on every call, so [`SessionBus::close`] ends the
/// subscription even while clones are still registered elsewhere.
#[derive(Clone)]
pub struct SessionBus {
    label: Arc<str>,
    sender: Arc<Mutex<Option<mpsc::Sender<SessionEvent>>>>,
}

impl SessionBus {
    pub fn new(label: &str) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(SESSION_BUS_CAPACITY);
        (
            Self {
                label: Arc::from(label),
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Publish, waiting for queue space.
    pub async fn publish(&self, event: SessionEvent) {
        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) => {
                if sender.send(event).await.is_err() {
                    trace!(channel_id = %self.label, "Session bus receiver gone");
                }
            }
            None => trace!(channel_id = %self.label, "Session bus closed, dropping {}", event.name()),
        }
    }

    /// Publish without waiting. Returns false when the event was dropped.
    pub fn try_publish(&self, event: SessionEvent) -> bool {
        let guard = self.sender.lock();
        match guard.as_ref() {
            Some(sender) => match sender.try_send(event) {
                Ok(()) => true,
                Err(e) => {
                    trace!(channel_id = %self.label, "Session bus dropped event: {}", e);
                    false
                }
            },
            None => false,
        }
    }

    /// Stop accepting events. Returns false if already closed.
    pub fn close(&self) -> bool {
        self.sender.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}
