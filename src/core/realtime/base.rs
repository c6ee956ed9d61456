//! Error, event and callback types shared by the realtime client and its
//! consumers.
//!
//! Inbound frames are decoded at the socket boundary into the closed
//! [`RealtimeEvent`] set; call sessions never see raw JSON.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use base64::prelude::*;
use bytes::Bytes;
use thiserror::Error;

use super::messages::{RateLimit, ServerEvent, Usage};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Connection State
// =============================================================================

/// Socket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

// =============================================================================
// Events
// =============================================================================

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallRequest {
    pub call_id: String,
    pub name: String,
    /// Raw JSON arguments
    pub arguments: String,
}

impl FunctionCallRequest {
    /// Parse the arguments, treating empty or malformed input as an empty
    /// object.
    pub fn arguments_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// Session accepted by the service
    SessionCreated { session_id: String },
    /// Chunk of synthesized audio in the negotiated codec
    AudioDelta { response_id: String, audio: Bytes },
    /// Caller started speaking (barge-in)
    SpeechStarted { audio_start_ms: u64 },
    /// A response finished
    ResponseDone {
        response_id: String,
        status: String,
        transcripts: Vec<String>,
        usage: Option<Usage>,
    },
    /// The model wants a function executed
    FunctionCall(FunctionCallRequest),
    /// A function result was added to the conversation
    FunctionCallOutput { call_id: String, output: String },
    /// Transcript of caller speech
    InputTranscript { item_id: String, transcript: String },
    /// Rate-limit telemetry
    Usage { rate_limits: Vec<RateLimit> },
    /// Service-side error
    Error { error_type: String, message: String },
    /// Socket closed by the service or by a transport error
    Closed,
    /// Any other frame type
    Other(String),
}

impl RealtimeEvent {
    /// Decode a text frame.
    ///
    /// Unknown frame types become [`RealtimeEvent::Other`]; malformed known
    /// frames are an error.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        let event: ServerEvent = serde_json::from_value(value)?;
        Ok(Self::from_server_event(event, kind))
    }

    fn from_server_event(event: ServerEvent, kind: String) -> Self {
        match event {
            ServerEvent::SessionCreated { session } => Self::SessionCreated {
                session_id: session.id,
            },
            ServerEvent::AudioDelta {
                response_id, delta, ..
            } => match BASE64_STANDARD.decode(&delta) {
                Ok(audio) => Self::AudioDelta {
                    response_id,
                    audio: Bytes::from(audio),
                },
                Err(e) => {
                    tracing::warn!("Failed to decode audio delta: {}", e);
                    Self::Other(kind)
                }
            },
            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                Self::SpeechStarted { audio_start_ms }
            }
            ServerEvent::ResponseDone { response } => Self::ResponseDone {
                transcripts: response.transcripts(),
                response_id: response.id,
                status: response.status,
                usage: response.usage,
            },
            ServerEvent::OutputItemDone { item, .. } if item.item_type == "function_call" => {
                match (item.call_id, item.name) {
                    (Some(call_id), Some(name)) => Self::FunctionCall(FunctionCallRequest {
                        call_id,
                        name,
                        arguments: item.arguments.unwrap_or_default(),
                    }),
                    _ => {
                        tracing::warn!("Function call item without call_id or name");
                        Self::Other(kind)
                    }
                }
            }
            ServerEvent::ConversationItemCreated { item }
                if item.item_type == "function_call_output" =>
            {
                Self::FunctionCallOutput {
                    call_id: item.call_id.unwrap_or_default(),
                    output: item.output.unwrap_or_default(),
                }
            }
            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => Self::InputTranscript {
                item_id,
                transcript,
            },
            ServerEvent::RateLimitsUpdated { rate_limits } => Self::Usage { rate_limits },
            ServerEvent::Error { error } => Self::Error {
                error_type: error.error_type,
                message: error.message,
            },
            _ => Self::Other(kind),
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::SessionCreated { .. } => "session_created",
            Self::AudioDelta { .. } => "audio_delta",
            Self::SpeechStarted { .. } => "speech_started",
            Self::ResponseDone { .. } => "response_done",
            Self::FunctionCall(_) => "function_call",
            Self::FunctionCallOutput { .. } => "function_call_output",
            Self::InputTranscript { .. } => "input_transcript",
            Self::Usage { .. } => "usage",
            Self::Error { .. } => "error",
            Self::Closed => "closed",
            Self::Other(kind) => kind,
        }
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Receives every decoded inbound event of one session.
pub type RealtimeEventCallback =
    Arc<dyn Fn(RealtimeEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_audio_delta() {
        let payload = BASE64_STANDARD.encode([0xD5u8; 4]);
        let frame = format!(
            r#"{{"type":"response.audio.delta","response_id":"r1","item_id":"i1","output_index":0,"content_index":0,"delta":"{payload}"}}"#
        );
        let event = RealtimeEvent::decode(&frame).unwrap();
        assert_eq!(
            event,
            RealtimeEvent::AudioDelta {
                response_id: "r1".to_string(),
                audio: Bytes::from_static(&[0xD5; 4]),
            }
        );
    }

    #[test]
    fn test_decode_function_call() {
        let frame = r#"{
            "type": "response.output_item.done",
            "response_id": "r1",
            "output_index": 0,
            "item": {"id": "i1", "type": "function_call", "call_id": "call_9",
                     "name": "transfer_call", "arguments": "{\"extension\":\"200\"}"}
        }"#;
        match RealtimeEvent::decode(frame).unwrap() {
            RealtimeEvent::FunctionCall(call) => {
                assert_eq!(call.name, "transfer_call");
                assert_eq!(call.arguments_json()["extension"], "200");
            }
            other => panic!("Unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_message_output_item_is_other() {
        let frame = r#"{"type":"response.output_item.done","response_id":"r1",
            "item":{"type":"message","role":"assistant"}}"#;
        assert_eq!(
            RealtimeEvent::decode(frame).unwrap(),
            RealtimeEvent::Other("response.output_item.done".to_string())
        );
    }

    #[test]
    fn test_decode_unknown_and_malformed() {
        assert_eq!(
            RealtimeEvent::decode(r#"{"type":"response.text.delta"}"#).unwrap(),
            RealtimeEvent::Other("response.text.delta".to_string())
        );
        assert!(RealtimeEvent::decode("not json").is_err());
        // known type with missing required fields
        assert!(RealtimeEvent::decode(r#"{"type":"response.audio.delta"}"#).is_err());
    }

    #[test]
    fn test_arguments_fallback() {
        let call = FunctionCallRequest {
            call_id: "c".to_string(),
            name: "end_call".to_string(),
            arguments: String::new(),
        };
        assert!(call.arguments_json().as_object().unwrap().is_empty());
    }
}
