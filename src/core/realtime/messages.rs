//! Realtime API WebSocket message types.
//!
//! All events are JSON objects discriminated by a `type` field.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Configure the session
//! - input_audio_buffer.append - Append caller audio
//! - input_audio_buffer.clear - Drop buffered caller audio
//! - conversation.item.create - Add a text message or function-call output
//! - response.create - Ask the model to respond
//! - response.cancel - Cancel the in-flight response
//!
//! Server events consumed by the bridge:
//! - session.created / session.updated
//! - input_audio_buffer.speech_started / speech_stopped
//! - conversation.item.created
//! - conversation.item.input_audio_transcription.completed
//! - response.audio.delta
//! - response.output_item.done
//! - response.done
//! - rate_limits.updated
//! - error
//!
//! Every other server event decodes to [`ServerEvent::Unknown`].

use base64::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration
// =============================================================================

/// Payload of `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,
}

/// Maximum tokens configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxTokens {
    Number(i32),
    /// Always "inf"
    Infinite(String),
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
    /// ISO-639-1 language hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Turn detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad {
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
}

/// Tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Always "function"
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// message, function_call, function_call_output
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A user text message.
    pub fn user_text(text: &str) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.to_string()),
                audio: None,
                transcript: None,
            }]),
            ..Default::default()
        }
    }

    /// The result of a function call.
    pub fn function_call_output(call_id: &str, output: &str) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.to_string()),
            output: Some(output.to_string()),
            ..Default::default()
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    /// input_text, input_audio, text, audio
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the Realtime API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Audio append event from raw codec bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Wire name of the event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            Self::InputAudioBufferClear => "input_audio_buffer.clear",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ResponseCreate => "response.create",
            Self::ResponseCancel => "response.cancel",
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the Realtime API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(rename = "session.created")]
    SessionCreated { session: Session },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: Session },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: u64,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: u64,
    },

    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated { item: ConversationItem },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        item_id: String,
        transcript: String,
    },

    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        response_id: String,
        #[serde(default)]
        item_id: Option<String>,
        /// Base64-encoded audio
        delta: String,
    },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        response_id: String,
        item: ConversationItem,
    },

    #[serde(rename = "response.done")]
    ResponseDone { response: Response },

    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated { rate_limits: Vec<RateLimit> },

    #[serde(other)]
    Unknown,
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Session information.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub modalities: Vec<String>,
    #[serde(default)]
    pub voice: Option<String>,
}

/// Response information.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: String,
    /// completed, cancelled, failed, incomplete
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub output: Vec<ConversationItem>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl Response {
    /// Transcripts and texts of the assistant output, in order.
    pub fn transcripts(&self) -> Vec<String> {
        self.output
            .iter()
            .filter_map(|item| item.content.as_ref())
            .flatten()
            .filter_map(|part| part.transcript.clone().or_else(|| part.text.clone()))
            .filter(|text| !text.is_empty())
            .collect()
    }
}

/// Token usage of one response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub total_tokens: u32,
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_token_details: Option<TokenDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_token_details: Option<TokenDetails>,
}

/// Token usage details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_tokens: Option<u32>,
}

/// Rate limit information.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimit {
    pub name: String,
    pub limit: u32,
    pub remaining: u32,
    pub reset_seconds: f64,
}

// =============================================================================
// Tests
// =============================================================================
