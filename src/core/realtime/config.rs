//! Realtime speech-AI session configuration.
//!
//! - Model and voice selection
//! - Audio format negotiated with the telephony leg
//! - Modality (spoken call vs text-only session)
//! - Turn detection and transcription settings

use serde::{Deserialize, Serialize};

use super::messages::{
    InputAudioTranscription, MaxTokens, SessionConfig, ToolDef, TurnDetection,
};

/// Realtime API WebSocket endpoint.
pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default prefix padding for server VAD.
pub const DEFAULT_PREFIX_PADDING_MS: u32 = 300;

// =============================================================================
// Models
// =============================================================================

/// Realtime models known to accept G.711 audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RealtimeModel {
    #[default]
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    #[serde(rename = "gpt-4o-realtime-preview-2024-12-17")]
    Gpt4oRealtimePreview20241217,
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
    #[serde(rename = "gpt-4o-mini-realtime-preview-2024-12-17")]
    Gpt4oMiniRealtimePreview20241217,
}

impl RealtimeModel {
    /// API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oRealtimePreview20241217 => "gpt-4o-realtime-preview-2024-12-17",
            Self::Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
            Self::Gpt4oMiniRealtimePreview20241217 => "gpt-4o-mini-realtime-preview-2024-12-17",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "gpt-4o-realtime-preview" => Self::Gpt4oRealtimePreview,
            "gpt-4o-realtime-preview-2024-12-17" => Self::Gpt4oRealtimePreview20241217,
            "gpt-4o-mini-realtime-preview" => Self::Gpt4oMiniRealtimePreview,
            "gpt-4o-mini-realtime-preview-2024-12-17" => Self::Gpt4oMiniRealtimePreview20241217,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for RealtimeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Output voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl RealtimeVoice {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "ash" => Self::Ash,
            "ballad" => Self::Ballad,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            _ => Self::Alloy,
        }
    }
}

// =============================================================================
// Audio format / modality
// =============================================================================

/// Audio encoding on the realtime socket.
///
/// The RTP leg carries A-law, so the default avoids any transcoding between
/// the PBX and the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeAudioFormat {
    Pcm16,
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    #[default]
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

impl RealtimeAudioFormat {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
        }
    }
}

/// Session modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Spoken conversation: audio in, audio + transcript out
    #[default]
    Audio,
    /// Text-only conversation
    Text,
}

// =============================================================================
// Session configuration
// =============================================================================

/// Function tool exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema of the arguments
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// Per-call configuration of one realtime session.
#[derive(Debug, Clone, Default)]
pub struct RealtimeSessionConfig {
    pub api_key: String,
    /// Base WebSocket URL, without the model parameter
    pub url: String,
    pub model: RealtimeModel,
    pub voice: RealtimeVoice,
    pub modality: Modality,
    pub audio_format: RealtimeAudioFormat,
    pub instructions: Option<String>,
    pub temperature: Option<f32>,
    /// Negative means unlimited
    pub max_output_tokens: Option<i32>,
    pub transcription_model: Option<String>,
    pub language: Option<String>,
    pub vad_threshold: Option<f32>,
    pub silence_duration_ms: Option<u32>,
    pub tools: Vec<ToolDefinition>,
}

impl RealtimeSessionConfig {
    /// Full connection URL including the model parameter.
    pub fn ws_url(&self) -> String {
        let base = if self.url.is_empty() {
            DEFAULT_REALTIME_URL
        } else {
            self.url.as_str()
        };
        format!("{}?model={}", base, self.model.as_str())
    }

    /// Build the `session.update` payload for this modality.
    pub fn session_update(&self) -> SessionConfig {
        let tools = (!self.tools.is_empty()).then(|| {
            self.tools
                .iter()
                .map(|t| ToolDef {
                    tool_type: "function".to_string(),
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                })
                .collect::<Vec<_>>()
        });
        let tool_choice = tools.as_ref().map(|_| "auto".to_string());
        let max_response_output_tokens = self.max_output_tokens.map(|t| {
            if t < 0 {
                MaxTokens::Infinite("inf".to_string())
            } else {
                MaxTokens::Number(t)
            }
        });

        match self.modality {
            Modality::Audio => SessionConfig {
                modalities: Some(vec!["text".to_string(), "audio".to_string()]),
                instructions: self.instructions.clone(),
                voice: Some(self.voice.as_str().to_string()),
                input_audio_format: Some(self.audio_format.as_str().to_string()),
                output_audio_format: Some(self.audio_format.as_str().to_string()),
                input_audio_transcription: self.transcription_model.as_ref().map(|model| {
                    InputAudioTranscription {
                        model: model.clone(),
                        language: self.language.clone(),
                    }
                }),
                turn_detection: Some(TurnDetection::ServerVad {
                    threshold: self.vad_threshold,
                    prefix_padding_ms: Some(DEFAULT_PREFIX_PADDING_MS),
                    silence_duration_ms: self.silence_duration_ms,
                }),
                tools,
                tool_choice,
                temperature: self.temperature,
                max_response_output_tokens,
            },
            Modality::Text => SessionConfig {
                modalities: Some(vec!["text".to_string()]),
                instructions: self.instructions.clone(),
                voice: None,
                input_audio_format: None,
                output_audio_format: None,
                input_audio_transcription: None,
                turn_detection: None,
                tools,
                tool_choice,
                temperature: self.temperature,
                max_response_output_tokens,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_parsing() {
        assert_eq!(
            RealtimeModel::from_str_or_default("GPT-4o-mini-realtime-preview"),
            RealtimeModel::Gpt4oMiniRealtimePreview
        );
        assert_eq!(
            RealtimeModel::from_str_or_default("unknown"),
            RealtimeModel::Gpt4oRealtimePreview
        );
    }

    #[test]
    fn test_ws_url_carries_model() {
        let config = RealtimeSessionConfig {
            model: RealtimeModel::Gpt4oMiniRealtimePreview,
            ..Default::default()
        };
        assert_eq!(
            config.ws_url(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-mini-realtime-preview"
        );

        let local = RealtimeSessionConfig {
            url: "ws://127.0.0.1:9000/v1/realtime".to_string(),
            ..Default::default()
        };
        assert!(local.ws_url().starts_with("ws://127.0.0.1:9000/v1/realtime?model="));
    }

    #[test]
    fn test_audio_session_update() {
        let config = RealtimeSessionConfig {
            voice: RealtimeVoice::Coral,
            instructions: Some("Be brief.".to_string()),
            transcription_model: Some("whisper-1".to_string()),
            language: Some("de".to_string()),
            vad_threshold: Some(0.6),
            silence_duration_ms: Some(700),
            max_output_tokens: Some(-1),
            ..Default::default()
        };
        let json = serde_json::to_value(config.session_update()).unwrap();

        assert_eq!(json["modalities"], serde_json::json!(["text", "audio"]));
        assert_eq!(json["voice"], "coral");
        assert_eq!(json["input_audio_format"], "g711_alaw");
        assert_eq!(json["output_audio_format"], "g711_alaw");
        assert_eq!(json["input_audio_transcription"]["language"], "de");
        assert_eq!(json["turn_detection"]["type"], "server_vad");
        assert_eq!(json["turn_detection"]["silence_duration_ms"], 700);
        assert_eq!(json["max_response_output_tokens"], "inf");
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_text_session_update() {
        let config = RealtimeSessionConfig {
            modality: Modality::Text,
            temperature: Some(0.7),
            tools: vec![ToolDefinition {
                name: "end_call".to_string(),
                description: None,
                parameters: None,
            }],
            ..Default::default()
        };
        let json = serde_json::to_value(config.session_update()).unwrap();

        assert_eq!(json["modalities"], serde_json::json!(["text"]));
        assert!(json.get("voice").is_none());
        assert!(json.get("turn_detection").is_none());
        assert!(json.get("input_audio_format").is_none());
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tool_choice"], "auto");
    }
}
