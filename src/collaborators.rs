//! Services the call engine consumes but does not own.
//!
//! The bridge resolves assistants, writes call detail records, accumulates
//! billing and triggers post-call analytics through these traits. The binary
//! wires the configuration-backed directory and the logging implementations;
//! deployments with a database plug in their own.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::core::realtime::{
    Modality, RealtimeModel, RealtimeSessionConfig, RealtimeVoice, ToolDefinition, Usage,
};

/// Prefix distinguishing public widget keys from assistant unique ids.
pub const WIDGET_KEY_PREFIX: &str = "wk_";

// =============================================================================
// Assistant profiles
// =============================================================================

/// Voice, model and prompt of one assistant.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssistantProfile {
    pub uid: String,
    pub name: String,
    pub model: RealtimeModel,
    pub voice: RealtimeVoice,
    pub instructions: Option<String>,
    pub modality: Modality,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<i32>,
    pub transcription_model: Option<String>,
    pub language: Option<String>,
    pub vad_threshold: Option<f32>,
    pub silence_duration_ms: Option<u32>,
    /// Run post-call analytics for this assistant's calls
    pub analytics_enabled: bool,
    pub tools: Vec<ToolDefinition>,
}

impl AssistantProfile {
    pub fn named(uid: &str, name: &str) -> Self {
        Self {
            uid: uid.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Realtime session settings for a call handled by this assistant.
    pub fn realtime_config(&self, api_key: &str, url: &str) -> RealtimeSessionConfig {
        RealtimeSessionConfig {
            api_key: api_key.to_string(),
            url: url.to_string(),
            model: self.model,
            voice: self.voice,
            modality: self.modality,
            instructions: self.instructions.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            transcription_model: self.transcription_model.clone(),
            language: self.language.clone(),
            vad_threshold: self.vad_threshold,
            silence_duration_ms: self.silence_duration_ms,
            tools: self.tools.clone(),
            ..Default::default()
        }
    }
}

/// Public key resolving to an assistant.
#[derive(Debug, Clone, Deserialize)]
pub struct WidgetKey {
    pub key: String,
    pub assistant_uid: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Whether an identifier names a widget key rather than an assistant.
pub fn is_widget_key(identifier: &str) -> bool {
    identifier.starts_with(WIDGET_KEY_PREFIX)
}

// =============================================================================
// Traits
// =============================================================================

/// Assistant lookup.
#[async_trait]
pub trait AssistantDirectory: Send + Sync {
    async fn find_by_uid(&self, uid: &str) -> Option<AssistantProfile>;

    /// Resolve an active widget key.
    async fn find_by_widget_key(&self, key: &str) -> Option<AssistantProfile>;
}

/// Summary of a call as first seen.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub channel_id: String,
    pub caller_number: Option<String>,
    pub assistant_uid: String,
    pub assistant_name: String,
    pub started_at: Option<String>,
}

/// Call detail record persistence.
#[async_trait]
pub trait CdrStore: Send + Sync {
    async fn create(&self, record: CallRecord);
    async fn append_transcript(&self, channel_id: &str, speaker: &str, text: &str);
    async fn hangup(&self, channel_id: &str);
}

/// Token accounting per call.
#[async_trait]
pub trait BillingLedger: Send + Sync {
    async fn add_usage(&self, channel_id: &str, usage: &Usage);
    async fn finalize(&self, channel_id: &str);
}

/// Post-call analytics.
#[async_trait]
pub trait AnalyticsTrigger: Send + Sync {
    async fn trigger(&self, channel_id: &str);
}

/// Every collaborator a call needs.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn AssistantDirectory>,
    pub cdr: Arc<dyn CdrStore>,
    pub billing: Arc<dyn BillingLedger>,
    pub analytics: Arc<dyn AnalyticsTrigger>,
}

impl Collaborators {
    /// Given directory, with tracing-only record keeping.
    pub fn logging(directory: Arc<dyn AssistantDirectory>) -> Self {
        let log = Arc::new(LogRecorder);
        Self {
            directory,
            cdr: log.clone(),
            billing: log.clone(),
            analytics: log,
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

/// Directory backed by the assistants and widget keys of the configuration.
pub struct StaticAssistantDirectory {
    assistants: Vec<AssistantProfile>,
    widget_keys: Vec<WidgetKey>,
}

impl StaticAssistantDirectory {
    pub fn new(assistants: Vec<AssistantProfile>, widget_keys: Vec<WidgetKey>) -> Self {
        Self {
            assistants,
            widget_keys,
        }
    }
}

#[async_trait]
impl AssistantDirectory for StaticAssistantDirectory {
    async fn find_by_uid(&self, uid: &str) -> Option<AssistantProfile> {
        self.assistants.iter().find(|a| a.uid == uid).cloned()
    }

    async fn find_by_widget_key(&self, key: &str) -> Option<AssistantProfile> {
        let widget = self.widget_keys.iter().find(|w| w.key == key && w.active)?;
        self.find_by_uid(&widget.assistant_uid).await
    }
}

/// Writes records to the log only.
pub struct LogRecorder;

#[async_trait]
impl CdrStore for LogRecorder {
    async fn create(&self, record: CallRecord) {
        info!(
            channel_id = %record.channel_id,
            assistant = %record.assistant_name,
            caller = record.caller_number.as_deref().unwrap_or("unknown"),
            "CDR created"
        );
    }

    async fn append_transcript(&self, channel_id: &str, speaker: &str, text: &str) {
        info!(channel_id = %channel_id, speaker, "Transcript: {}", text);
    }

    async fn hangup(&self, channel_id: &str) {
        info!(channel_id = %channel_id, "CDR hangup");
    }
}

#[async_trait]
impl BillingLedger for LogRecorder {
    async fn add_usage(&self, channel_id: &str, usage: &Usage) {
        info!(
            channel_id = %channel_id,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Usage recorded"
        );
    }

    async fn finalize(&self, channel_id: &str) {
        info!(channel_id = %channel_id, "Billing finalized");
    }
}

#[async_trait]
impl AnalyticsTrigger for LogRecorder {
    async fn trigger(&self, channel_id: &str) {
        info!(channel_id = %channel_id, "Analytics requested");
    }
}
