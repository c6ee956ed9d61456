//! Realtime protocol dispatch.
//!
//! Hands decoded realtime frames to the record-keeping collaborators: call
//! detail records, billing and post-call analytics. A call's lifecycle ends
//! with exactly one [`ProtocolDispatcher::hangup`], however often it is
//! requested.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, trace, warn};

use crate::collaborators::{AssistantProfile, CallRecord, Collaborators};
use crate::core::pbx::ChannelSnapshot;
use crate::core::realtime::RealtimeEvent;

pub struct ProtocolDispatcher {
    channel_id: String,
    assistant_uid: String,
    assistant_name: String,
    analytics_enabled: bool,
    collaborators: Collaborators,
    hung_up: AtomicBool,
}

impl ProtocolDispatcher {
    pub fn new(channel_id: &str, profile: &AssistantProfile, collaborators: Collaborators) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            assistant_uid: profile.uid.clone(),
            assistant_name: profile.name.clone(),
            analytics_enabled: profile.analytics_enabled,
            collaborators,
            hung_up: AtomicBool::new(false),
        }
    }

    /// Open the call detail record.
    pub async fn session_started(&self, channel: &ChannelSnapshot) {
        self.collaborators
            .cdr
            .create(CallRecord {
                channel_id: self.channel_id.clone(),
                caller_number: channel.caller_number().map(str::to_string),
                assistant_uid: self.assistant_uid.clone(),
                assistant_name: self.assistant_name.clone(),
                started_at: channel.creation_time.clone(),
            })
            .await;
    }

    pub async fn dispatch(&self, event: &RealtimeEvent) {
        let channel_id = self.channel_id.as_str();
        match event {
            RealtimeEvent::SessionCreated { session_id } => {
                info!(channel_id = %channel_id, "Realtime session {} created", session_id);
            }
            RealtimeEvent::ResponseDone {
                response_id,
                status,
                transcripts,
                usage,
            } => {
                debug!(channel_id = %channel_id, response_id = %response_id, "Response {}", status);
                for transcript in transcripts {
                    self.collaborators
                        .cdr
                        .append_transcript(channel_id, "assistant", transcript)
                        .await;
                }
                if let Some(usage) = usage {
                    self.collaborators.billing.add_usage(channel_id, usage).await;
                }
            }
            RealtimeEvent::InputTranscript { transcript, .. } => {
                self.collaborators
                    .cdr
                    .append_transcript(channel_id, "caller", transcript)
                    .await;
            }
            RealtimeEvent::FunctionCall(call) => {
                info!(channel_id = %channel_id, call_id = %call.call_id, "Function call: {}", call.name);
            }
            RealtimeEvent::FunctionCallOutput { call_id, output } => {
                debug!(channel_id = %channel_id, call_id = %call_id, "Function output: {}", output);
            }
            RealtimeEvent::Usage { rate_limits } => {
                for limit in rate_limits {
                    trace!(
                        channel_id = %channel_id,
                        name = %limit.name,
                        remaining = limit.remaining,
                        "Rate limit"
                    );
                }
            }
            RealtimeEvent::Error {
                error_type,
                message,
            } => {
                warn!(channel_id = %channel_id, "Realtime error ({}): {}", error_type, message);
            }
            RealtimeEvent::Closed => {
                debug!(channel_id = %channel_id, "Realtime socket closed");
            }
            RealtimeEvent::SpeechStarted { .. } | RealtimeEvent::AudioDelta { .. } => {}
            RealtimeEvent::Other(kind) => {
                trace!(channel_id = %channel_id, "Unhandled realtime event {}", kind);
            }
        }
    }

    /// Close the call's records. Runs once.
    pub async fn hangup(&self) {
        if self.hung_up.swap(true, Ordering::SeqCst) {
            return;
        }
        let channel_id = self.channel_id.as_str();
        self.collaborators.cdr.hangup(channel_id).await;
        self.collaborators.billing.finalize(channel_id).await;
        if self.analytics_enabled {
            self.collaborators.analytics.trigger(channel_id).await;
        }
    }

    pub fn is_hung_up(&self) -> bool {
        self.hung_up.load(Ordering::SeqCst)
    }
}
