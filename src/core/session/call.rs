//! One call from first event to teardown.
//!
//! A [`CallSession`] owns the PBX-side bridge and external media channel of a
//! call, its realtime AI client and its RTP stream. It is created by the
//! connection manager on a start event, initialised once, and cleaned up
//! once the call ends; cleanup may be requested any number of times.
//!
//! # States
//!
//! `Init → BridgeCreated → ExternalMediaPending → Streaming → Cleanup → Terminated`

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dispatcher::ProtocolDispatcher;
use super::events::{SessionBus, SessionEvent, TransferRequest};
use crate::collaborators::{AssistantProfile, Collaborators};
use crate::core::pbx::{
    ChannelSnapshot, ExternalMediaRequest, MEDIA_CHANNEL_SUFFIX, PbxClient, RTP_ADDRESS_VARIABLE,
    RTP_PORT_VARIABLE,
};
use crate::core::realtime::{
    FunctionCallRequest, RealtimeClient, RealtimeEvent, RealtimeEventCallback,
};
use crate::core::rtp::{InboundAudioSink, RtpIngress, RtpTransport};
use crate::errors::{BridgeError, BridgeResult};

/// Played on the caller's channel to open early media.
pub const SILENCE_MEDIA: &str = "sound:silence/1";

/// Dialplan context used when a transfer names none.
pub const DEFAULT_TRANSFER_CONTEXT: &str = "from-internal";

/// Dialplan priority used when a transfer names none.
pub const DEFAULT_TRANSFER_PRIORITY: i64 = 1;

/// Hangup cause sent to the PBX.
const HANGUP_REASON: &str = "normal";

/// Process-wide dependencies shared by every session.
pub struct SessionContext {
    pub transport: Arc<RtpTransport>,
    pub ingress: Arc<RtpIngress>,
    pub collaborators: Collaborators,
    /// `host:port` the PBX sends external media to
    pub external_host: Option<String>,
    pub realtime_api_key: Option<String>,
    pub realtime_url: String,
}

/// Lifecycle state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    BridgeCreated,
    ExternalMediaPending,
    Streaming,
    Cleanup,
    Terminated,
}

/// PBX and AI handles, each released by exactly one cleanup step.
#[derive(Default)]
struct Resources {
    channel_id: Option<String>,
    bridge_id: Option<String>,
    media_channel_id: Option<String>,
    realtime: Option<Arc<RealtimeClient>>,
    event_loop: Option<JoinHandle<()>>,
}

/// RTP address negotiation and the media registrations it produced.
#[derive(Default)]
struct MediaState {
    address: Option<IpAddr>,
    port: Option<u16>,
    destination: Option<SocketAddr>,
    stream_added: bool,
    ingress_registered: bool,
    closed: bool,
}

pub struct CallSession {
    id: String,
    channel: ChannelSnapshot,
    profile: AssistantProfile,
    pbx: PbxClient,
    ctx: Arc<SessionContext>,
    dispatcher: ProtocolDispatcher,
    bus: SessionBus,
    state: Mutex<SessionState>,
    resources: Mutex<Resources>,
    media: Mutex<MediaState>,
    /// Serialises init and cleanup
    lifecycle: tokio::sync::Mutex<()>,
}

impl CallSession {
    /// Create a session and subscribe its event loop.
    pub fn new(
        channel: ChannelSnapshot,
        profile: AssistantProfile,
        pbx: PbxClient,
        ctx: Arc<SessionContext>,
    ) -> Arc<Self> {
        let id = channel.id.clone();
        let (bus, rx) = SessionBus::new(&id);
        let dispatcher = ProtocolDispatcher::new(&id, &profile, ctx.collaborators.clone());

        let session = Arc::new(Self {
            resources: Mutex::new(Resources {
                channel_id: Some(id.clone()),
                ..Default::default()
            }),
            id,
            channel,
            profile,
            pbx,
            ctx,
            dispatcher,
            bus,
            state: Mutex::new(SessionState::Init),
            media: Mutex::new(MediaState::default()),
            lifecycle: tokio::sync::Mutex::new(()),
        });

        let handle = tokio::spawn(run_event_loop(Arc::downgrade(&session), rx));
        session.resources.lock().event_loop = Some(handle);
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &ChannelSnapshot {
        &self.channel
    }

    pub fn profile(&self) -> &AssistantProfile {
        &self.profile
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
        debug!(channel_id = %self.id, state = ?state, "Session state");
    }

    /// Publishing side of this session's bus.
    pub fn bus(&self) -> &SessionBus {
        &self.bus
    }

    /// Destination negotiated for the RTP stream, once known.
    pub fn rtp_destination(&self) -> Option<SocketAddr> {
        self.media.lock().destination
    }

    fn realtime(&self) -> Option<Arc<RealtimeClient>> {
        self.resources.lock().realtime.clone()
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Set the call up: bridge, external media, RTP stream, realtime session
    /// and the assistant's greeting.
    ///
    /// Any failure is returned as-is; the caller hangs up and cleans up.
    pub async fn init(self: &Arc<Self>) -> BridgeResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() != SessionState::Init {
            return Err(BridgeError::ConcurrencyViolation(format!(
                "session {} already initialised",
                self.id
            )));
        }

        let external_host = self.ctx.external_host.clone().ok_or_else(|| {
            BridgeError::Configuration("no external media host configured".to_string())
        })?;
        let api_key = self
            .ctx
            .realtime_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                BridgeError::Configuration("no realtime API key configured".to_string())
            })?;

        self.dispatcher.session_started(&self.channel).await;

        let bridge = self.pbx.create_bridge().await?;
        info!(channel_id = %self.id, bridge_id = %bridge.id, "Bridge created");
        self.resources.lock().bridge_id = Some(bridge.id.clone());
        self.set_state(SessionState::BridgeCreated);

        self.pbx.add_channel_to_bridge(&bridge.id, &self.id).await?;

        let media_id = format!("{}{}", self.id, MEDIA_CHANNEL_SUFFIX);
        let media_channel = self
            .pbx
            .external_media(&ExternalMediaRequest::alaw(&media_id, &external_host, &self.id))
            .await?;
        self.resources.lock().media_channel_id = Some(media_channel.id.clone());
        self.set_state(SessionState::ExternalMediaPending);

        self.read_rtp_variables(&media_channel.id).await;

        self.pbx
            .add_channel_to_bridge(&bridge.id, &media_channel.id)
            .await?;

        if let Err(e) = self.pbx.play(&self.id, SILENCE_MEDIA).await {
            warn!(channel_id = %self.id, "Failed to play early-media silence: {}", e);
        }

        let client = Arc::new(RealtimeClient::new(
            self.profile
                .realtime_config(&api_key, &self.ctx.realtime_url),
            self.id.clone(),
        )?);
        let bus = self.bus.clone();
        let callback: RealtimeEventCallback = Arc::new(move |event: RealtimeEvent| {
            let bus = bus.clone();
            Box::pin(async move {
                for session_event in SessionEvent::from_realtime(event) {
                    bus.publish(session_event).await;
                }
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        client.on_event(callback).await;
        self.resources.lock().realtime = Some(client.clone());

        client.connect().await?;
        self.set_state(SessionState::Streaming);

        client.create_response().await?;
        info!(
            channel_id = %self.id,
            assistant = %self.profile.name,
            "Call session streaming"
        );
        Ok(())
    }

    /// Read the PBX-side RTP address of the external media channel. The
    /// variable-set events deliver the same values if they are not set yet.
    async fn read_rtp_variables(&self, media_channel_id: &str) {
        for variable in [RTP_ADDRESS_VARIABLE, RTP_PORT_VARIABLE] {
            match self.pbx.get_variable(media_channel_id, variable).await {
                Ok(value) if !value.is_empty() => self.update_rtp_parameter(variable, &value),
                Ok(_) => {}
                Err(e) => debug!(channel_id = %self.id, "{} not available yet: {}", variable, e),
            }
        }
    }

    /// Apply one RTP negotiation variable. Once both address and port are
    /// known the stream is registered with the transport and the ingress.
    pub fn update_rtp_parameter(&self, name: &str, value: &str) {
        let mut media = self.media.lock();
        if media.closed {
            return;
        }

        match name {
            RTP_ADDRESS_VARIABLE => match value.parse::<IpAddr>() {
                Ok(address) => media.address = Some(address),
                Err(_) => {
                    warn!(channel_id = %self.id, "Invalid RTP address: {}", value);
                    return;
                }
            },
            RTP_PORT_VARIABLE => match value.parse::<u16>() {
                Ok(port) => media.port = Some(port),
                Err(_) => {
                    warn!(channel_id = %self.id, "Invalid RTP port: {}", value);
                    return;
                }
            },
            _ => return,
        }

        let (Some(address), Some(port)) = (media.address, media.port) else {
            return;
        };
        let destination = SocketAddr::new(address, port);
        if media.destination == Some(destination) {
            return;
        }

        if let Some(previous) = media.destination.replace(destination) {
            debug!(channel_id = %self.id, %previous, "RTP destination changed");
            self.ctx.ingress.session_ended(&self.id);
        }
        self.ctx.transport.add_stream(&self.id, Some(destination));
        media.stream_added = true;

        let bus = self.bus.clone();
        let sink: InboundAudioSink = Arc::new(move |payload| {
            bus.try_publish(SessionEvent::InboundAudio(payload));
        });
        self.ctx.ingress.register(destination, &self.id, sink);
        media.ingress_registered = true;

        info!(channel_id = %self.id, %destination, "RTP media negotiated");
    }

    // =========================================================================
    // Call control
    // =========================================================================

    /// Send the caller to a dialplan extension.
    pub async fn redirect_to_dialplan(&self, request: TransferRequest) -> BridgeResult<()> {
        if request.extension.trim().is_empty() {
            return Err(BridgeError::Protocol(
                "transfer requires a target extension".to_string(),
            ));
        }
        let Some(channel_id) = self.resources.lock().channel_id.clone() else {
            info!(channel_id = %self.id, "No channel to transfer");
            return Ok(());
        };

        let context = request
            .context
            .as_deref()
            .unwrap_or(DEFAULT_TRANSFER_CONTEXT);
        let priority = request.priority.unwrap_or(DEFAULT_TRANSFER_PRIORITY);
        info!(
            channel_id = %self.id,
            "Transferring to {}@{},{}",
            request.extension,
            context,
            priority
        );
        self.pbx
            .continue_in_dialplan(&channel_id, context, &request.extension, priority)
            .await
    }

    /// Hang up the caller's channel.
    pub async fn hangup_call(&self) -> BridgeResult<()> {
        let Some(channel_id) = self.resources.lock().channel_id.clone() else {
            debug!(channel_id = %self.id, "No channel to hang up");
            return Ok(());
        };
        match self.pbx.hangup(&channel_id, HANGUP_REASON).await {
            Err(e) if e.is_not_found() => Ok(()),
            result => result,
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Release everything the call holds. Idempotent: each step is guarded by
    /// the presence of its resource and failures never stop later steps.
    pub async fn cleanup(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = self.state.lock();
            if *state == SessionState::Terminated {
                return;
            }
            *state = SessionState::Cleanup;
        }
        info!(channel_id = %self.id, "Cleaning up call session");

        let (bridge_id, media_channel_id, realtime) = {
            let mut resources = self.resources.lock();
            resources.channel_id = None;
            (
                resources.bridge_id.take(),
                resources.media_channel_id.take(),
                resources.realtime.take(),
            )
        };

        if let Some(bridge_id) = bridge_id
            && let Err(e) = self.pbx.destroy_bridge(&bridge_id).await
            && !e.is_not_found()
        {
            warn!(channel_id = %self.id, bridge_id = %bridge_id, "Failed to destroy bridge: {}", e);
        }

        if let Some(media_channel_id) = media_channel_id
            && let Err(e) = self.pbx.hangup(&media_channel_id, HANGUP_REASON).await
            && !e.is_not_found()
        {
            warn!(channel_id = %self.id, "Failed to hang up external media channel: {}", e);
        }

        self.dispatcher.hangup().await;

        self.bus.close();

        if let Some(client) = realtime {
            client.close().await;
        }

        let (stream_added, ingress_registered) = {
            let mut media = self.media.lock();
            media.closed = true;
            (
                std::mem::take(&mut media.stream_added),
                std::mem::take(&mut media.ingress_registered),
            )
        };
        if stream_added {
            // the mix task runs detached
            let _mix = self.ctx.transport.remove_stream(&self.id);
        }
        if ingress_registered {
            self.ctx.ingress.session_ended(&self.id);
        }

        self.set_state(SessionState::Terminated);
        info!(channel_id = %self.id, "Call session terminated");
    }

    // =========================================================================
    // Event handling
    // =========================================================================

    async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Protocol(event) => {
                self.dispatcher.dispatch(&event).await;
                if matches!(event, RealtimeEvent::Closed) {
                    warn!(channel_id = %self.id, "Realtime session lost, ending call");
                    if let Err(e) = self.hangup_call().await {
                        warn!(channel_id = %self.id, "Failed to hang up: {}", e);
                    }
                }
            }
            SessionEvent::AudioDelta(audio) => self.ctx.transport.stream_audio(&self.id, audio),
            SessionEvent::Interrupt => {
                debug!(channel_id = %self.id, "Barge-in");
                self.ctx.transport.interrupt_stream(&self.id);
            }
            SessionEvent::FunctionCall(call) => self.handle_function_call(call).await,
            SessionEvent::InboundAudio(audio) => {
                if let Some(client) = self.realtime()
                    && let Err(e) = client.append_audio(&audio).await
                {
                    debug!(channel_id = %self.id, "Failed to forward caller audio: {}", e);
                }
            }
            SessionEvent::Transfer(request) => {
                if let Err(e) = self.redirect_to_dialplan(request).await {
                    warn!(channel_id = %self.id, "Transfer failed: {}", e);
                }
            }
            SessionEvent::Hangup => {
                if let Err(e) = self.hangup_call().await {
                    warn!(channel_id = %self.id, "Hangup failed: {}", e);
                }
            }
        }
    }

    async fn handle_function_call(&self, call: FunctionCallRequest) {
        let Some(client) = self.realtime() else {
            return;
        };

        let (output, follow_up) = match call.name.as_str() {
            "transfer_call" => {
                match serde_json::from_value::<TransferRequest>(call.arguments_json()) {
                    Ok(request) if !request.extension.trim().is_empty() => (
                        json!({"status": "transferring", "extension": request.extension}),
                        FollowUp::Transfer(request),
                    ),
                    _ => (
                        json!({"error": "transfer_call requires an extension"}),
                        FollowUp::Respond,
                    ),
                }
            }
            "end_call" => (json!({"status": "ending call"}), FollowUp::Hangup),
            other => (
                json!({"error": format!("Unknown function: {other}")}),
                FollowUp::Respond,
            ),
        };

        if let Err(e) = client
            .submit_function_output(&call.call_id, &output.to_string())
            .await
        {
            warn!(channel_id = %self.id, "Failed to submit function output: {}", e);
        }

        // the model has been told the outcome, so the action runs here
        // rather than through the bus where it could be dropped
        match follow_up {
            FollowUp::Transfer(request) => {
                if let Err(e) = self.redirect_to_dialplan(request).await {
                    warn!(channel_id = %self.id, "Transfer failed: {}", e);
                }
            }
            FollowUp::Hangup => {
                if let Err(e) = self.hangup_call().await {
                    warn!(channel_id = %self.id, "Hangup failed: {}", e);
                }
            }
            FollowUp::Respond => {
                if let Err(e) = client.create_response().await {
                    warn!(channel_id = %self.id, "Failed to request response: {}", e);
                }
            }
        }
    }
}

/// What a function call leads to once its output is submitted.
enum FollowUp {
    Transfer(TransferRequest),
    Hangup,
    Respond,
}

async fn run_event_loop(session: Weak<CallSession>, mut rx: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        session.handle_event(event).await;
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if let Some(handle) = self.resources.get_mut().event_loop.take() {
            handle.abort();
        }
    }
}
