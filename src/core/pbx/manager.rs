//! Connection manager for one PBX server.
//!
//! Owns the control client, the event socket and the sessions of every call
//! on that server. Events are decoded at the socket and dispatched here;
//! session setup and teardown run on their own tasks so a slow call never
//! stalls the event stream.
//!
//! # States
//!
//! `Disconnected → Connecting → Connected`. When the socket drops the
//! manager goes back to `Disconnected` and retries every
//! [`RECONNECT_DELAY`] until [`ConnectionManager::disconnect`] is called or
//! the manager is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::client::PbxClient;
use super::events::{
    ChannelSnapshot, INTERNAL_MARKER, MEDIA_CHANNEL_SUFFIX, PbxEvent, is_rtp_variable,
};
use super::registry::{SessionRegistry, WeakLegMap};
use crate::collaborators::is_widget_key;
use crate::config::PbxServerConfig;
use crate::core::session::{CallSession, SessionContext};
use crate::errors::{BridgeError, BridgeResult};

/// Delay between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long `disconnect` waits for the event task to close the socket.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Hangup cause for calls the bridge refuses.
const REJECT_REASON: &str = "normal";

type EventStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state of one PBX server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Removes a session from the registry when dropped, so the entry goes even
/// if cleanup panics.
struct RegistryRemoval {
    registry: Arc<SessionRegistry>,
    session: Arc<CallSession>,
}

impl Drop for RegistryRemoval {
    fn drop(&mut self) {
        self.registry.remove_if_same(&self.session);
    }
}

pub struct ConnectionManager {
    name: String,
    client: PbxClient,
    ctx: Arc<SessionContext>,
    state: RwLock<ManagerState>,
    registry: Arc<SessionRegistry>,
    legs: Arc<WeakLegMap>,
    accepting: AtomicBool,
    shutdown: CancellationToken,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(config: &PbxServerConfig, ctx: Arc<SessionContext>) -> BridgeResult<Arc<Self>> {
        Ok(Arc::new(Self {
            name: config.name.clone(),
            client: PbxClient::new(config)?,
            ctx,
            state: RwLock::new(ManagerState::Disconnected),
            registry: Arc::new(SessionRegistry::new()),
            legs: Arc::new(WeakLegMap::new()),
            accepting: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            event_task: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    fn set_state(&self, state: ManagerState) {
        *self.state.write() = state;
        debug!(server = %self.name, state = ?state, "PBX connection state");
    }

    pub fn client(&self) -> &PbxClient {
        &self.client
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn legs(&self) -> &WeakLegMap {
        &self.legs
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect once and keep the event stream running, reconnecting on drop.
    ///
    /// A failed first attempt is returned and nothing is left running; use
    /// [`ConnectionManager::start`] to keep retrying instead.
    pub async fn connect(self: &Arc<Self>) -> BridgeResult<()> {
        let stream = self.open_event_stream().await?;
        self.spawn_event_task(Some(stream));
        Ok(())
    }

    /// Keep retrying in the background, every [`RECONNECT_DELAY`], until
    /// connected.
    pub fn start(self: &Arc<Self>) {
        self.spawn_event_task(None);
    }

    async fn open_event_stream(&self) -> BridgeResult<EventStream> {
        self.set_state(ManagerState::Connecting);

        let result = async {
            let info = self.client.asterisk_info().await?;
            let version = info
                .pointer("/system/version")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            debug!(server = %self.name, version, "PBX control API reachable");

            let url = self.client.events_url()?;
            let (stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
            Ok::<_, BridgeError>(stream)
        }
        .await;

        match result {
            Ok(stream) => {
                self.set_state(ManagerState::Connected);
                info!(server = %self.name, app = %self.client.app(), "Subscribed to PBX events");
                Ok(stream)
            }
            Err(e) => {
                self.set_state(ManagerState::Disconnected);
                Err(e)
            }
        }
    }

    fn spawn_event_task(self: &Arc<Self>, initial: Option<EventStream>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut next = initial;
            loop {
                if let Some(stream) = next.take() {
                    let Some(manager) = weak.upgrade() else {
                        break;
                    };
                    manager.pump_events(stream).await;
                    manager.set_state(ManagerState::Disconnected);
                }
                if shutdown.is_cancelled() {
                    break;
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }

                // manager dropped
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if shutdown.is_cancelled() {
                    break;
                }
                match manager.open_event_stream().await {
                    Ok(stream) => next = Some(stream),
                    Err(e) => warn!(server = %manager.name, "PBX reconnect failed: {}", e),
                }
            }
            debug!("PBX event task ended");
        });

        if let Some(previous) = self.event_task.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn pump_events(self: &Arc<Self>, mut stream: EventStream) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = stream.close(None).await;
                    break;
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => match PbxEvent::decode(&text) {
                        Ok(event) => self.handle_event(event),
                        Err(e) => {
                            warn!(server = %self.name, "Dropping malformed PBX event: {}", e);
                            trace!("Dropped event: {}", text);
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = stream.send(Message::Pong(data)).await {
                            error!(server = %self.name, "Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(server = %self.name, "PBX event socket closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(server = %self.name, "PBX event socket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Tear down every session, close the event socket and stop reconnecting.
    pub async fn disconnect(&self) {
        self.accepting.store(false, Ordering::SeqCst);

        for session in self.registry.drain() {
            self.legs.remove_for_primary(session.id());
            session.cleanup().await;
        }

        self.shutdown.cancel();
        let handle = self.event_task.lock().take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                abort.abort();
            }
        }

        self.legs.clear();
        self.set_state(ManagerState::Disconnected);
        info!(server = %self.name, "PBX connection closed");
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Route one event.
    ///
    /// Only bookkeeping runs inline. Anything that waits on the control API
    /// or the assistant directory runs on a task of its own.
    pub fn handle_event(self: &Arc<Self>, event: PbxEvent) {
        match event {
            PbxEvent::StasisStart { channel, args } => {
                if let Err(e) = self.on_session_start(channel, args) {
                    self.log_start_error(&e);
                }
            }
            PbxEvent::StasisEnd { channel } => self.on_session_end(&channel.id),
            PbxEvent::ChannelVarset {
                channel,
                variable,
                value,
            } => self.on_variable_set(channel.as_ref(), &variable, &value),
            PbxEvent::Unknown => {}
        }
    }

    fn log_start_error(&self, e: &BridgeError) {
        match e {
            BridgeError::ConcurrencyViolation(_) => debug!(server = %self.name, "{}", e),
            _ => warn!(server = %self.name, "Call rejected: {}", e),
        }
    }

    fn on_session_start(
        self: &Arc<Self>,
        channel: ChannelSnapshot,
        args: Vec<String>,
    ) -> BridgeResult<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.registry.contains(&channel.id) {
            return Err(BridgeError::ConcurrencyViolation(format!(
                "duplicate start for channel {}",
                channel.id
            )));
        }

        if channel.is_secondary_leg() {
            self.link_secondary_leg(&channel, &args);
            return Ok(());
        }
        if channel.is_snoop() || args.iter().any(|a| a == INTERNAL_MARKER) {
            trace!(channel_id = %channel.id, "Ignoring internal channel");
            return Ok(());
        }

        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.admit_call(channel, args).await {
                manager.log_start_error(&e);
            }
        });
        Ok(())
    }

    /// Resolve the assistant, register the session and run its setup. Calls
    /// that cannot be served are hung up.
    async fn admit_call(&self, channel: ChannelSnapshot, args: Vec<String>) -> BridgeResult<()> {
        let bot = args.first().filter(|a| !a.is_empty());
        let identifier = args.get(1).filter(|a| !a.is_empty());
        let (Some(bot), Some(identifier)) = (bot, identifier) else {
            return self
                .reject(
                    &channel.id,
                    BridgeError::Configuration(
                        "start event needs a bot and an assistant identifier".to_string(),
                    ),
                )
                .await;
        };

        let directory = &self.ctx.collaborators.directory;
        let profile = if is_widget_key(identifier) {
            directory.find_by_widget_key(identifier).await
        } else {
            directory.find_by_uid(identifier).await
        };
        let Some(profile) = profile else {
            return self
                .reject(
                    &channel.id,
                    BridgeError::Configuration(format!("no assistant for '{identifier}'")),
                )
                .await;
        };
        if self.ctx.external_host.is_none() {
            return self
                .reject(
                    &channel.id,
                    BridgeError::Configuration("no external media host configured".to_string()),
                )
                .await;
        }

        info!(
            server = %self.name,
            channel_id = %channel.id,
            bot = %bot,
            assistant = %profile.name,
            "Starting call session"
        );

        let session = CallSession::new(channel, profile, self.client.clone(), self.ctx.clone());
        if !self.registry.insert_if_absent(session.clone()) {
            return Err(BridgeError::ConcurrencyViolation(format!(
                "duplicate start for channel {}",
                session.id()
            )));
        }
        // disconnect may have drained the registry while the lookup ran
        if !self.accepting.load(Ordering::SeqCst) {
            self.registry.remove_if_same(&session);
            debug!(channel_id = %session.id(), "Manager closed during call setup");
            return Ok(());
        }

        if let Err(e) = session.init().await {
            error!(channel_id = %session.id(), "Call setup failed: {}", e);
            let _removal = RegistryRemoval {
                registry: self.registry.clone(),
                session: session.clone(),
            };
            self.legs.remove_for_primary(session.id());
            if let Err(e) = session.hangup_call().await {
                warn!(channel_id = %session.id(), "Failed to hang up: {}", e);
            }
            session.cleanup().await;
        }
        Ok(())
    }

    /// Link an external media leg to its call. The leg's first start
    /// argument names the primary channel; the id suffix is the fallback.
    fn link_secondary_leg(&self, channel: &ChannelSnapshot, args: &[String]) {
        let primary = args
            .first()
            .filter(|id| self.registry.contains(id.as_str()))
            .cloned()
            .or_else(|| {
                channel
                    .id
                    .strip_suffix(MEDIA_CHANNEL_SUFFIX)
                    .filter(|id| self.registry.contains(id))
                    .map(str::to_string)
            });

        match primary {
            Some(primary) => {
                self.legs.link(&channel.id, &primary);
                debug!(channel_id = %primary, leg = %channel.id, "Secondary leg linked");
            }
            None => debug!(leg = %channel.id, "Secondary leg without a session"),
        }
    }

    async fn reject(&self, channel_id: &str, reason: BridgeError) -> BridgeResult<()> {
        if let Err(e) = self.client.hangup(channel_id, REJECT_REASON).await
            && !e.is_not_found()
        {
            warn!(channel_id = %channel_id, "Failed to hang up rejected call: {}", e);
        }
        Err(reason)
    }

    fn on_session_end(&self, channel_id: &str) {
        if let Some(primary) = self.legs.remove_leg(channel_id) {
            trace!(channel_id = %primary, leg = %channel_id, "Secondary leg ended");
            return;
        }
        let Some(session) = self.registry.get(channel_id) else {
            return;
        };
        self.legs.remove_for_primary(channel_id);

        let removal = RegistryRemoval {
            registry: self.registry.clone(),
            session,
        };
        tokio::spawn(async move {
            removal.session.cleanup().await;
            drop(removal);
        });
    }

    fn on_variable_set(&self, channel: Option<&ChannelSnapshot>, variable: &str, value: &str) {
        if !is_rtp_variable(variable) {
            return;
        }
        let Some(channel) = channel else {
            return;
        };
        let session = self.registry.get(&channel.id).or_else(|| {
            self.legs
                .primary_of(&channel.id)
                .and_then(|primary| self.registry.get(&primary))
        });
        match session {
            Some(session) => session.update_rtp_parameter(variable, value),
            None => trace!(channel_id = %channel.id, "{} for unknown channel", variable),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        AssistantDirectory, AssistantProfile, Collaborators, LogRecorder,
        StaticAssistantDirectory, WidgetKey,
    };
    use crate::core::pbx::RTP_PORT_VARIABLE;
    use crate::core::rtp::{RtpIngress, RtpTransport, TransportConfig, UdpPacketSender};
    use tokio::net::UdpSocket;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn manager(server: &MockServer, external_host: Option<&str>) -> Arc<ConnectionManager> {
        let directory = Arc::new(StaticAssistantDirectory::new(
            vec![AssistantProfile::named("a1", "Bot1")],
            vec![WidgetKey {
                key: "wk_XYZ".to_string(),
                assistant_uid: "a1".to_string(),
                active: true,
            }],
        ));
        manager_with(server, external_host, directory).await
    }

    async fn manager_with(
        server: &MockServer,
        external_host: Option<&str>,
        directory: Arc<dyn AssistantDirectory>,
    ) -> Arc<ConnectionManager> {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let transport = Arc::new(RtpTransport::new(
            Arc::new(UdpPacketSender::new(socket.clone())),
            TransportConfig::default(),
        ));
        let ingress = Arc::new(RtpIngress::new(socket, transport.clone()));
        let log = Arc::new(LogRecorder);
        let ctx = Arc::new(SessionContext {
            transport,
            ingress,
            collaborators: Collaborators {
                directory,
                cdr: log.clone(),
                billing: log.clone(),
                analytics: log,
            },
            external_host: external_host.map(str::to_string),
            realtime_api_key: Some("sk-test".to_string()),
            realtime_url: "ws://127.0.0.1:1/v1/realtime".to_string(),
        });
        ConnectionManager::new(
            &PbxServerConfig {
                name: "test".to_string(),
                url: format!("{}/ari", server.uri()),
                username: "u".to_string(),
                password: "p".to_string(),
                app: "voxbridge".to_string(),
            },
            ctx,
        )
        .unwrap()
    }

    fn channel(id: &str, name: &str) -> ChannelSnapshot {
        ChannelSnapshot {
            id: id.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn start(id: &str, name: &str, args: &[&str]) -> PbxEvent {
        PbxEvent::StasisStart {
            channel: channel(id, name),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn registered(manager: &Arc<ConnectionManager>, id: &str) -> Arc<CallSession> {
        let session = CallSession::new(
            channel(id, "PJSIP/trunk-1"),
            AssistantProfile::named("a1", "Bot1"),
            manager.client.clone(),
            manager.ctx.clone(),
        );
        assert!(manager.registry.insert_if_absent(session.clone()));
        session
    }

    async fn mount_hangup(server: &MockServer, id: &str, times: u64) {
        Mock::given(method("DELETE"))
            .and(path(format!("/ari/channels/{id}")))
            .respond_with(ResponseTemplate::new(204))
            .expect(times)
            .mount(server)
            .await;
    }

    async fn hangups(server: &MockServer, id: &str) -> usize {
        let target = format!("/ari/channels/{id}");
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == "DELETE" && r.url.path() == target)
            .count()
    }

    async fn wait_for_hangup(server: &MockServer, id: &str) {
        for _ in 0..200 {
            if hangups(server, id).await > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("channel {id} was never hung up");
    }

    #[tokio::test]
    async fn test_widget_key_without_external_host_hangs_up() {
        let server = MockServer::start().await;
        let manager = manager(&server, None).await;
        mount_hangup(&server, "c1", 1).await;

        manager.handle_event(start("c1", "PJSIP/trunk-1", &["bot", "wk_XYZ"]));

        wait_for_hangup(&server, "c1").await;
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_identifier_hangs_up() {
        let server = MockServer::start().await;
        let manager = manager(&server, Some("127.0.0.1:40000")).await;
        mount_hangup(&server, "c1", 1).await;

        manager.handle_event(start("c1", "PJSIP/trunk-1", &["bot"]));
        wait_for_hangup(&server, "c1").await;
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_assistant_hangs_up() {
        let server = MockServer::start().await;
        let manager = manager(&server, Some("127.0.0.1:40000")).await;
        mount_hangup(&server, "c1", 1).await;

        manager.handle_event(start("c1", "PJSIP/trunk-1", &["bot", "nobody"]));
        wait_for_hangup(&server, "c1").await;
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_start_keeps_existing_session() {
        let server = MockServer::start().await;
        let manager = manager(&server, Some("127.0.0.1:40000")).await;
        let existing = registered(&manager, "c1");

        manager.handle_event(start("c1", "PJSIP/trunk-1", &["bot", "a1"]));

        assert_eq!(manager.session_count(), 1);
        assert!(Arc::ptr_eq(&manager.registry.get("c1").unwrap(), &existing));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_secondary_leg_links_to_primary() {
        let server = MockServer::start().await;
        let manager = manager(&server, Some("127.0.0.1:40000")).await;
        registered(&manager, "c1");

        manager.handle_event(start("c1-media", "UnicastRTP/127.0.0.1:40000-0x1", &["c1"]));

        assert_eq!(manager.session_count(), 1);
        assert_eq!(manager.legs.len(), 1);
        assert_eq!(manager.legs.primary_of("c1-media").as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_snoop_and_internal_ignored() {
        let server = MockServer::start().await;
        let manager = manager(&server, Some("127.0.0.1:40000")).await;

        manager.handle_event(start("s1", "Snoop/c1-00000001", &["bot", "a1"]));
        manager.handle_event(start("i1", "Local/100@internal", &["internal"]));

        assert_eq!(manager.session_count(), 0);
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_varset_routes_through_leg_map() {
        let server = MockServer::start().await;
        let manager = manager(&server, Some("127.0.0.1:40000")).await;
        let session = registered(&manager, "c1");
        manager.legs.link("c1-media", "c1");

        for (variable, value) in [
            (crate::core::pbx::RTP_ADDRESS_VARIABLE, "10.0.0.5"),
            (RTP_PORT_VARIABLE, "17000"),
        ] {
            manager.handle_event(PbxEvent::ChannelVarset {
                channel: Some(channel("c1-media", "UnicastRTP/x")),
                variable: variable.to_string(),
                value: value.to_string(),
            });
        }

        assert_eq!(session.rtp_destination(), Some("10.0.0.5:17000".parse().unwrap()));
        assert!(manager.ctx.transport.has_stream("c1"));
    }

    #[tokio::test]
    async fn test_session_end_always_unregisters() {
        let server = MockServer::start().await;
        let manager = manager(&server, Some("127.0.0.1:40000")).await;
        registered(&manager, "c1");
        manager.legs.link("c1-media", "c1");

        manager.handle_event(PbxEvent::StasisEnd {
            channel: channel("c1", "PJSIP/trunk-1"),
        });

        for _ in 0..100 {
            if manager.session_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.session_count(), 0);
        assert!(manager.legs.is_empty());
    }

    #[tokio::test]
    async fn test_failed_setup_hangs_up_and_unregisters() {
        let server = MockServer::start().await;
        let manager = manager(&server, Some("127.0.0.1:40000")).await;
        Mock::given(method("POST"))
            .and(path("/ari/bridges"))
            .and(query_param("type", "mixing"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_hangup(&server, "c1", 1).await;

        manager.handle_event(start("c1", "PJSIP/trunk-1", &["bot", "a1"]));

        wait_for_hangup(&server, "c1").await;
        for _ in 0..100 {
            if manager.session_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_fails_when_control_api_unreachable() {
        let server = MockServer::start().await;
        let manager = manager(&server, None).await;
        Mock::given(method("GET"))
            .and(path("/ari/asterisk/info"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = manager.connect().await;
        assert!(matches!(result, Err(BridgeError::Network(_))));
        assert_eq!(manager.state(), ManagerState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up_sessions() {
        let server = MockServer::start().await;
        let manager = manager(&server, Some("127.0.0.1:40000")).await;
        let session = registered(&manager, "c1");

        manager.disconnect().await;

        assert_eq!(manager.session_count(), 0);
        assert_eq!(session.state(), crate::core::session::SessionState::Terminated);

        // torn down: new calls are ignored
        manager.handle_event(start("c2", "PJSIP/trunk-2", &["bot", "a1"]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.session_count(), 0);
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_slow_rejection_does_not_hold_up_other_calls() {
        let server = MockServer::start().await;
        let manager = manager(&server, None).await;
        Mock::given(method("DELETE"))
            .and(path("/ari/channels/c1"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;
        registered(&manager, "c2");

        let started = std::time::Instant::now();
        manager.handle_event(start("c1", "PJSIP/trunk-1", &["bot", "a1"]));
        manager.handle_event(PbxEvent::StasisEnd {
            channel: channel("c2", "PJSIP/trunk-2"),
        });

        for _ in 0..100 {
            if manager.session_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.session_count(), 0);
        // the rejected call's hangup is still in flight
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    /// Directory whose lookups wait until released.
    struct GatedDirectory {
        gate: tokio::sync::Notify,
        inner: StaticAssistantDirectory,
    }

    #[async_trait::async_trait]
    impl AssistantDirectory for GatedDirectory {
        async fn find_by_uid(&self, uid: &str) -> Option<AssistantProfile> {
            self.gate.notified().await;
            self.inner.find_by_uid(uid).await
        }

        async fn find_by_widget_key(&self, key: &str) -> Option<AssistantProfile> {
            self.gate.notified().await;
            self.inner.find_by_widget_key(key).await
        }
    }

    #[tokio::test]
    async fn test_call_admitted_during_disconnect_is_not_left_behind() {
        let server = MockServer::start().await;
        let directory = Arc::new(GatedDirectory {
            gate: tokio::sync::Notify::new(),
            inner: StaticAssistantDirectory::new(
                vec![AssistantProfile::named("a1", "Bot1")],
                vec![],
            ),
        });
        let manager = manager_with(&server, Some("127.0.0.1:40000"), directory.clone()).await;

        manager.handle_event(start("c1", "PJSIP/trunk-1", &["bot", "a1"]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.disconnect().await;
        directory.gate.notify_one();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.session_count(), 0);
        // setup never started against the control API
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
