//! Realtime speech-AI WebSocket client.
//!
//! One client per call. The socket is owned by a spawned connection task that
//! multiplexes outbound [`ClientEvent`]s from an mpsc channel with inbound
//! frames, decoding the latter into [`RealtimeEvent`]s for the registered
//! callback.
//!
//! There is no reconnection: a dropped socket ends the call's AI leg and is
//! reported as [`RealtimeEvent::Closed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, error, info, trace, warn};

use super::base::{
    ConnectionState, RealtimeError, RealtimeEvent, RealtimeEventCallback, RealtimeResult,
};
use super::config::RealtimeSessionConfig;
use super::messages::{ClientEvent, ConversationItem};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `close()` waits for the connection task to send its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// =============================================================================
// Realtime Client
// =============================================================================

/// Realtime API client for one call.
///
/// All mutable state is behind `Arc` so the spawned connection task and the
/// owning session can share it. `connected` is an `AtomicBool` for lock-free
/// checks on the audio hot path.
pub struct RealtimeClient {
    config: RealtimeSessionConfig,
    /// Channel id, for log context
    label: String,
    state: Arc<RwLock<ConnectionState>>,
    connected: Arc<AtomicBool>,
    session_id: Arc<RwLock<Option<String>>>,
    ws_sender: Arc<Mutex<Option<mpsc::Sender<ClientEvent>>>>,
    event_callback: Arc<Mutex<Option<RealtimeEventCallback>>>,
    connection_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RealtimeClient {
    pub fn new(config: RealtimeSessionConfig, label: impl Into<String>) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }

        Ok(Self {
            config,
            label: label.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            session_id: Arc::new(RwLock::new(None)),
            ws_sender: Arc::new(Mutex::new(None)),
            event_callback: Arc::new(Mutex::new(None)),
            connection_handle: Arc::new(Mutex::new(None)),
        })
    }

    /// Session configuration in use.
    pub fn config(&self) -> &RealtimeSessionConfig {
        &self.config
    }

    /// Session id reported by the service, once created.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Whether the socket is open.
    pub fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Register the callback receiving every inbound event. Replaces any
    /// previous registration.
    pub async fn on_event(&self, callback: RealtimeEventCallback) {
        *self.event_callback.lock().await = Some(callback);
    }

    /// Open the socket and send the session configuration.
    pub async fn connect(&self) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        *self.state.write().await = ConnectionState::Connecting;

        let url = self.config.ws_url();
        let mut request = url.as_str().into_client_request().map_err(|e| {
            RealtimeError::InvalidConfiguration(format!("Invalid WebSocket URL: {}", e))
        })?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) = match tokio_tungstenite::connect_async(request).await {
            Ok(connected) => connected,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(RealtimeError::ConnectionFailed(e.to_string()));
            }
        };

        info!(channel_id = %self.label, model = %self.config.model, "Connected to realtime API");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock().await = Some(tx);

        let event_cb = self.event_callback.clone();
        let session_id = self.session_id.clone();
        let state = self.state.clone();
        let ws_sender = self.ws_sender.clone();
        let connected = self.connected.clone();
        let label = self.label.clone();

        self.connected.store(true, Ordering::SeqCst);
        *self.state.write().await = ConnectionState::Connected;

        let handle = tokio::spawn(async move {
            let mut closed_by_peer = false;

            loop {
                tokio::select! {
                    outbound = rx.recv() => {
                        let Some(event) = outbound else {
                            // every sender dropped: deliberate close
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };

                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                error!("Failed to serialize {}: {}", event.kind(), e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            error!(channel_id = %label, "Failed to send WebSocket message: {}", e);
                            closed_by_peer = true;
                            break;
                        }
                    }

                    inbound = ws_stream.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => {
                                match RealtimeEvent::decode(&text) {
                                    Ok(event) => {
                                        if let RealtimeEvent::SessionCreated { session_id: id } = &event {
                                            debug!(channel_id = %label, "Realtime session created: {}", id);
                                            *session_id.write().await = Some(id.clone());
                                        }
                                        let cb = event_cb.lock().await.clone();
                                        if let Some(cb) = cb {
                                            cb(event).await;
                                        }
                                    }
                                    Err(e) => {
                                        warn!(channel_id = %label, "Dropping malformed realtime frame: {}", e);
                                        trace!("Dropped frame: {}", text);
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!(channel_id = %label, "Realtime socket closed by server");
                                closed_by_peer = true;
                                break;
                            }
                            Some(Err(e)) => {
                                error!(channel_id = %label, "Realtime WebSocket error: {}", e);
                                closed_by_peer = true;
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }

            connected.store(false, Ordering::SeqCst);
            *state.write().await = ConnectionState::Disconnected;
            *ws_sender.lock().await = None;

            let cb = event_cb.lock().await.clone();
            if closed_by_peer && let Some(cb) = cb {
                cb(RealtimeEvent::Closed).await;
            }
            debug!(channel_id = %label, "Realtime connection task ended");
        });

        *self.connection_handle.lock().await = Some(handle);

        self.send(ClientEvent::SessionUpdate {
            session: self.config.session_update(),
        })
        .await
    }

    /// Send a frame. A no-op when the socket is not open.
    pub async fn send(&self, event: ClientEvent) -> RealtimeResult<()> {
        let sender = self.ws_sender.lock().await.clone();
        match sender {
            Some(sender) if self.is_ready() => sender
                .send(event)
                .await
                .map_err(|e| RealtimeError::WebSocketError(e.to_string())),
            _ => {
                trace!(channel_id = %self.label, "Realtime socket not open, dropping {}", event.kind());
                Ok(())
            }
        }
    }

    /// Append caller audio in the negotiated codec.
    pub async fn append_audio(&self, audio: &[u8]) -> RealtimeResult<()> {
        self.send(ClientEvent::audio_append(audio)).await
    }

    /// Ask the model to respond.
    pub async fn create_response(&self) -> RealtimeResult<()> {
        self.send(ClientEvent::ResponseCreate).await
    }

    /// Cancel the in-flight response.
    pub async fn cancel_response(&self) -> RealtimeResult<()> {
        self.send(ClientEvent::ResponseCancel).await
    }

    /// Add a user text message to the conversation.
    pub async fn send_text(&self, text: &str) -> RealtimeResult<()> {
        self.send(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        })
        .await
    }

    /// Report a function result back to the model.
    pub async fn submit_function_output(&self, call_id: &str, output: &str) -> RealtimeResult<()> {
        self.send(ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_call_output(call_id, output),
        })
        .await
    }

    /// Close the socket and drop the event callback.
    ///
    /// The callback is removed first so no `Closed` event is reported for a
    /// deliberate close. Safe to call more than once.
    pub async fn close(&self) {
        *self.event_callback.lock().await = None;
        *self.ws_sender.lock().await = None;

        if let Some(handle) = self.connection_handle.lock().await.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(CLOSE_GRACE, handle).await.is_err() {
                warn!(channel_id = %self.label, "Realtime connection task did not stop, aborting");
                abort.abort();
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.state.write().await = ConnectionState::Disconnected;
        *self.session_id.write().await = None;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RealtimeSessionConfig {
        RealtimeSessionConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_api_key_required() {
        let result = RealtimeClient::new(RealtimeSessionConfig::default(), "c1");
        assert!(matches!(result, Err(RealtimeError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_send_is_noop_when_closed() {
        let client = RealtimeClient::new(config(), "c1").unwrap();
        assert!(!client.is_ready());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(client.append_audio(&[0xD5; 160]).await.is_ok());
        assert!(client.create_response().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_without_connect() {
        let client = RealtimeClient::new(config(), "c1").unwrap();
        client.close().await;
        client.close().await;
        assert!(client.session_id().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_resets_state() {
        let client = RealtimeClient::new(
            RealtimeSessionConfig {
                url: "ws://127.0.0.1:1/v1/realtime".to_string(),
                ..config()
            },
            "c1",
        )
        .unwrap();
        let result = client.connect().await;
        assert!(matches!(result, Err(RealtimeError::ConnectionFailed(_))));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }
}
