//! Process-wide state shared by the HTTP surface and the call engine.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ServerConfig;
use crate::collaborators::{Collaborators, StaticAssistantDirectory};
use crate::core::pbx::{ConnectionManager, ManagerState};
use crate::core::rtp::{RtpIngress, RtpTransport, TransportConfig, UdpPacketSender};
use crate::core::session::SessionContext;
use crate::errors::BridgeResult;

/// Connection summary of one PBX server, as served by `/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub state: ManagerState,
    pub sessions: usize,
}

/// Application state shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    pub managers: Vec<Arc<ConnectionManager>>,
    pub transport: Arc<RtpTransport>,
    pub ingress: Arc<RtpIngress>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Bind the RTP socket, start the ingress listener and build one
    /// connection manager per configured PBX server. Nothing connects yet.
    pub async fn new(config: ServerConfig) -> BridgeResult<Arc<Self>> {
        let collaborators = Collaborators::logging(Arc::new(StaticAssistantDirectory::new(
            config.assistants.clone(),
            config.widget_keys.clone(),
        )));
        Self::with_collaborators(config, collaborators).await
    }

    pub async fn with_collaborators(
        config: ServerConfig,
        collaborators: Collaborators,
    ) -> BridgeResult<Arc<Self>> {
        let socket = Arc::new(UdpSocket::bind(config.rtp_bind.as_str()).await?);
        let rtp_addr = socket.local_addr()?;

        let transport = Arc::new(RtpTransport::new(
            Arc::new(UdpPacketSender::new(socket.clone())),
            TransportConfig {
                recordings_dir: config.recordings_dir.clone(),
                max_catchup_frames: config.max_catchup_frames,
            },
        ));
        let ingress = Arc::new(RtpIngress::new(socket, transport.clone()));
        let shutdown = CancellationToken::new();
        tokio::spawn(ingress.clone().run(shutdown.child_token()));
        info!("RTP socket bound on {}", rtp_addr);

        if config.external_media_host.is_none() {
            warn!("EXTERNAL_MEDIA_HOST not set; every call will be rejected");
        }

        let ctx = Arc::new(SessionContext {
            transport: transport.clone(),
            ingress: ingress.clone(),
            collaborators,
            external_host: config.external_media_host.clone(),
            realtime_api_key: config.realtime_api_key.clone(),
            realtime_url: config.realtime_url.clone(),
        });

        let managers = config
            .pbx_servers
            .iter()
            .map(|server| ConnectionManager::new(server, ctx.clone()))
            .collect::<BridgeResult<Vec<_>>>()?;

        Ok(Arc::new(Self {
            config,
            managers,
            transport,
            ingress,
            shutdown,
        }))
    }

    /// Connect every manager. A server that is down at startup keeps
    /// retrying in the background.
    pub async fn connect_all(&self) {
        for manager in &self.managers {
            if let Err(e) = manager.connect().await {
                warn!(
                    server = %manager.name(),
                    "Initial PBX connection failed, retrying in background: {}",
                    e
                );
                manager.start();
            }
        }
    }

    pub fn rtp_local_addr(&self) -> std::io::Result<SocketAddr> {
        self.ingress.local_addr()
    }

    pub fn status(&self) -> Vec<ServerStatus> {
        self.managers
            .iter()
            .map(|m| ServerStatus {
                name: m.name().to_string(),
                state: m.state(),
                sessions: m.session_count(),
            })
            .collect()
    }

    /// Tear down every call and stop the RTP listener.
    pub async fn shutdown(&self) {
        for manager in &self.managers {
            manager.disconnect().await;
        }
        self.shutdown.cancel();
    }
}
