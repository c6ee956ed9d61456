//! Inbound RTP.
//!
//! A single UDP socket receives the caller audio of every external-media
//! channel. Packets are routed by source `addr:port`, which is the address
//! the PBX reports for the channel in `UNICASTRTP_LOCAL_ADDRESS` /
//! `UNICASTRTP_LOCAL_PORT`. The same socket carries the outbound stream so
//! the PBX sees symmetric RTP.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::transport::RtpTransport;
use crate::core::dsp::strip_header;

/// Largest datagram accepted.
const MAX_DATAGRAM: usize = 2048;

/// Receives the codec payload of every inbound packet of one call.
pub type InboundAudioSink = Arc<dyn Fn(Bytes) + Send + Sync>;

struct Route {
    channel_id: String,
    sink: InboundAudioSink,
}

/// UDP listener demultiplexing caller audio to sessions.
pub struct RtpIngress {
    socket: Arc<UdpSocket>,
    routes: DashMap<SocketAddr, Route>,
    transport: Arc<RtpTransport>,
}

impl RtpIngress {
    pub fn new(socket: Arc<UdpSocket>, transport: Arc<RtpTransport>) -> Self {
        Self {
            socket,
            routes: DashMap::new(),
            transport,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Route packets from `source` to a call. Replaces any previous route
    /// for that source.
    pub fn register(&self, source: SocketAddr, channel_id: &str, sink: InboundAudioSink) {
        self.routes.insert(
            source,
            Route {
                channel_id: channel_id.to_string(),
                sink,
            },
        );
        debug!(channel_id = %channel_id, %source, "RTP ingress route registered");
    }

    /// Drop every route of a call.
    pub fn session_ended(&self, channel_id: &str) {
        self.routes.retain(|_, route| route.channel_id != channel_id);
        debug!(channel_id = %channel_id, "RTP ingress routes removed");
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Handle one datagram.
    pub fn dispatch(&self, packet: &[u8], source: SocketAddr) {
        let Some((channel_id, sink)) = self
            .routes
            .get(&source)
            .map(|route| (route.channel_id.clone(), route.sink.clone()))
        else {
            trace!(%source, "RTP from unknown source dropped");
            return;
        };

        match strip_header(packet, false) {
            Ok(payload) if !payload.is_empty() => {
                self.transport.record_inbound(&channel_id, &payload);
                sink(Bytes::from(payload));
            }
            Ok(_) => {}
            Err(e) => trace!(channel_id = %channel_id, "Malformed RTP dropped: {}", e),
        }
    }

    /// Receive until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        if let Ok(addr) = self.local_addr() {
            info!("RTP ingress listening on {}", addr);
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, source)) => self.dispatch(&buf[..len], source),
                    Err(e) => warn!("RTP ingress receive failed: {}", e),
                },
            }
        }
        info!("RTP ingress stopped");
    }
}
