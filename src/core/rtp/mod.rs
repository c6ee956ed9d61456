//! RTP media path between the PBX and the realtime model.
//!
//! - `transport`: paced outbound stream per call
//! - `ingress`: inbound listener routing caller audio by source address

pub mod ingress;
pub mod transport;

pub use ingress::{InboundAudioSink, RtpIngress};
pub use transport::{
    FRAME_BYTES, FRAME_DURATION, PacketSender, RtpTransport, StreamSnapshot, TransportConfig,
    UdpPacketSender,
};
