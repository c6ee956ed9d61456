pub mod dsp;
pub mod pbx;
pub mod realtime;
pub mod rtp;
pub mod session;

// Re-export commonly used types for convenience
pub use pbx::{ConnectionManager, ManagerState, PbxClient, PbxEvent};
pub use realtime::{RealtimeClient, RealtimeError, RealtimeEvent, RealtimeResult};
pub use rtp::{RtpIngress, RtpTransport, TransportConfig, UdpPacketSender};
pub use session::{CallSession, SessionContext, SessionState};
