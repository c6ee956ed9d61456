//! PBX control surface.
//!
//! - `client`: REST control API
//! - `events`: typed event stream decoding
//! - `registry`: session and secondary-leg maps
//! - `manager`: one [`ConnectionManager`] per PBX server

mod client;
mod events;
mod manager;
mod registry;

pub use client::{Bridge, ExternalMediaRequest, PbxClient, Playback, REQUEST_TIMEOUT};
pub use events::{
    CallerId, ChannelSnapshot, DialplanLocation, INTERNAL_MARKER, MEDIA_CHANNEL_SUFFIX, PbxEvent,
    RTP_ADDRESS_VARIABLE, RTP_PORT_VARIABLE, SECONDARY_LEG_PREFIX, SNOOP_PREFIX, is_rtp_variable,
};
pub use manager::{ConnectionManager, ManagerState, RECONNECT_DELAY};
pub use registry::{SessionRegistry, WeakLegMap};
