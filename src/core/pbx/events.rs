//! PBX event stream decoding.
//!
//! The event socket delivers JSON objects tagged by `type`. Only the call
//! lifecycle and channel variable events are decoded; every other type
//! becomes [`PbxEvent::Unknown`].

use serde::Deserialize;

/// Variable carrying the PBX-side RTP address of an external media channel.
pub const RTP_ADDRESS_VARIABLE: &str = "UNICASTRTP_LOCAL_ADDRESS";

/// Variable carrying the PBX-side RTP port of an external media channel.
pub const RTP_PORT_VARIABLE: &str = "UNICASTRTP_LOCAL_PORT";

/// Channel name prefix of external media legs.
pub const SECONDARY_LEG_PREFIX: &str = "UnicastRTP/";

/// Channel name prefix of snoop (eavesdrop) legs.
pub const SNOOP_PREFIX: &str = "Snoop/";

/// Start argument marking channels the bridge created for itself.
pub const INTERNAL_MARKER: &str = "internal";

/// Channel id suffix of the external media leg of a call.
pub const MEDIA_CHANNEL_SUFFIX: &str = "-media";

/// Caller number as reported on a channel.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CallerId {
    pub name: String,
    pub number: String,
}

/// Dialplan location of a channel.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DialplanLocation {
    pub context: String,
    pub exten: String,
    pub priority: i64,
}

/// Point-in-time copy of a channel taken from an event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChannelSnapshot {
    pub id: String,
    pub name: String,
    pub state: String,
    pub caller: CallerId,
    pub dialplan: Option<DialplanLocation>,
    #[serde(rename = "creationtime")]
    pub creation_time: Option<String>,
}

impl ChannelSnapshot {
    pub fn caller_number(&self) -> Option<&str> {
        Some(self.caller.number.as_str()).filter(|n| !n.is_empty())
    }

    pub fn is_secondary_leg(&self) -> bool {
        self.name.starts_with(SECONDARY_LEG_PREFIX)
    }

    pub fn is_snoop(&self) -> bool {
        self.name.starts_with(SNOOP_PREFIX)
    }
}

/// Decoded event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum PbxEvent {
    /// A channel entered the application
    StasisStart {
        channel: ChannelSnapshot,
        #[serde(default)]
        args: Vec<String>,
    },
    /// A channel left the application
    StasisEnd { channel: ChannelSnapshot },
    /// A channel variable changed
    ChannelVarset {
        #[serde(default)]
        channel: Option<ChannelSnapshot>,
        variable: String,
        #[serde(default)]
        value: String,
    },
    #[serde(other)]
    Unknown,
}

impl PbxEvent {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Whether a variable name is one of the RTP negotiation variables.
pub fn is_rtp_variable(name: &str) -> bool {
    name == RTP_ADDRESS_VARIABLE || name == RTP_PORT_VARIABLE
}
