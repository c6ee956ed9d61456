//! Error taxonomy shared by the call-session engine.
//!
//! Every per-call failure is expressed as a [`BridgeError`] so that the
//! connection manager can decide, per variant, whether to hang the caller up,
//! log and continue, or treat the condition as already handled.

use thiserror::Error;

use crate::core::dsp::DspError;
use crate::core::realtime::RealtimeError;

/// Errors produced by the PBX client, connection manager and call sessions.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed or unexpected inbound frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Control API or websocket failure
    #[error("Network error: {0}")]
    Network(String),

    /// Bridge/channel/playback already absent on the PBX side
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Missing external host, bot identifier or assistant
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Duplicate session start for an existing channel
    #[error("Concurrency violation: {0}")]
    ConcurrencyViolation(String),

    /// Local I/O failure (capture files, sockets)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec or container failure
    #[error("DSP error: {0}")]
    Dsp(#[from] DspError),

    /// Realtime AI client failure
    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),
}

impl BridgeError {
    /// True when the PBX reported the resource as already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::ResourceNotFound(_))
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Network(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Protocol(err.to_string())
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
