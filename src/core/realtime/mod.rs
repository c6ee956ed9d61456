//! Realtime speech-AI client.
//!
//! One WebSocket per call, carrying G.711 A-law in both directions so the
//! RTP leg needs no transcoding.
//!
//! # Architecture
//!
//! - `config`: model/voice/modality selection and the `session.update` builder
//! - `messages`: wire-level client and server events
//! - `base`: errors and the closed [`RealtimeEvent`] set consumers match on
//! - `client`: [`RealtimeClient`], the socket owner
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voxbridge::core::realtime::{RealtimeClient, RealtimeSessionConfig};
//!
//! let client = RealtimeClient::new(RealtimeSessionConfig {
//!     api_key: "sk-...".to_string(),
//!     ..Default::default()
//! }, "channel-1")?;
//! client.on_event(Arc::new(|event| Box::pin(async move {
//!     println!("{}", event.name());
//! }))).await;
//! client.connect().await?;
//! ```

mod base;
mod client;
pub mod config;
pub mod messages;

pub use base::{
    ConnectionState, FunctionCallRequest, RealtimeError, RealtimeEvent, RealtimeEventCallback,
    RealtimeResult,
};
pub use client::RealtimeClient;
pub use config::{
    DEFAULT_REALTIME_URL, Modality, RealtimeAudioFormat, RealtimeModel, RealtimeSessionConfig,
    RealtimeVoice, ToolDefinition,
};
pub use messages::{ClientEvent, Usage};
