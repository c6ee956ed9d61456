//! HTTP request handlers
//!
//! - `api` - health check and PBX connection status

pub mod api;

pub use api::{health_check, status};
