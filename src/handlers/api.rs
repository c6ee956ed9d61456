use std::sync::Arc;

use axum::{Json, extract::State};
use serde::Serialize;
use serde_json::{Value, json};

use crate::state::{AppState, ServerStatus};

/// Health check endpoint
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub servers: Vec<ServerStatus>,
    pub active_sessions: usize,
    pub rtp_streams: usize,
}

/// Connection state and active-session count of every PBX server.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let servers = state.status();
    let active_sessions = servers.iter().map(|s| s.sessions).sum();
    Json(StatusResponse {
        servers,
        active_sessions,
        rtp_streams: state.transport.stream_count(),
    })
}
