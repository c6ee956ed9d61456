use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the read-only status router
///
/// - `GET /` - health check
/// - `GET /status` - per-server connection state and session counts
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/status", get(api::status))
        .layer(TraceLayer::new_for_http())
}
