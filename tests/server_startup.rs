//! Server Startup Tests
//!
//! Application state construction and the read-only HTTP surface.

mod common;

use axum::{body::Body, http::Request};
use serde_json::Value;
use tower::util::ServiceExt;

use common::MockPbx;
use voxbridge::config::PbxServerConfig;
use voxbridge::core::pbx::ManagerState;
use voxbridge::{ServerConfig, routes, state::AppState};

/// Minimal configuration on loopback with an ephemeral RTP port
fn create_test_config(pbx_url: Option<String>) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.rtp_bind = "127.0.0.1:0".to_string();
    config.external_media_host = Some("127.0.0.1:40000".to_string());
    if let Some(url) = pbx_url {
        config.pbx_servers.push(PbxServerConfig {
            name: "main".to_string(),
            url,
            username: "bridge".to_string(),
            password: "secret".to_string(),
            app: "voxbridge".to_string(),
        });
    }
    config
}

async fn get_json(app: axum::Router, uri: &str) -> (axum::http::StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_minimal_config_boot() {
    let app_state = AppState::new(create_test_config(None)).await.unwrap();
    assert!(app_state.managers.is_empty());
    assert_ne!(app_state.rtp_local_addr().unwrap().port(), 0);

    let app = routes::api::create_api_router().with_state(app_state.clone());
    let (status, json) = get_json(app, "/").await;

    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(json["status"], "OK");
    app_state.shutdown().await;
}

#[tokio::test]
async fn test_rtp_bind_conflict_is_reported() {
    let first = AppState::new(create_test_config(None)).await.unwrap();
    let taken = first.rtp_local_addr().unwrap();

    let mut config = create_test_config(None);
    config.rtp_bind = taken.to_string();
    assert!(AppState::new(config).await.is_err());
    first.shutdown().await;
}

#[tokio::test]
async fn test_status_reports_each_server() {
    let pbx = MockPbx::start().await;
    let app_state = AppState::new(create_test_config(Some(pbx.url())))
        .await
        .unwrap();

    let app = routes::api::create_api_router().with_state(app_state.clone());
    let (_, before) = get_json(app.clone(), "/status").await;
    assert_eq!(before["servers"][0]["name"], "main");
    assert_eq!(before["servers"][0]["state"], "disconnected");

    app_state.connect_all().await;
    assert_eq!(app_state.managers[0].state(), ManagerState::Connected);

    let (status, after) = get_json(app, "/status").await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(after["servers"][0]["state"], "connected");
    assert_eq!(after["servers"][0]["sessions"], 0);
    assert_eq!(after["active_sessions"], 0);

    app_state.shutdown().await;
    assert_eq!(app_state.managers[0].state(), ManagerState::Disconnected);
}

#[tokio::test]
async fn test_unreachable_pbx_keeps_retrying_in_background() {
    let app_state = AppState::new(create_test_config(Some(
        "http://127.0.0.1:1/ari".to_string(),
    )))
    .await
    .unwrap();

    app_state.connect_all().await;
    assert_eq!(app_state.managers[0].state(), ManagerState::Disconnected);

    app_state.shutdown().await;
}
