//! PBX control API client.
//!
//! Thin wrapper over the REST control surface: bridges, channels, playbacks
//! and external media. One instance serves every session of one PBX server.
//! Calls use a fixed 10 second timeout and are never retried; the caller
//! decides what a failure means.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::events::ChannelSnapshot;
use crate::config::PbxServerConfig;
use crate::errors::{BridgeError, BridgeResult};

/// Client-side timeout of every control request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A mixing bridge.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Bridge {
    pub id: String,
    pub bridge_type: String,
    pub channels: Vec<String>,
}

/// A playback started on a channel.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Playback {
    pub id: String,
    pub media_uri: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct Variable {
    #[serde(default)]
    value: String,
}

/// Parameters of an external media request.
#[derive(Debug, Clone)]
pub struct ExternalMediaRequest {
    /// Id to give the new channel
    pub channel_id: String,
    /// `host:port` the PBX sends RTP to
    pub external_host: String,
    /// Passed back as the start argument of the new channel
    pub data: String,
    pub format: String,
}

impl ExternalMediaRequest {
    /// A-law over RTP/UDP in both directions.
    pub fn alaw(channel_id: &str, external_host: &str, data: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            external_host: external_host.to_string(),
            data: data.to_string(),
            format: "alaw".to_string(),
        }
    }
}

/// PBX control API client.
#[derive(Clone)]
pub struct PbxClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    app: String,
}

impl PbxClient {
    pub fn new(config: &PbxServerConfig) -> BridgeResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| {
                BridgeError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            app: config.app.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    /// Event stream URL with the application subscription and credentials.
    pub fn events_url(&self) -> BridgeResult<String> {
        let mut url = url::Url::parse(&format!("{}/events", self.base_url))
            .map_err(|e| BridgeError::Configuration(format!("Invalid PBX URL: {e}")))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| BridgeError::Configuration("Cannot derive event URL".to_string()))?;
        url.query_pairs_mut()
            .append_pair("app", &self.app)
            .append_pair(
                "api_key",
                &format!("{}:{}", self.username, self.password),
            );
        Ok(url.to_string())
    }

    // =========================================================================
    // Bridges
    // =========================================================================

    pub async fn create_bridge(&self) -> BridgeResult<Bridge> {
        let request = self
            .request(Method::POST, "bridges")
            .query(&[("type", "mixing")]);
        self.json(request, "create bridge").await
    }

    pub async fn destroy_bridge(&self, bridge_id: &str) -> BridgeResult<()> {
        let request = self.request(Method::DELETE, &format!("bridges/{bridge_id}"));
        self.empty(request, "destroy bridge").await
    }

    pub async fn add_channel_to_bridge(&self, bridge_id: &str, channel_id: &str) -> BridgeResult<()> {
        let request = self
            .request(Method::POST, &format!("bridges/{bridge_id}/addChannel"))
            .query(&[("channel", channel_id)]);
        self.empty(request, "add channel to bridge").await
    }

    pub async fn remove_channel_from_bridge(
        &self,
        bridge_id: &str,
        channel_id: &str,
    ) -> BridgeResult<()> {
        let request = self
            .request(Method::POST, &format!("bridges/{bridge_id}/removeChannel"))
            .query(&[("channel", channel_id)]);
        self.empty(request, "remove channel from bridge").await
    }

    // =========================================================================
    // Channels
    // =========================================================================

    pub async fn create_channel(&self, endpoint: &str) -> BridgeResult<ChannelSnapshot> {
        let request = self
            .request(Method::POST, "channels/create")
            .query(&[("endpoint", endpoint), ("app", self.app.as_str())]);
        self.json(request, "create channel").await
    }

    pub async fn answer(&self, channel_id: &str) -> BridgeResult<()> {
        let request = self.request(Method::POST, &format!("channels/{channel_id}/answer"));
        self.empty(request, "answer channel").await
    }

    pub async fn hangup(&self, channel_id: &str, reason: &str) -> BridgeResult<()> {
        let request = self
            .request(Method::DELETE, &format!("channels/{channel_id}"))
            .query(&[("reason", reason)]);
        self.empty(request, "hang up channel").await
    }

    pub async fn redirect(&self, channel_id: &str, endpoint: &str) -> BridgeResult<()> {
        let request = self
            .request(Method::POST, &format!("channels/{channel_id}/redirect"))
            .query(&[("endpoint", endpoint)]);
        self.empty(request, "redirect channel").await
    }

    /// Leave the application and continue in the dialplan.
    pub async fn continue_in_dialplan(
        &self,
        channel_id: &str,
        context: &str,
        extension: &str,
        priority: i64,
    ) -> BridgeResult<()> {
        let priority = priority.to_string();
        let request = self
            .request(Method::POST, &format!("channels/{channel_id}/continue"))
            .query(&[
                ("context", context),
                ("extension", extension),
                ("priority", priority.as_str()),
            ]);
        self.empty(request, "continue in dialplan").await
    }

    pub async fn get_variable(&self, channel_id: &str, variable: &str) -> BridgeResult<String> {
        let request = self
            .request(Method::GET, &format!("channels/{channel_id}/variable"))
            .query(&[("variable", variable)]);
        let var: Variable = self.json(request, "get channel variable").await?;
        Ok(var.value)
    }

    pub async fn external_media(&self, params: &ExternalMediaRequest) -> BridgeResult<ChannelSnapshot> {
        let request = self.request(Method::POST, "channels/externalMedia").query(&[
            ("app", self.app.as_str()),
            ("external_host", params.external_host.as_str()),
            ("format", params.format.as_str()),
            ("encapsulation", "rtp"),
            ("transport", "udp"),
            ("direction", "both"),
            ("channelId", params.channel_id.as_str()),
            ("data", params.data.as_str()),
        ]);
        self.json(request, "create external media").await
    }

    // =========================================================================
    // Playback
    // =========================================================================

    pub async fn play(&self, channel_id: &str, media: &str) -> BridgeResult<Playback> {
        let request = self
            .request(Method::POST, &format!("channels/{channel_id}/play"))
            .query(&[("media", media)]);
        self.json(request, "start playback").await
    }

    pub async fn stop_playback(&self, playback_id: &str) -> BridgeResult<()> {
        let request = self.request(Method::DELETE, &format!("playbacks/{playback_id}"));
        self.empty(request, "stop playback").await
    }

    // =========================================================================
    // Server
    // =========================================================================

    pub async fn asterisk_info(&self) -> BridgeResult<serde_json::Value> {
        let request = self.request(Method::GET, "asterisk/info");
        self.json(request, "query server info").await
    }

    pub async fn endpoints(&self) -> BridgeResult<Vec<serde_json::Value>> {
        let request = self.request(Method::GET, "endpoints");
        self.json(request, "list endpoints").await
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> BridgeResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::Network(format!("{action}: request failed: {e}")))?;

        let status = response.status();
        debug!(status = %status, "PBX {}", action);
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            Err(BridgeError::ResourceNotFound(format!("{action}: {body}")))
        } else {
            Err(BridgeError::Network(format!("{action} failed ({status}): {body}")))
        }
    }

    async fn empty(&self, request: RequestBuilder, action: &str) -> BridgeResult<()> {
        self.send(request, action).await.map(|_| ())
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder, action: &str) -> BridgeResult<T> {
        let response = self.send(request, action).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BridgeError::Protocol(format!("{action}: invalid response: {e}")))
    }
}
