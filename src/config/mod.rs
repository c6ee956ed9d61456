//! Configuration module for the bridge.
//!
//! Configuration comes from `.env` files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voxbridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Status API on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::collaborators::{AssistantProfile, WidgetKey};
use crate::core::realtime::DEFAULT_REALTIME_URL;

/// Default Stasis application name.
pub const DEFAULT_PBX_APP: &str = "voxbridge";

/// Default bind address of the RTP socket.
pub const DEFAULT_RTP_BIND: &str = "0.0.0.0:40000";

/// One PBX server whose control API the bridge drives.
#[derive(Clone, PartialEq, Eq)]
pub struct PbxServerConfig {
    /// Name used in logs and on the status endpoint
    pub name: String,
    /// Control API base URL, e.g. `http://pbx:8088/ari`
    pub url: String,
    pub username: String,
    pub password: String,
    /// Application the event stream subscribes to
    pub app: String,
}

impl std::fmt::Debug for PbxServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PbxServerConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("app", &self.app)
            .finish()
    }
}

impl Drop for PbxServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.password.zeroize();
    }
}

/// Server configuration
///
/// Everything the bridge needs at runtime:
/// - Status API listener
/// - PBX servers to connect to
/// - Media settings (external host, RTP socket, recordings)
/// - Realtime AI credentials
/// - The static assistant directory
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Status API
    pub host: String,
    pub port: u16,

    pub pbx_servers: Vec<PbxServerConfig>,

    // Media
    /// `host:port` the PBX streams external media to
    pub external_media_host: Option<String>,
    pub rtp_bind: String,
    /// Where sidecar captures and mixed recordings go; `None` disables capture
    pub recordings_dir: Option<PathBuf>,
    pub max_catchup_frames: u32,

    // Realtime AI
    pub realtime_api_key: Option<String>,
    pub realtime_url: String,

    // Assistant directory
    pub assistants: Vec<AssistantProfile>,
    pub widget_keys: Vec<WidgetKey>,
}

/// Zeroize secrets when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.realtime_api_key {
            key.zeroize();
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            pbx_servers: Vec::new(),
            external_media_host: None,
            rtp_bind: DEFAULT_RTP_BIND.to_string(),
            recordings_dir: None,
            max_catchup_frames: crate::core::rtp::transport::DEFAULT_MAX_CATCHUP_FRAMES,
            realtime_api_key: None,
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            assistants: Vec::new(),
            widget_keys: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only.
    ///
    /// `.env` is loaded in `main` before this is called.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// Validation runs on the merged result.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validate(&config)?;
        Ok(config)
    }

    /// Status API address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn validate(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    validation::validate_pbx_servers(&config.pbx_servers)?;
    validation::validate_rtp_bind(&config.rtp_bind)?;
    validation::validate_widget_keys(&config.widget_keys, &config.assistants)?;
    Ok(())
}
