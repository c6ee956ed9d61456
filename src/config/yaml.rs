use serde::Deserialize;
use std::path::PathBuf;

use crate::collaborators::{AssistantProfile, WidgetKey};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// pbx:
///   servers:
///     - name: "main"
///       url: "http://pbx:8088/ari"
///       username: "bridge"
///       password: "secret"
///       app: "voxbridge"
///
/// media:
///   external_host: "203.0.113.7:40000"
///   rtp_bind: "0.0.0.0:40000"
///   recordings_dir: "/var/lib/voxbridge/recordings"
///   max_catchup_frames: 5
///
/// realtime:
///   api_key: "sk-..."
///   url: "wss://api.openai.com/v1/realtime"
///
/// assistants:
///   - uid: "a1b2c3"
///     name: "Reception"
///     voice: "coral"
///     instructions: "You answer the phone for ACME."
///     transcription_model: "whisper-1"
///     analytics_enabled: true
///     tools:
///       - name: "transfer_call"
///         description: "Transfer the caller to an extension"
///
/// widget_keys:
///   - key: "wk_public123"
///     assistant_uid: "a1b2c3"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub pbx: Option<PbxYaml>,
    pub media: Option<MediaYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub assistants: Option<Vec<AssistantProfile>>,
    pub widget_keys: Option<Vec<WidgetKey>>,
}

/// Status API listener from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// PBX servers from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PbxYaml {
    pub servers: Option<Vec<PbxServerYaml>>,
}

/// One PBX server from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PbxServerYaml {
    pub name: Option<String>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub app: Option<String>,
}

/// Media settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MediaYaml {
    pub external_host: Option<String>,
    pub rtp_bind: Option<String>,
    pub recordings_dir: Option<String>,
    pub max_catchup_frames: Option<u32>,
}

/// Realtime AI settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub api_key: Option<String>,
    pub url: Option<String>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
