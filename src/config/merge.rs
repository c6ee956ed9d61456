use std::path::PathBuf;

use super::env::load_from_env;
use super::yaml::YamlConfig;
use super::{DEFAULT_PBX_APP, PbxServerConfig, ServerConfig};

/// Environment first, then YAML values on top.
///
/// A YAML server list replaces the single environment server entirely.
pub(crate) fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, String> {
    let mut config = load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
    }

    if let Some(servers) = yaml.pbx.and_then(|pbx| pbx.servers) {
        config.pbx_servers = servers
            .into_iter()
            .enumerate()
            .map(|(index, server)| PbxServerConfig {
                name: server.name.unwrap_or_else(|| format!("pbx-{index}")),
                url: server.url.unwrap_or_default(),
                username: server.username.unwrap_or_default(),
                password: server.password.unwrap_or_default(),
                app: server.app.unwrap_or_else(|| DEFAULT_PBX_APP.to_string()),
            })
            .collect();
    }

    if let Some(media) = yaml.media {
        if media.external_host.is_some() {
            config.external_media_host = media.external_host;
        }
        if let Some(bind) = media.rtp_bind {
            config.rtp_bind = bind;
        }
        if let Some(dir) = media.recordings_dir {
            config.recordings_dir = Some(PathBuf::from(dir));
        }
        if let Some(frames) = media.max_catchup_frames {
            config.max_catchup_frames = frames;
        }
    }

    if let Some(realtime) = yaml.realtime {
        if realtime.api_key.is_some() {
            config.realtime_api_key = realtime.api_key;
        }
        if let Some(url) = realtime.url {
            config.realtime_url = url;
        }
    }

    if let Some(assistants) = yaml.assistants {
        config.assistants = assistants;
    }
    if let Some(widget_keys) = yaml.widget_keys {
        config.widget_keys = widget_keys;
    }

    Ok(config)
}
