use std::env;
use std::path::PathBuf;

use super::{DEFAULT_PBX_APP, PbxServerConfig, ServerConfig};

/// Read an environment variable, treating empty values as unset.
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("Invalid value for {name}: {raw}")),
        None => Ok(None),
    }
}

/// Build the configuration from environment variables over defaults.
///
/// Only the single-server PBX form is available from the environment;
/// several servers need the YAML file.
pub(crate) fn load_from_env() -> Result<ServerConfig, String> {
    let mut config = ServerConfig::default();

    if let Some(host) = var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse_var::<u16>("PORT")? {
        config.port = port;
    }

    if let Some(url) = var("PBX_URL") {
        config.pbx_servers.push(PbxServerConfig {
            name: "default".to_string(),
            url,
            username: var("PBX_USERNAME").unwrap_or_default(),
            password: var("PBX_PASSWORD").unwrap_or_default(),
            app: var("PBX_APP").unwrap_or_else(|| DEFAULT_PBX_APP.to_string()),
        });
    }

    config.external_media_host = var("EXTERNAL_MEDIA_HOST");
    if let Some(bind) = var("RTP_BIND_ADDRESS") {
        config.rtp_bind = bind;
    }
    config.recordings_dir = var("RECORDINGS_DIR").map(PathBuf::from);
    if let Some(frames) = parse_var::<u32>("RTP_MAX_CATCHUP_FRAMES")? {
        config.max_catchup_frames = frames;
    }

    config.realtime_api_key = var("OPENAI_API_KEY");
    if let Some(url) = var("REALTIME_URL") {
        config.realtime_url = url;
    }

    Ok(config)
}
