use std::collections::HashSet;
use std::net::SocketAddr;

use super::PbxServerConfig;
use crate::collaborators::{AssistantProfile, WIDGET_KEY_PREFIX, WidgetKey};

/// Every PBX server needs a URL, an application and a unique name.
pub(crate) fn validate_pbx_servers(servers: &[PbxServerConfig]) -> Result<(), String> {
    let mut names = HashSet::new();
    for server in servers {
        if server.url.trim().is_empty() {
            return Err(format!("PBX server '{}' has no URL", server.name));
        }
        if !server.url.starts_with("http://") && !server.url.starts_with("https://") {
            return Err(format!(
                "PBX server '{}' URL must be http(s): {}",
                server.name, server.url
            ));
        }
        if server.app.trim().is_empty() {
            return Err(format!("PBX server '{}' has no application name", server.name));
        }
        if !names.insert(server.name.as_str()) {
            return Err(format!("Duplicate PBX server name '{}'", server.name));
        }
    }
    Ok(())
}

pub(crate) fn validate_rtp_bind(bind: &str) -> Result<(), String> {
    bind.parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| format!("Invalid RTP bind address: {bind}"))
}

/// Widget keys carry the public prefix and point at a declared assistant.
pub(crate) fn validate_widget_keys(
    keys: &[WidgetKey],
    assistants: &[AssistantProfile],
) -> Result<(), String> {
    for key in keys {
        if !key.key.starts_with(WIDGET_KEY_PREFIX) {
            return Err(format!(
                "Widget key '{}' must start with '{WIDGET_KEY_PREFIX}'",
                key.key
            ));
        }
        if !assistants.iter().any(|a| a.uid == key.assistant_uid) {
            return Err(format!(
                "Widget key '{}' references unknown assistant '{}'",
                key.key, key.assistant_uid
            ));
        }
    }
    Ok(())
}
