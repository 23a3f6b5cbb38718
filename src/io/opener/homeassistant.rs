//! Home Assistant preset over the generic HTTP opener
//!
//! Generates the cover-service command pair and, when status checks are
//! enabled, a states endpoint with a parser that pulls the `state` field
//! out of the JSON response.

use crate::io::opener::http::{HttpCommand, HttpConnection, HttpOpener, StatusEndpoint};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RawConnection {
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    connection: RawConnection,
    entity_id: String,
    #[serde(default)]
    enable_status_checks: bool,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    settings: RawSettings,
}

pub fn initialize(config: &serde_yaml::Value, testing: bool) -> anyhow::Result<HttpOpener> {
    let raw: RawConfig = serde_yaml::from_value(config.clone())
        .map_err(|e| anyhow::anyhow!("failed to parse homeassistant opener settings: {e}"))?;
    let settings = raw.settings;

    if settings.connection.api_key.is_empty() {
        anyhow::bail!("missing homeassistant api_key setting");
    }
    if settings.entity_id.is_empty() {
        anyhow::bail!("missing homeassistant entity_id setting");
    }

    let headers = vec![
        format!("Authorization: Bearer {}", settings.connection.api_key),
        "Content-Type: application/json".to_string(),
    ];
    let body = format!(r#"{{"entity_id": "{}"}}"#, settings.entity_id);

    let commands = vec![
        HttpCommand {
            name: "open".to_string(),
            endpoint: "/api/services/cover/open_cover".to_string(),
            headers: headers.clone(),
            http_method: "post".to_string(),
            body: body.clone(),
            required_start_state: "closed".to_string(),
            required_finish_state: "open".to_string(),
            timeout: 0,
        },
        HttpCommand {
            name: "close".to_string(),
            endpoint: "/api/services/cover/close_cover".to_string(),
            headers: headers.clone(),
            http_method: "post".to_string(),
            body,
            required_start_state: "open".to_string(),
            required_finish_state: "closed".to_string(),
            timeout: 0,
        },
    ];

    let status = if settings.enable_status_checks {
        StatusEndpoint {
            endpoint: format!("/api/states/{}", settings.entity_id),
            headers,
        }
    } else {
        StatusEndpoint::default()
    };

    let connection = HttpConnection {
        host: settings.connection.host,
        port: settings.connection.port,
        user: String::new(),
        pass: String::new(),
        use_tls: settings.connection.use_tls,
        skip_tls_verify: settings.connection.skip_tls_verify,
    };

    let mut opener = HttpOpener::new(connection, status, commands, testing)?;
    opener.set_parse_status(parse_status_response);
    Ok(opener)
}

/// Extract the door state from a Home Assistant states response; all
/// that's needed is the value of the `state` key.
pub fn parse_status_response(status: &str) -> String {
    #[derive(Deserialize)]
    struct StatusResponse {
        #[serde(default)]
        state: String,
    }

    match serde_json::from_str::<StatusResponse>(status) {
        Ok(response) => response.state,
        Err(_) => {
            debug!("unable to parse status response");
            String::new()
        }
    }
}
