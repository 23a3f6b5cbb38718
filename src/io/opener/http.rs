//! Generic HTTP opener
//!
//! Drives any controller that exposes command endpoints over HTTP(S).
//! Commands may declare a required start state (checked against an
//! optional status endpoint before acting) and a required finish state
//! (polled after acting). Status responses can be post-processed by a
//! pluggable parser so presets can extract a simple `open`/`closed` out of
//! richer payloads.

use crate::domain::types::Action;
use crate::io::opener::{Opener, OpenerError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_HTTP_PORT: u16 = 80;
const DEFAULT_HTTPS_PORT: u16 = 443;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Extracts a simple state string from a status response body.
pub type ParseStatusFn = fn(&str) -> String;

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConnection {
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusEndpoint {
    #[serde(default)]
    pub endpoint: String,
    /// `Key: Value` strings added to status requests.
    #[serde(default)]
    pub headers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpCommand {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub http_method: String,
    #[serde(default)]
    pub body: String,
    /// If set, the door will not operate unless the current state equals
    /// this value.
    #[serde(default)]
    pub required_start_state: String,
    /// If set, the door state is monitored against this value to confirm
    /// success.
    #[serde(default)]
    pub required_finish_state: String,
    /// Seconds to wait for the door to operate when monitored.
    #[serde(default)]
    pub timeout: u64,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    connection: HttpConnection,
    #[serde(default)]
    status: StatusEndpoint,
    #[serde(default)]
    commands: Vec<HttpCommand>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    settings: RawSettings,
}

pub struct HttpOpener {
    connection: HttpConnection,
    status: StatusEndpoint,
    commands: Vec<HttpCommand>,
    parse_status: Option<ParseStatusFn>,
    client: reqwest::Client,
    testing: bool,
}

impl HttpOpener {
    pub fn from_config(config: &serde_yaml::Value, testing: bool) -> anyhow::Result<Self> {
        let raw: RawConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("failed to parse http opener settings: {e}"))?;
        Self::new(raw.settings.connection, raw.settings.status, raw.settings.commands, testing)
    }

    /// Validate settings, apply defaults, and build the shared client.
    /// Presets (homeassistant) call this with programmatic settings.
    pub fn new(
        mut connection: HttpConnection,
        status: StatusEndpoint,
        mut commands: Vec<HttpCommand>,
        testing: bool,
    ) -> anyhow::Result<Self> {
        if connection.port == 0 {
            connection.port = if connection.use_tls { DEFAULT_HTTPS_PORT } else { DEFAULT_HTTP_PORT };
        }
        for command in &mut commands {
            if command.timeout == 0 {
                command.timeout = DEFAULT_COMMAND_TIMEOUT_SECS;
            }
        }

        validate_settings(&connection, &commands)?;

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(connection.use_tls && connection.skip_tls_verify)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build http client: {e}"))?;

        Ok(Self { connection, status, commands, parse_status: None, client, testing })
    }

    /// Install the status-response parser used by preset variants.
    pub fn set_parse_status(&mut self, parse: ParseStatusFn) {
        self.parse_status = Some(parse);
    }

    fn url_for(&self, endpoint: &str) -> String {
        let scheme = if self.connection.use_tls { "https" } else { "http" };
        format!("{}://{}:{}{}", scheme, self.connection.host, self.connection.port, endpoint)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.connection.user.is_empty() && self.connection.pass.is_empty() {
            return request;
        }
        let credentials = format!("{}:{}", self.connection.user, self.connection.pass);
        let encoded = STANDARD.encode(credentials.as_bytes());
        request.header("Authorization", format!("Basic {}", encoded))
    }

    /// Fetch and normalize the door state from the status endpoint.
    async fn door_status(&self) -> Result<String, OpenerError> {
        if self.status.endpoint.is_empty() {
            return Ok(String::new());
        }

        let url = self.url_for(&self.status.endpoint);
        let mut request = self.client.get(&url);
        request = self.apply_auth(request);
        request = apply_headers(request, &self.status.headers);

        let response = request.send().await.map_err(|e| {
            OpenerError::Status(format!("unable to request status from http endpoint: {e}"))
        })?;
        if response.status().as_u16() >= 301 {
            return Err(OpenerError::Status(format!(
                "received unexpected http status code: {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| OpenerError::Status(format!("unable to read response body: {e}")))?;

        Ok(match self.parse_status {
            Some(parse) => parse(&body),
            None => body,
        })
    }
}

#[async_trait]
impl Opener for HttpOpener {
    async fn set_state(&self, action: Action) -> Result<(), OpenerError> {
        let command = self
            .commands
            .iter()
            .find(|c| c.name == action.as_str())
            .ok_or(OpenerError::NoSuchCommand(action))?;

        // validate the required start state before acting
        if !command.required_start_state.is_empty() && !self.status.endpoint.is_empty() {
            let state = self
                .door_status()
                .await
                .map_err(|e| OpenerError::Status(format!("unable to get door state: {e}")))?;
            if !state.is_empty() && state != command.required_start_state {
                warn!(
                    current = %state,
                    requested = %action,
                    "door state is not valid for the requested action, skipping"
                );
                return Ok(());
            }
        }

        if self.testing {
            info!(action = %action, "TESTING flag set, would have attempted action");
            return Ok(());
        }

        let method = parse_method(&command.http_method)?;
        let url = self.url_for(&command.endpoint);
        let mut request = self.client.request(method, &url).body(command.body.clone());
        request = apply_headers(request, &command.headers);
        request = self.apply_auth(request);

        let response = request.send().await.map_err(|e| {
            OpenerError::Rejected(format!("unable to send command to http endpoint: {e}"))
        })?;
        if response.status().as_u16() >= 301 {
            return Err(OpenerError::Rejected(format!(
                "received unexpected http status code: {}",
                response.status()
            )));
        }

        // without a monitored finish state the 2xx response is success
        if command.required_finish_state.is_empty() || self.status.endpoint.is_empty() {
            info!(action = %action, "door command sent to the http endpoint");
            return Ok(());
        }

        let start = Instant::now();
        let mut last_state = String::new();
        while start.elapsed() < Duration::from_secs(command.timeout) {
            match self.door_status().await {
                Ok(state) if state == command.required_finish_state => {
                    info!(state = %state, "door state has been set successfully");
                    return Ok(());
                }
                Ok(state) => {
                    debug!(state = %state, "current opener state");
                    last_state = state;
                }
                Err(e) => {
                    debug!(error = %e, "unable to get door state, will keep trying until timeout");
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        Err(OpenerError::Timeout(format!(
            "command sent, but timed out waiting for door to reach state {}; current state: {}",
            command.required_finish_state, last_state
        )))
    }

    async fn shutdown(&self) {
        // no persistent connections to release
    }
}

fn parse_method(method: &str) -> Result<reqwest::Method, OpenerError> {
    match method.to_uppercase().as_str() {
        "GET" => Ok(reqwest::Method::GET),
        "PUT" => Ok(reqwest::Method::PUT),
        "POST" => Ok(reqwest::Method::POST),
        "PATCH" => Ok(reqwest::Method::PATCH),
        other => Err(OpenerError::Rejected(format!("unsupported http method {}", other))),
    }
}

/// Apply `Key: Value` header strings to a request; unparseable entries are
/// logged and skipped.
fn apply_headers(
    mut request: reqwest::RequestBuilder,
    headers: &[String],
) -> reqwest::RequestBuilder {
    for header in headers {
        match header.split_once(':') {
            Some((key, value)) => {
                request = request.header(key.trim(), value.trim());
            }
            None => warn!(header = %header, "unable to parse header"),
        }
    }
    request
}

fn validate_settings(connection: &HttpConnection, commands: &[HttpCommand]) -> anyhow::Result<()> {
    let mut errors = Vec::new();
    if connection.host.is_empty() {
        errors.push("missing http host setting".to_string());
    }
    if commands.is_empty() {
        errors.push("at least 1 command required to operate the door".to_string());
    }
    for (i, command) in commands.iter().enumerate() {
        if command.name.is_empty() {
            errors.push(format!("missing command name for command {}", i));
        }
        if command.endpoint.is_empty() {
            errors.push(format!("missing command endpoint for command {}", i));
        }
        if command.http_method.is_empty() {
            errors.push(format!("missing command http method for command {}", i));
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("{}", errors.join("; "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opener_config(yaml: &str) -> serde_yaml::Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn minimal() -> serde_yaml::Value {
        opener_config(
            r#"
type: http
settings:
  connection: {host: gdo.local}
  commands:
    - {name: open, endpoint: /open, http_method: post}
    - {name: close, endpoint: /close, http_method: post}
"#,
        )
    }

    #[test]
    fn test_port_defaults() {
        let opener = HttpOpener::from_config(&minimal(), false).unwrap();
        assert_eq!(opener.connection.port, 80);
        assert_eq!(opener.url_for("/open"), "http://gdo.local:80/open");

        let tls = opener_config(
            r#"
settings:
  connection: {host: gdo.local, use_tls: true}
  commands:
    - {name: open, endpoint: /open, http_method: post}
"#,
        );
        let opener = HttpOpener::from_config(&tls, false).unwrap();
        assert_eq!(opener.connection.port, 443);
        assert_eq!(opener.url_for("/open"), "https://gdo.local:443/open");
    }

    #[test]
    fn test_command_timeout_defaults() {
        let opener = HttpOpener::from_config(&minimal(), false).unwrap();
        assert!(opener.commands.iter().all(|c| c.timeout == 30));
    }

    #[test]
    fn test_validation_collects_missing_fields() {
        let bad = opener_config(
            r#"
settings:
  connection: {host: ""}
  commands:
    - {name: "", endpoint: "", http_method: ""}
"#,
        );
        let err = HttpOpener::from_config(&bad, false).unwrap_err().to_string();
        assert!(err.contains("missing http host setting"));
        assert!(err.contains("missing command name for command 0"));
        assert!(err.contains("missing command endpoint for command 0"));
        assert!(err.contains("missing command http method for command 0"));
    }

    #[test]
    fn test_validation_requires_a_command() {
        let bad = opener_config("settings: {connection: {host: gdo.local}}");
        let err = HttpOpener::from_config(&bad, false).unwrap_err().to_string();
        assert!(err.contains("at least 1 command"));
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("get").unwrap(), reqwest::Method::GET);
        assert_eq!(parse_method("POST").unwrap(), reqwest::Method::POST);
        assert_eq!(parse_method("Put").unwrap(), reqwest::Method::PUT);
        assert_eq!(parse_method("patch").unwrap(), reqwest::Method::PATCH);
        assert!(parse_method("delete").is_err());
    }

    #[tokio::test]
    async fn test_unknown_action_errors() {
        let yaml = opener_config(
            r#"
settings:
  connection: {host: gdo.local}
  commands:
    - {name: open, endpoint: /open, http_method: post}
"#,
        );
        let opener = HttpOpener::from_config(&yaml, false).unwrap();
        let err = opener.set_state(Action::Close).await.unwrap_err();
        assert!(matches!(err, OpenerError::NoSuchCommand(Action::Close)));
    }

    #[tokio::test]
    async fn test_testing_mode_skips_network() {
        // host does not exist; testing mode must return before any request
        let opener = HttpOpener::from_config(&minimal(), true).unwrap();
        assert!(opener.set_state(Action::Open).await.is_ok());
    }
}
