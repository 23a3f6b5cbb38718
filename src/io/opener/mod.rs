//! Garage door opener adapters
//!
//! An opener accepts `open`/`close` actions and talks to the actual door
//! controller. The generic `http` and `mqtt` adapters cover arbitrary
//! controllers; `homeassistant` and `ratgdo` are presets over them, and
//! `homebridge` speaks that server's accessory API directly.

pub mod homeassistant;
pub mod homebridge;
pub mod http;
pub mod mqtt;
pub mod ratgdo;

use crate::domain::types::Action;
use crate::infra::config::MqttConnectSettings;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpenerError {
    #[error("no command defined for action {0}")]
    NoSuchCommand(Action),
    /// Could not determine the door's current state.
    #[error("{0}")]
    Status(String),
    /// The controller rejected or never received the command.
    #[error("{0}")]
    Rejected(String),
    /// The command went out but the door never reported the target state.
    #[error("{0}")]
    Timeout(String),
}

/// Polymorphic door controller. The per-garage operation lock guarantees
/// `set_state` is never called concurrently for the same opener.
#[async_trait]
pub trait Opener: Send + Sync {
    async fn set_state(&self, action: Action) -> Result<(), OpenerError>;
    /// Release any network resources; called once at process exit.
    async fn shutdown(&self);
}

/// Materialize an opener from its config sub-tree, dispatching on the
/// `type` discriminator. MQTT-family openers connect to their broker here;
/// failures are fatal to startup.
pub async fn initialize(
    config: &serde_yaml::Value,
    global_mqtt: &MqttConnectSettings,
    testing: bool,
) -> anyhow::Result<Arc<dyn Opener>> {
    let kind = config
        .get("type")
        .and_then(|v| v.as_str())
        .context("opener type not defined")?;

    match kind {
        "ratgdo" => Ok(Arc::new(ratgdo::initialize(config, global_mqtt, testing).await?)),
        "mqtt" => Ok(Arc::new(mqtt::MqttOpener::initialize(config, global_mqtt, testing).await?)),
        "http" => Ok(Arc::new(http::HttpOpener::from_config(config, testing)?)),
        "homeassistant" => Ok(Arc::new(homeassistant::initialize(config, testing)?)),
        "homebridge" => Ok(Arc::new(homebridge::HomebridgeOpener::from_config(config, testing)?)),
        other => anyhow::bail!("opener type {} not recognized", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global() -> MqttConnectSettings {
        MqttConnectSettings {
            host: "broker.local".into(),
            port: 1883,
            client_id: "geogdo".into(),
            user: String::new(),
            pass: String::new(),
            use_tls: false,
            skip_tls_verify: false,
        }
    }

    #[tokio::test]
    async fn test_initialize_requires_type() {
        let config: serde_yaml::Value = serde_yaml::from_str("settings: {}").unwrap();
        let err = initialize(&config, &global(), false).await.unwrap_err();
        assert!(err.to_string().contains("opener type not defined"));
    }

    #[tokio::test]
    async fn test_initialize_rejects_unknown_type() {
        let config: serde_yaml::Value = serde_yaml::from_str("type: zigbee").unwrap();
        let err = initialize(&config, &global(), false).await.unwrap_err();
        assert!(err.to_string().contains("not recognized"));
    }

    #[tokio::test]
    async fn test_initialize_http() {
        let config: serde_yaml::Value = serde_yaml::from_str(
            r#"
type: http
settings:
  connection: {host: gdo.local}
  commands:
    - {name: open, endpoint: /open, http_method: get}
"#,
        )
        .unwrap();
        assert!(initialize(&config, &global(), true).await.is_ok());
    }
}
