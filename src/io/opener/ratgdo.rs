//! ratgdo preset over the generic MQTT opener
//!
//! ratgdo firmware publishes door, obstruction, and availability status
//! under fixed suffixes and takes open/close payloads on `command/door`,
//! so only the connection and topic prefix need configuring.

use crate::infra::config::MqttConnectSettings;
use crate::io::opener::mqtt::{MqttCommand, MqttOpener, MqttOpenerSettings, MqttTopics};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawMqttSettings {
    connection: MqttConnectSettings,
    #[serde(default)]
    topic_prefix: String,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    mqtt_settings: RawMqttSettings,
}

pub async fn initialize(
    config: &serde_yaml::Value,
    global_mqtt: &MqttConnectSettings,
    testing: bool,
) -> anyhow::Result<MqttOpener> {
    let raw: RawConfig = serde_yaml::from_value(config.clone())
        .map_err(|e| anyhow::anyhow!("failed to parse ratgdo opener settings: {e}"))?;

    let settings = build_settings(raw.mqtt_settings.connection, raw.mqtt_settings.topic_prefix);
    let settings = MqttOpener::prepare(settings, "ratgdo", global_mqtt)?;
    MqttOpener::connect(settings, "ratgdo".to_string(), testing).await
}

fn build_settings(connection: MqttConnectSettings, topic_prefix: String) -> MqttOpenerSettings {
    MqttOpenerSettings {
        connection,
        topics: MqttTopics {
            prefix: topic_prefix,
            door_status: "status/door".to_string(),
            obstruction: "status/obstruction".to_string(),
            availability: "status/availability".to_string(),
        },
        commands: vec![
            MqttCommand {
                name: "open".to_string(),
                payload: "open".to_string(),
                topic_suffix: "command/door".to_string(),
                required_start_state: "closed".to_string(),
                required_finish_state: "open".to_string(),
                timeout: 0,
            },
            MqttCommand {
                name: "close".to_string(),
                payload: "close".to_string(),
                topic_suffix: "command/door".to_string(),
                required_start_state: "open".to_string(),
                required_finish_state: "closed".to_string(),
                timeout: 0,
            },
        ],
    }
}
