//! Configuration loading from YAML files
//!
//! Config file is selected via:
//! 1. -c/--config <path> command line argument
//! 2. CONFIG_FILE environment variable
//!
//! The `geofence` and `opener` blocks of each garage door carry a `type`
//! discriminator; their settings sub-trees are handed to the matching
//! variant parser at assembly time.

use crate::domain::types::TrackerId;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

const DEFAULT_MQTT_PORT: u16 = 1883;

/// Serde default value functions
struct Defaults;

impl Defaults {
    fn mqtt_port() -> u16 {
        DEFAULT_MQTT_PORT
    }
}

/// Connection settings shared by the tracker bus and MQTT-family openers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttConnectSettings {
    pub host: String,
    #[serde(default = "Defaults::mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerMqttSettings {
    pub connection: MqttConnectSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    pub tracker_mqtt_settings: TrackerMqttSettings,
    /// Minutes to keep a garage's operation lock held after an actuation.
    #[serde(default)]
    pub cooldown: u64,
}

/// A `geofence:` block: discriminator plus the variant's raw settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub settings: serde_yaml::Value,
}

/// JSON-keyed topic binding: one topic whose payloads carry both
/// coordinates under configurable top-level keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComplexTopicConfig {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub lat_json_key: String,
    #[serde(default)]
    pub lng_json_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub id: TrackerId,
    #[serde(default)]
    pub lat_topic: String,
    #[serde(default)]
    pub lng_topic: String,
    #[serde(default)]
    pub zone_topic: String,
    #[serde(default)]
    pub complex_topic: ComplexTopicConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GarageDoorConfig {
    pub geofence: GeofenceConfig,
    /// Raw opener sub-tree; parsed by the adapter selected by its `type`.
    pub opener: serde_yaml::Value,
    #[serde(default)]
    pub trackers: Vec<TrackerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub global: GlobalConfig,
    #[serde(default)]
    pub garage_doors: Vec<GarageDoorConfig>,
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `anyhow::Error` if the file cannot be read, the YAML is
    /// invalid, or the garage door list fails basic validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.validate()?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.garage_doors.is_empty() {
            anyhow::bail!("no garage doors found in config");
        }
        for (i, garage) in self.garage_doors.iter().enumerate() {
            if garage.trackers.is_empty() {
                anyhow::bail!("no trackers found for garage door #{}", i);
            }
            for tracker in &garage.trackers {
                let has_scalar =
                    !tracker.lat_topic.is_empty() && !tracker.lng_topic.is_empty();
                let has_complex = !tracker.complex_topic.topic.is_empty();
                let has_zone = !tracker.zone_topic.is_empty();
                if !has_scalar && !has_complex && !has_zone {
                    anyhow::bail!(
                        "tracker {} in garage door #{} has no topic bindings",
                        tracker.id,
                        i
                    );
                }
            }
        }
        Ok(())
    }

    /// TRACKER_MQTT_USER / TRACKER_MQTT_PASS override the tracker-bus
    /// credentials from the config file.
    fn apply_env_overrides(&mut self) {
        let conn = &mut self.global.tracker_mqtt_settings.connection;
        if let Ok(user) = env::var("TRACKER_MQTT_USER") {
            tracing::debug!("TRACKER_MQTT_USER defined, overriding config");
            conn.user = user;
        }
        if let Ok(pass) = env::var("TRACKER_MQTT_PASS") {
            tracing::debug!("TRACKER_MQTT_PASS defined, overriding config");
            conn.pass = pass;
        }
    }
}

/// Commented sample config printed by `--wizard`.
pub const SAMPLE_CONFIG: &str = r#"## geogdo sample configuration
## Redirect to a file and edit: geogdo --wizard > config.yml

global:
  tracker_mqtt_settings:
    connection:
      host: mqtt.local
      port: 1883
      # client_id: geogdo        # random uuid when omitted
      # user: mqtt_user          # or TRACKER_MQTT_USER env var
      # pass: mqtt_pass          # or TRACKER_MQTT_PASS env var
      # use_tls: false
      # skip_tls_verify: false
  cooldown: 5                    # minutes to hold the operation lock after actuating

garage_doors:
  - geofence:
      type: circular             # circular | namedzone | polygon
      settings:
        center:
          lat: 40.0
          lng: -75.0
        close_distance: 0.1      # km; leaving this ring closes the door
        open_distance: 0.05      # km; entering this ring opens the door
    opener:
      type: ratgdo               # http | homeassistant | homebridge | mqtt | ratgdo
      mqtt_settings:
        connection:
          host: mqtt.local
          port: 1883
        topic_prefix: home/garage/main
    trackers:
      - id: 1
        lat_topic: tracker/1/latitude
        lng_topic: tracker/1/longitude
        # zone_topic: tracker/1/geofence
        # complex_topic:
        #   topic: owntracks/user/phone
        #   lat_json_key: lat
        #   lng_json_key: lon
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
global:
  tracker_mqtt_settings:
    connection:
      host: broker.local
  cooldown: 5
garage_doors:
  - geofence:
      type: circular
      settings:
        center: {lat: 40.0, lng: -75.0}
        open_distance: 0.05
    opener:
      type: http
      settings:
        connection: {host: gdo.local}
        commands:
          - name: open
            endpoint: /open
            http_method: post
    trackers:
      - id: 7
        lat_topic: t/7/lat
        lng_topic: t/7/lng
"#
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.validate().unwrap();

        let conn = &config.global.tracker_mqtt_settings.connection;
        assert_eq!(conn.host, "broker.local");
        assert_eq!(conn.port, 1883); // default
        assert!(!conn.use_tls);
        assert_eq!(config.global.cooldown, 5);

        let garage = &config.garage_doors[0];
        assert_eq!(garage.geofence.kind, "circular");
        assert_eq!(garage.trackers[0].id, TrackerId::from("7"));
        assert_eq!(garage.trackers[0].lat_topic, "t/7/lat");
        assert!(garage.trackers[0].zone_topic.is_empty());
    }

    #[test]
    fn test_validate_rejects_empty_garages() {
        let config: Config = serde_yaml::from_str(
            r#"
global:
  tracker_mqtt_settings:
    connection: {host: broker.local}
garage_doors: []
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tracker_without_topics() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.garage_doors[0].trackers[0].lat_topic.clear();
        config.garage_doors[0].trackers[0].lng_topic.clear();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("garage door #0"), "got: {err}");
    }

    #[test]
    fn test_sample_config_is_valid_yaml() {
        let config: Config = serde_yaml::from_str(SAMPLE_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.garage_doors.len(), 1);
        assert_eq!(config.garage_doors[0].opener["type"], "ratgdo");
    }
}
