//! Generic MQTT opener
//!
//! Drives controllers that accept commands and report state over MQTT.
//! The opener keeps its own broker connection; status topics update a
//! small cache that `set_state` consults for start-state checks and
//! finish-state polling.

use crate::domain::types::Action;
use crate::infra::config::MqttConnectSettings;
use crate::io::build_mqtt_options;
use crate::io::opener::{Opener, OpenerError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
const SUBSCRIBE_ATTEMPTS: u32 = 5;
const SUBSCRIBE_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MqttTopics {
    /// Prefixed to all subscription and command topics; may be blank when
    /// the other topics are fully qualified.
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub door_status: String,
    #[serde(default)]
    pub obstruction: String,
    #[serde(default)]
    pub availability: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttCommand {
    #[serde(default)]
    pub name: String,
    /// May match the name or not, depending on the controller.
    #[serde(default)]
    pub payload: String,
    /// Published under `<prefix>/<topic_suffix>`.
    #[serde(default)]
    pub topic_suffix: String,
    #[serde(default)]
    pub required_start_state: String,
    #[serde(default)]
    pub required_finish_state: String,
    #[serde(default)]
    pub timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttOpenerSettings {
    pub connection: MqttConnectSettings,
    #[serde(default)]
    pub topics: MqttTopics,
    #[serde(default)]
    pub commands: Vec<MqttCommand>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    settings: MqttOpenerSettings,
}

/// Door state reported by the controller on its status topics.
#[derive(Debug, Default)]
struct DoorCache {
    state: String,
    availability: String,
    obstruction: String,
}

pub struct MqttOpener {
    settings: MqttOpenerSettings,
    opener_type: String,
    client: AsyncClient,
    cache: Arc<Mutex<DoorCache>>,
    testing: bool,
}

impl MqttOpener {
    /// Parse, prepare, connect, and subscribe.
    pub async fn initialize(
        config: &serde_yaml::Value,
        global_mqtt: &MqttConnectSettings,
        testing: bool,
    ) -> anyhow::Result<Self> {
        let raw: RawConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("failed to parse mqtt opener settings: {e}"))?;
        let opener_type = config
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("mqtt")
            .to_string();
        let settings = Self::prepare(raw.settings, &opener_type, global_mqtt)?;
        Self::connect(settings, opener_type, testing).await
    }

    /// Apply defaults, the client-id collision rule, and validation.
    pub fn prepare(
        mut settings: MqttOpenerSettings,
        opener_type: &str,
        global_mqtt: &MqttConnectSettings,
    ) -> anyhow::Result<MqttOpenerSettings> {
        // an opener sharing the bus broker must not steal the bus session
        let conn = &mut settings.connection;
        if !conn.client_id.is_empty()
            && conn.client_id == global_mqtt.client_id
            && conn.host == global_mqtt.host
            && conn.port == global_mqtt.port
        {
            conn.client_id = format!(
                "{}-{}-{}",
                conn.client_id,
                opener_type,
                uuid::Uuid::new_v4()
            );
            warn!(
                client_id = %conn.client_id,
                "opener mqtt client id matches the tracker bus, appending opener type and a random uuid"
            );
        }

        for command in &mut settings.commands {
            if command.timeout == 0 {
                command.timeout = DEFAULT_COMMAND_TIMEOUT_SECS;
            }
        }
        settings.topics.prefix = settings.topics.prefix.trim_end_matches('/').to_string();

        validate_settings(&settings)?;
        Ok(settings)
    }

    /// Connect to the broker and start the background event loop. Returns
    /// once the broker acknowledges the connection; a connect failure is
    /// fatal to startup.
    pub async fn connect(
        settings: MqttOpenerSettings,
        opener_type: String,
        testing: bool,
    ) -> anyhow::Result<Self> {
        let options = build_mqtt_options(&settings.connection)?;
        let (client, mut eventloop) = AsyncClient::new(options, 100);
        let cache = Arc::new(Mutex::new(DoorCache::default()));

        // wait for the initial connection so a dead broker fails startup
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(opener = %opener_type, "door opener connected to mqtt broker");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    anyhow::bail!("{} could not connect to mqtt broker: {}", opener_type, e);
                }
            }
        }

        subscribe_topics(&client, &settings.topics, &opener_type).await;

        // background loop: cache updates and re-subscription on reconnect
        let loop_cache = cache.clone();
        let loop_client = client.clone();
        let loop_topics = settings.topics.clone();
        let loop_type = opener_type.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(opener = %loop_type, "door opener reconnected to mqtt broker");
                        subscribe_topics(&loop_client, &loop_topics, &loop_type).await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match std::str::from_utf8(&publish.payload) {
                            Ok(payload) => {
                                handle_message(&loop_cache, &loop_topics, &publish.topic, payload);
                            }
                            Err(e) => warn!(error = %e, "invalid utf-8 in mqtt payload"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(opener = %loop_type, error = %e, "mqtt opener connection error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self { settings, opener_type, client, cache, testing })
    }

    fn full_topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.settings.topics.prefix, suffix)
    }

    fn cached_state(&self) -> String {
        self.cache.lock().state.clone()
    }

    /// Compose the failure explanation for a finish-state timeout,
    /// preferring reported availability, then obstruction, then the
    /// current state.
    fn timeout_error(&self, action: Action) -> OpenerError {
        let cache = self.cache.lock();
        let topics = &self.settings.topics;
        if !topics.availability.is_empty() && cache.availability == "offline" {
            OpenerError::Timeout(format!(
                "unable to {} door, possible reason: controller availability reporting offline",
                action
            ))
        } else if !topics.obstruction.is_empty() && cache.obstruction == "obstructed" {
            OpenerError::Timeout(format!(
                "unable to {} door, possible reason: obstruction reported",
                action
            ))
        } else {
            OpenerError::Timeout(format!(
                "unable to {} door, possible reason: unknown; current state: {}",
                action, cache.state
            ))
        }
    }
}

#[async_trait]
impl Opener for MqttOpener {
    async fn set_state(&self, action: Action) -> Result<(), OpenerError> {
        let command = self
            .settings
            .commands
            .iter()
            .find(|c| c.name == action.as_str())
            .ok_or(OpenerError::NoSuchCommand(action))?;

        // check the required start state against the cached door state
        if !self.settings.topics.door_status.is_empty()
            && !command.required_start_state.is_empty()
        {
            let state = self.cached_state();
            if state != command.required_start_state {
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

        info!(action = %action, "setting door state");
        debug!(availability = %self.cache.lock().availability, "reported controller availability");

        self.client
            .publish(
                self.full_topic(&command.topic_suffix),
                QoS::AtMostOnce,
                false,
                command.payload.clone(),
            )
            .await
            .map_err(|e| OpenerError::Rejected(format!("unable to publish command: {e}")))?;

        if command.required_finish_state.is_empty() || self.settings.topics.door_status.is_empty() {
            info!(action = %action, "door command has been published to the topic");
            return Ok(());
        }

        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(command.timeout) {
            let state = self.cached_state();
            if state == command.required_finish_state {
                info!(state = %state, "door state has been set successfully");
                return Ok(());
            }
            debug!(state = %state, "current opener state");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        Err(self.timeout_error(action))
    }

    async fn shutdown(&self) {
        info!(opener = %self.opener_type, "disconnecting door opener from mqtt broker");
        let _ = self.client.disconnect().await;
    }
}

/// Subscribe to the configured status topics, retrying each a few times;
/// exhausted retries are fatal.
async fn subscribe_topics(client: &AsyncClient, topics: &MqttTopics, opener_type: &str) {
    for suffix in [&topics.obstruction, &topics.availability, &topics.door_status] {
        if suffix.is_empty() {
            continue;
        }

        let full_topic = format!("{}/{}", topics.prefix, suffix);
        let mut subscribed = false;
        for attempts_left in (1..=SUBSCRIBE_ATTEMPTS).rev() {
            debug!(topic = %full_topic, "subscribing to topic");
            match client.subscribe(full_topic.as_str(), QoS::AtMostOnce).await {
                Ok(()) => {
                    debug!(topic = %full_topic, "topic subscribed successfully");
                    subscribed = true;
                    break;
                }
                Err(e) => {
                    info!(
                        topic = %full_topic,
                        attempts_left = attempts_left - 1,
                        error = %e,
                        "failed to subscribe to opener topic"
                    );
                }
            }
            tokio::time::sleep(SUBSCRIBE_RETRY_DELAY).await;
        }
        if !subscribed {
            error!(opener = %opener_type, "unable to subscribe to topics, exiting");
            std::process::exit(1);
        }
    }
    debug!(opener = %opener_type, "opener topics subscribed, listening for events");
}

/// Update the cache from a message on one of the status topics.
fn handle_message(cache: &Mutex<DoorCache>, topics: &MqttTopics, topic: &str, payload: &str) {
    debug!(topic = %topic, payload = %payload, "received opener message");
    let prefix = format!("{}/", topics.prefix);
    let suffix = topic.strip_prefix(&prefix).unwrap_or(topic);

    let mut cache = cache.lock();
    if suffix == topics.door_status {
        debug!(state = %payload, "setting door status");
        cache.state = payload.to_string();
    } else if suffix == topics.availability {
        cache.availability = payload.to_string();
    } else if suffix == topics.obstruction {
        cache.obstruction = payload.to_string();
    } else {
        debug!(topic = %topic, "message on unrecognized topic");
    }
}

fn validate_settings(settings: &MqttOpenerSettings) -> anyhow::Result<()> {
    let mut errors = Vec::new();
    if settings.connection.host.is_empty() {
        errors.push("missing mqtt host setting".to_string());
    }
    if settings.commands.is_empty() {
        errors.push("at least 1 command required to operate the door".to_string());
    }
    for (i, command) in settings.commands.iter().enumerate() {
        if command.name.is_empty() {
            errors.push(format!("missing command name for command {}", i));
        }
        if command.payload.is_empty() {
            errors.push(format!("missing command payload for command {}", i));
        }
        if command.topic_suffix.is_empty() {
            errors.push(format!("missing command topic suffix for command {}", i));
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("{}", errors.join("; "));
    }
    Ok(())
}
