//! Telemetry bus router
//!
//! One shared connection to the tracker broker. Subscriptions cover the
//! union of every tracker's configured topics; incoming messages are
//! matched against each tracker's bindings and turned into location
//! updates on that tracker's channel, or zone updates applied directly.

use crate::domain::types::Point;
use crate::infra::config::MqttConnectSettings;
use crate::infra::ops::OpsContext;
use crate::io::build_mqtt_options;
use crate::services::coordinator;
use crate::services::garage::Garage;
use crate::services::tracker::ComplexTopic;
use anyhow::Context;
use rumqttc::{AsyncClient, Event, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const SUBSCRIBE_ATTEMPTS: u32 = 5;
const SUBSCRIBE_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Grace period for the broker to drain the disconnect before exit.
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// Run the router until shutdown. Connecting and subscribing happen on
/// the broker's ConnAck, and again on every reconnect.
pub async fn run_router(
    connection: &MqttConnectSettings,
    garages: Vec<Arc<Garage>>,
    ctx: Arc<OpsContext>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let options = build_mqtt_options(connection).context("invalid tracker mqtt settings")?;
    let (client, mut eventloop) = AsyncClient::new(options, 100);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("disconnecting from tracker mqtt broker");
                    let _ = client.disconnect().await;
                    tokio::time::sleep(DISCONNECT_GRACE).await;
                    return Ok(());
                }
            }
            result = eventloop.poll() => match result {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("connected to tracker mqtt broker");
                    let client = client.clone();
                    let garages = garages.clone();
                    tokio::spawn(async move {
                        subscribe_all(client, garages).await;
                    });
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match std::str::from_utf8(&publish.payload) {
                        Ok(payload) => dispatch_message(&garages, &ctx, &publish.topic, payload),
                        Err(e) => warn!(error = %e, "invalid utf-8 in mqtt payload"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "tracker mqtt connection error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// Subscribe to every tracker's configured topics with a retry budget;
/// exhausted retries are fatal.
async fn subscribe_all(client: AsyncClient, garages: Vec<Arc<Garage>>) {
    for garage in &garages {
        for tracker in &garage.trackers {
            info!(tracker = %tracker.id, "subscribing to tracker topics");

            let topics = [
                tracker.lat_topic.as_str(),
                tracker.lng_topic.as_str(),
                tracker.zone_topic.as_str(),
                tracker.complex_topic.topic.as_str(),
            ];
            for topic in topics.into_iter().filter(|t| !t.is_empty()) {
                let mut subscribed = false;
                for attempts_left in (1..=SUBSCRIBE_ATTEMPTS).rev() {
                    debug!(topic = %topic, "subscribing to topic");
                    match client.subscribe(topic, QoS::AtMostOnce).await {
                        Ok(()) => {
                            debug!(topic = %topic, "topic subscribed successfully");
                            subscribed = true;
                            break;
                        }
                        Err(e) => {
                            info!(
                                topic = %topic,
                                tracker = %tracker.id,
                                attempts_left = attempts_left - 1,
                                error = %e,
                                "failed to subscribe to topic"
                            );
                        }
                    }
                    tokio::time::sleep(SUBSCRIBE_RETRY_DELAY).await;
                }
                if !subscribed {
                    error!("unable to subscribe to topics, exiting");
                    std::process::exit(1);
                }
            }
        }
    }
    info!("topics subscribed, listening for events");
}

/// Match a message against every tracker's bindings. A parse error stops
/// the match for that tracker only; other trackers still try. Location
/// updates are emitted asynchronously so one full channel cannot stall
/// dispatch.
pub fn dispatch_message(
    garages: &[Arc<Garage>],
    ctx: &Arc<OpsContext>,
    topic: &str,
    payload: &str,
) {
    for garage in garages {
        for tracker in &garage.trackers {
            let mut point = Point::default();

            if !tracker.lat_topic.is_empty() && topic == tracker.lat_topic {
                debug!(tracker = %tracker.id, payload = %payload, "received latitude");
                match payload.trim().parse::<f64>() {
                    Ok(lat) => point.lat = lat,
                    Err(e) => {
                        error!(tracker = %tracker.id, error = %e, "could not parse message payload");
                        continue;
                    }
                }
            } else if !tracker.lng_topic.is_empty() && topic == tracker.lng_topic {
                debug!(tracker = %tracker.id, payload = %payload, "received longitude");
                match payload.trim().parse::<f64>() {
                    Ok(lng) => point.lng = lng,
                    Err(e) => {
                        error!(tracker = %tracker.id, error = %e, "could not parse message payload");
                        continue;
                    }
                }
            } else if !tracker.zone_topic.is_empty() && topic == tracker.zone_topic {
                info!(tracker = %tracker.id, zone = %payload, "received zone for tracker");
                tracker.update_zone(payload);
                // zone transitions need no coordinate merge, check directly
                coordinator::check(garage, tracker, ctx);
                continue;
            } else if !tracker.complex_topic.topic.is_empty()
                && topic == tracker.complex_topic.topic
            {
                debug!(tracker = %tracker.id, payload = %payload, "received complex payload");
                match parse_complex_payload(&tracker.complex_topic, payload) {
                    Ok(Some(parsed)) => point = parsed,
                    Ok(None) => {
                        debug!(tracker = %tracker.id, "payload is last-will telemetry, skipping");
                        continue;
                    }
                    Err(e) => {
                        error!(tracker = %tracker.id, error = %e, "could not parse message payload");
                        continue;
                    }
                }
            } else {
                // no topic match for this tracker, try the next one
                continue;
            }

            if point != Point::default() {
                tracker.send_location(point);
            }
        }
    }
}

/// Extract a point from a JSON payload using the tracker's configured
/// top-level keys. `_type: lwt` payloads are last-will telemetry and are
/// skipped. At least one usable coordinate is required.
pub fn parse_complex_payload(
    complex: &ComplexTopic,
    payload: &str,
) -> anyhow::Result<Option<Point>> {
    let json: serde_json::Value =
        serde_json::from_str(payload).context("could not parse json payload")?;

    if json.get("_type").and_then(|v| v.as_str()) == Some("lwt") {
        return Ok(None);
    }

    let mut point = Point::default();
    if let Some(lat) = json.get(&complex.lat_json_key).and_then(|v| v.as_f64()) {
        point.lat = lat;
    }
    if let Some(lng) = json.get(&complex.lng_json_key).and_then(|v| v.as_f64()) {
        point.lng = lng;
    }
    if point.lat == 0.0 && point.lng == 0.0 {
        anyhow::bail!("could not parse coordinates from complex topic payload");
    }
    Ok(Some(point))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Action, TrackerId};
    use crate::infra::config::{ComplexTopicConfig, TrackerConfig};
    use crate::io::opener::{Opener, OpenerError};
    use crate::services::geofence::{Geofence, NamedZoneGeofence, ZoneTrigger};
    use crate::services::tracker::Tracker;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    fn complex() -> ComplexTopic {
        ComplexTopic {
            topic: "owntracks/user/phone".into(),
            lat_json_key: "lat".into(),
            lng_json_key: "lon".into(),
        }
    }

    #[test]
    fn test_parse_complex_payload() {
        let point = parse_complex_payload(&complex(), r#"{"lat": 40.5, "lon": -75.5}"#)
            .unwrap()
            .unwrap();
        assert_eq!(point, Point::new(40.5, -75.5));
    }

    #[test]
    fn test_parse_complex_payload_partial() {
        // one usable coordinate is enough; the merge carries the other
        let point = parse_complex_payload(&complex(), r#"{"lat": 40.5}"#).unwrap().unwrap();
        assert_eq!(point, Point::new(40.5, 0.0));
    }

    #[test]
    fn test_parse_complex_payload_lwt_skipped() {
        let result =
            parse_complex_payload(&complex(), r#"{"_type": "lwt", "lat": 40.5, "lon": -75.5}"#)
                .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_parse_complex_payload_errors() {
        assert!(parse_complex_payload(&complex(), "not json").is_err());
        assert!(parse_complex_payload(&complex(), r#"{"other": 1}"#).is_err());
    }

    struct RecordingOpener {
        actions: Mutex<Vec<Action>>,
    }

    #[async_trait]
    impl Opener for RecordingOpener {
        async fn set_state(&self, action: Action) -> Result<(), OpenerError> {
            self.actions.lock().push(action);
            Ok(())
        }
        async fn shutdown(&self) {}
    }

    fn zone_garage() -> (Arc<Garage>, Arc<RecordingOpener>, mpsc::Receiver<Point>) {
        let opener = Arc::new(RecordingOpener { actions: Mutex::new(Vec::new()) });
        let (tracker, rx) = Tracker::from_config(&TrackerConfig {
            id: TrackerId::from("t1"),
            lat_topic: "t/1/lat".into(),
            lng_topic: "t/1/lng".into(),
            zone_topic: "t/1/zone".into(),
            complex_topic: ComplexTopicConfig::default(),
        });
        let geofence = Geofence::NamedZone(NamedZoneGeofence {
            open_trigger: ZoneTrigger { from: "not_home".into(), to: "home".into() },
            close_trigger: ZoneTrigger { from: "home".into(), to: "not_home".into() },
        });
        let garage = Garage::new(0, geofence, opener.clone(), vec![tracker]);
        (garage, opener, rx)
    }

    #[tokio::test]
    async fn test_dispatch_scalar_updates_reach_channel() {
        let (garage, _opener, mut rx) = zone_garage();
        let garages = vec![garage];
        let ctx = OpsContext::new(false, true, 0);

        dispatch_message(&garages, &ctx, "t/1/lat", "40.5");
        assert_eq!(rx.recv().await.unwrap(), Point::new(40.5, 0.0));

        dispatch_message(&garages, &ctx, "t/1/lng", "-75.25");
        assert_eq!(rx.recv().await.unwrap(), Point::new(0.0, -75.25));
    }

    #[tokio::test]
    async fn test_dispatch_zone_update_triggers_check() {
        let (garage, opener, _rx) = zone_garage();
        let garages = vec![garage];
        let ctx = OpsContext::new(false, true, 0);

        dispatch_message(&garages, &ctx, "t/1/zone", "home");
        dispatch_message(&garages, &ctx, "t/1/zone", "not_home");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(opener.actions.lock().clone(), vec![Action::Close]);
    }

    #[tokio::test]
    async fn test_dispatch_bad_payload_dropped() {
        let (garage, _opener, mut rx) = zone_garage();
        let garages = vec![garage];
        let ctx = OpsContext::new(false, true, 0);

        dispatch_message(&garages, &ctx, "t/1/lat", "not-a-float");
        dispatch_message(&garages, &ctx, "t/1/lat", "41.0");

        // only the parseable update arrives
        assert_eq!(rx.recv().await.unwrap(), Point::new(41.0, 0.0));
    }

    #[tokio::test]
    async fn test_dispatch_unmatched_topic_ignored() {
        let (garage, opener, mut rx) = zone_garage();
        let garages = vec![garage];
        let ctx = OpsContext::new(false, true, 0);

        dispatch_message(&garages, &ctx, "other/topic", "40.5");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert!(opener.actions.lock().is_empty());
    }
}
