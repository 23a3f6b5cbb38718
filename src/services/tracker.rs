//! Per-tracker state and the location update loop
//!
//! Each tracker owns a small mutable state record and a bounded update
//! channel. The bus router produces partial `Point` updates (lat-only or
//! lng-only scalars arrive as separate messages); the tracker's update
//! loop merges them and invokes the actuation coordinator once the merged
//! point is defined.

use crate::domain::types::{Point, TrackerId};
use crate::infra::config::TrackerConfig;
use crate::infra::ops::OpsContext;
use crate::services::coordinator;
use crate::services::garage::Garage;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Buffered location updates per tracker.
const UPDATE_CHANNEL_CAPACITY: usize = 2;

/// JSON-keyed topic binding carried by the tracker.
#[derive(Debug, Clone, Default)]
pub struct ComplexTopic {
    pub topic: String,
    pub lat_json_key: String,
    pub lng_json_key: String,
}

/// Mutable per-tracker record. Only touched under the tracker's own lock,
/// from its update loop or from the evaluator called synchronously by the
/// coordinator.
#[derive(Debug, Clone)]
pub struct TrackerState {
    pub current_location: Point,
    /// Distance cache for circular geofences, kilometers.
    pub cur_distance: f64,
    pub prev_zone: String,
    pub cur_zone: String,
    pub inside_open_geo: bool,
    pub inside_close_geo: bool,
    pub inside_restricted_geo: bool,
    pub last_entered_close_geo: Option<Instant>,
    pub last_left_open_geo: Option<Instant>,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            current_location: Point::default(),
            cur_distance: 0.0,
            prev_zone: String::new(),
            cur_zone: String::new(),
            // boot as inside so a tracker starting inside a polygon
            // geofence does not trigger on its first point
            inside_open_geo: true,
            inside_close_geo: true,
            inside_restricted_geo: false,
            last_entered_close_geo: None,
            last_left_open_geo: None,
        }
    }
}

/// A tracker: immutable topic bindings plus its mutable state and the
/// producer side of its update channel.
pub struct Tracker {
    pub id: TrackerId,
    pub lat_topic: String,
    pub lng_topic: String,
    pub zone_topic: String,
    pub complex_topic: ComplexTopic,
    pub state: Mutex<TrackerState>,
    location_tx: mpsc::Sender<Point>,
}

impl Tracker {
    /// Build a tracker and the consumer side of its update channel.
    pub fn from_config(config: &TrackerConfig) -> (Arc<Self>, mpsc::Receiver<Point>) {
        let (location_tx, location_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let tracker = Arc::new(Self {
            id: config.id.clone(),
            lat_topic: config.lat_topic.clone(),
            lng_topic: config.lng_topic.clone(),
            zone_topic: config.zone_topic.clone(),
            complex_topic: ComplexTopic {
                topic: config.complex_topic.topic.clone(),
                lat_json_key: config.complex_topic.lat_json_key.clone(),
                lng_json_key: config.complex_topic.lng_json_key.clone(),
            },
            state: Mutex::new(TrackerState::default()),
            location_tx,
        });
        (tracker, location_rx)
    }

    /// Queue a location update without blocking the caller; a full channel
    /// only delays this tracker, never the dispatch loop.
    pub fn send_location(self: &Arc<Self>, point: Point) {
        let tx = self.location_tx.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            if tx.send(point).await.is_err() {
                debug!(tracker = %id, "location channel closed, dropping update");
            }
        });
    }

    /// Merge a partial update into the current location. Returns true when
    /// something changed and the merged point is defined.
    pub fn merge_location(&self, update: Point) -> bool {
        let mut state = self.state.lock();
        let mut changed = false;
        if update.lat != 0.0 {
            state.current_location.lat = update.lat;
            changed = true;
        }
        if update.lng != 0.0 {
            state.current_location.lng = update.lng;
            changed = true;
        }
        changed && state.current_location.is_defined()
    }

    /// Record a zone label published on the tracker's zone topic.
    pub fn update_zone(&self, zone: &str) {
        let mut state = self.state.lock();
        state.prev_zone = std::mem::take(&mut state.cur_zone);
        state.cur_zone = zone.to_string();
    }
}

/// Single-consumer loop that drains a tracker's update channel for the
/// process lifetime. Exits when the channel closes on shutdown.
pub async fn run_update_loop(
    garage: Arc<Garage>,
    tracker: Arc<Tracker>,
    ctx: Arc<OpsContext>,
    mut location_rx: mpsc::Receiver<Point>,
) {
    info!(tracker = %tracker.id, "tracker update loop started");
    while let Some(update) = location_rx.recv().await {
        if tracker.merge_location(update) {
            coordinator::check(&garage, &tracker, &ctx);
        }
    }
    debug!(tracker = %tracker.id, "tracker update loop stopped");
}
