//! Garage doors: one geofence, one opener, and the trackers they watch

use crate::domain::types::Point;
use crate::infra::config::{GarageDoorConfig, MqttConnectSettings};
use crate::io::opener::{self, Opener};
use crate::services::geofence::Geofence;
use crate::services::tracker::Tracker;
use anyhow::Context;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A garage door with its geofence, opener, and trackers. `op_lock` is
/// held while an actuation is in flight and during the following
/// cooldown; it is written only by the actuation task.
pub struct Garage {
    pub index: usize,
    pub geofence: Geofence,
    pub opener: Arc<dyn Opener>,
    pub op_lock: AtomicBool,
    pub trackers: Vec<Arc<Tracker>>,
}

impl Garage {
    pub fn new(
        index: usize,
        geofence: Geofence,
        opener: Arc<dyn Opener>,
        trackers: Vec<Arc<Tracker>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            index,
            geofence,
            opener,
            op_lock: AtomicBool::new(false),
            trackers,
        })
    }

    /// Materialize a garage door from config: geofence (including any KML
    /// sourcing), opener adapter, and trackers with their update channels.
    /// The returned receivers pair up with `trackers` by position and feed
    /// the per-tracker update loops.
    pub async fn from_config(
        index: usize,
        config: &GarageDoorConfig,
        global_mqtt: &MqttConnectSettings,
        testing: bool,
    ) -> anyhow::Result<(Arc<Self>, Vec<(Arc<Tracker>, mpsc::Receiver<Point>)>)> {
        let geofence = Geofence::from_config(&config.geofence)
            .with_context(|| format!("no supported geofence defined for garage door #{index}"))?;

        let opener = opener::initialize(&config.opener, global_mqtt, testing)
            .await
            .with_context(|| format!("couldn't initialize opener for garage door #{index}"))?;

        let mut trackers = Vec::with_capacity(config.trackers.len());
        let mut loops = Vec::with_capacity(config.trackers.len());
        for tracker_config in &config.trackers {
            let (tracker, location_rx) = Tracker::from_config(tracker_config);
            trackers.push(tracker.clone());
            loops.push((tracker, location_rx));
        }

        let garage = Self::new(index, geofence, opener, trackers);
        Ok((garage, loops))
    }
}
