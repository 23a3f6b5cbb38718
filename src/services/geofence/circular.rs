//! Circular geofence: a center point and open/close radii

use crate::domain::types::{Action, Point};
use crate::services::tracker::TrackerState;
use serde::Deserialize;
use std::time::Instant;
use tracing::debug;

/// Defines a center point and two radii (distances) for the open and close
/// geofences. Crossing outward over `close_distance` closes the garage;
/// crossing inward over `open_distance` opens it.
#[derive(Debug, Clone, Deserialize)]
pub struct CircularGeofence {
    pub center: Point,
    /// Kilometers; 0 means not configured.
    #[serde(default)]
    pub close_distance: f64,
    /// Kilometers; 0 means not configured.
    #[serde(default)]
    pub open_distance: f64,
}

impl CircularGeofence {
    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if !self.center.is_defined() {
            anyhow::bail!("circular geofence requires a defined center point");
        }
        if self.close_distance <= 0.0 && self.open_distance <= 0.0 {
            anyhow::bail!("circular geofence requires open_distance or close_distance > 0");
        }
        Ok(())
    }

    /// Edge detection on the distance to the center. Equality with a
    /// threshold counts as inside; when both rings would fire on the same
    /// step, close wins.
    pub(crate) fn evaluate(&self, state: &mut TrackerState, now: Instant) -> Option<Action> {
        if !state.current_location.is_defined() {
            return None; // need valid lat and lng to check the fence
        }

        let prev = state.cur_distance;
        state.cur_distance = haversine_km(state.current_location, self.center);
        let cur = state.cur_distance;

        if self.close_distance > 0.0 {
            if prev <= self.close_distance && cur > self.close_distance {
                debug!(
                    radius = self.close_distance,
                    prev, cur, "tracker left close geofence"
                );
                return Some(Action::Close);
            }
            if prev > self.close_distance && cur <= self.close_distance {
                debug!(
                    radius = self.close_distance,
                    prev, cur, "tracker entered close geofence"
                );
                state.last_entered_close_geo = Some(now);
            }
        }
        if self.open_distance > 0.0 {
            if prev >= self.open_distance && cur < self.open_distance {
                debug!(
                    radius = self.open_distance,
                    prev, cur, "tracker entered open geofence"
                );
                return Some(Action::Open);
            } else if prev < self.open_distance && cur >= self.open_distance {
                debug!(
                    radius = self.open_distance,
                    prev, cur, "tracker left open geofence"
                );
                state.last_left_open_geo = Some(now);
            }
        }
        None
    }
}

/// Great-circle distance between two points via the haversine formula.
pub fn haversine_km(a: Point, b: Point) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();
    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}
