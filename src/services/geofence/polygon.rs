//! Polygon geofences with ray-cast membership tests
//!
//! Up to three vertex lists: `open`, `close`, and `restricted`. The
//! restricted region suppresses opens (a driveway or parking lot that is
//! not "home") and closes that happen while passing through it.

use crate::domain::types::{Action, Point};
use crate::services::geofence::kml::KmlPolygons;
use crate::services::tracker::TrackerState;
use serde::Deserialize;
use std::time::Instant;

/// Vertex lists are treated as implicitly closed (the last edge connects
/// back to the first vertex). May be sourced from a KML file whose
/// placemark names select the lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolygonGeofence {
    /// Entering this polygon opens the garage.
    #[serde(default)]
    pub open: Vec<Point>,
    /// Leaving this polygon closes the garage.
    #[serde(default)]
    pub close: Vec<Point>,
    /// Membership here vetoes actions at the open/close edges.
    #[serde(default)]
    pub restricted: Vec<Point>,
    #[serde(default)]
    pub kml_file: String,
}

impl PolygonGeofence {
    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.open.is_empty() && self.close.is_empty() && self.restricted.is_empty() {
            anyhow::bail!("polygon geofence requires at least one vertex list");
        }
        Ok(())
    }

    /// Override vertex lists with the ones parsed from a KML document.
    pub(crate) fn apply_kml(&mut self, polygons: KmlPolygons) {
        if !polygons.open.is_empty() {
            self.open = polygons.open;
        }
        if !polygons.close.is_empty() {
            self.close = polygons.close;
        }
        if !polygons.restricted.is_empty() {
            self.restricted = polygons.restricted;
        }
    }

    /// Membership edge detection. The previous membership flags live on
    /// the tracker and are replaced by this call.
    pub(crate) fn evaluate(&self, state: &mut TrackerState, now: Instant) -> Option<Action> {
        if !state.current_location.is_defined() {
            return None; // need valid lat and lng to check the geofence
        }

        let inside_close = is_inside_polygon(state.current_location, &self.close);
        let inside_open = is_inside_polygon(state.current_location, &self.open);
        let inside_restricted = is_inside_polygon(state.current_location, &self.restricted);

        let mut action = None;
        if !self.close.is_empty() {
            if state.inside_close_geo && !state.inside_restricted_geo && !inside_close {
                // left the close geofence without passing through restricted
                action = Some(Action::Close);
            } else if !state.inside_close_geo && inside_close {
                // just entered; remember when, to debounce an accidental open
                state.last_entered_close_geo = Some(now);
            }
        }
        if action.is_none() && !self.open.is_empty() {
            if !state.inside_open_geo && !state.inside_restricted_geo && inside_open {
                action = Some(Action::Open);
            } else if state.inside_open_geo && !inside_open {
                state.last_left_open_geo = Some(now);
            }
        }

        state.inside_close_geo = inside_close;
        state.inside_open_geo = inside_open;
        state.inside_restricted_geo = inside_restricted;

        action
    }
}

/// Ray-casting point-in-polygon test (odd intersection count means
/// inside). Assumes a simple polygon without holes.
pub fn is_inside_polygon(p: Point, vertices: &[Point]) -> bool {
    let mut intersections = 0;
    let mut j = vertices.len().wrapping_sub(1);

    for i in 0..vertices.len() {
        let (vi, vj) = (vertices[i], vertices[j]);
        if (vi.lat > p.lat) != (vj.lat > p.lat)
            && p.lng < (vj.lng - vi.lng) * (p.lat - vi.lat) / (vj.lat - vi.lat) + vi.lng
        {
            intersections += 1;
        }
        j = i;
    }

    intersections % 2 == 1
}
