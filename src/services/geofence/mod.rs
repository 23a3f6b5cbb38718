//! Geofence models and the edge-triggered evaluator
//!
//! A garage door has exactly one geofence, selected by the `type`
//! discriminator in its config block: `circular`, `namedzone`, or
//! `polygon`. Evaluation is a function of the tracker's updated state plus
//! the geofence configuration; it also maintains the tracker's membership
//! flags, distance cache, and anti-flap timestamps, so edge detection is
//! stateful across calls for the same tracker.

pub mod circular;
pub mod kml;
pub mod named_zone;
pub mod polygon;

pub use circular::CircularGeofence;
pub use named_zone::{NamedZoneGeofence, ZoneTrigger};
pub use polygon::PolygonGeofence;

use crate::domain::types::Action;
use crate::infra::config::GeofenceConfig;
use crate::services::tracker::TrackerState;
use anyhow::Context;
use std::time::Instant;

#[derive(Debug, Clone)]
pub enum Geofence {
    Circular(CircularGeofence),
    NamedZone(NamedZoneGeofence),
    Polygon(PolygonGeofence),
}

impl Geofence {
    /// Materialize a geofence from its config block, dispatching on the
    /// `type` discriminator and validating the variant's settings.
    pub fn from_config(config: &GeofenceConfig) -> anyhow::Result<Self> {
        match config.kind.as_str() {
            "circular" => {
                let geofence: CircularGeofence =
                    serde_yaml::from_value(config.settings.clone())
                        .context("failed to parse circular geofence settings")?;
                geofence.validate()?;
                Ok(Geofence::Circular(geofence))
            }
            "namedzone" => {
                let geofence: NamedZoneGeofence =
                    serde_yaml::from_value(config.settings.clone())
                        .context("failed to parse namedzone geofence settings")?;
                geofence.validate()?;
                Ok(Geofence::NamedZone(geofence))
            }
            "polygon" => {
                let mut geofence: PolygonGeofence =
                    serde_yaml::from_value(config.settings.clone())
                        .context("failed to parse polygon geofence settings")?;
                if !geofence.kml_file.is_empty() {
                    tracing::debug!(file = %geofence.kml_file, "loading kml file");
                    let polygons = kml::load_kml_file(&geofence.kml_file)
                        .with_context(|| format!("unable to load kml file {}", geofence.kml_file))?;
                    geofence.apply_kml(polygons);
                }
                geofence.validate()?;
                Ok(Geofence::Polygon(geofence))
            }
            other => anyhow::bail!("geofence type {} not recognized", other),
        }
    }

    /// Decide whether the tracker's latest state transition triggers a
    /// door action. Updates the tracker's evaluation state as a side
    /// effect.
    pub fn evaluate(&self, state: &mut TrackerState, now: Instant) -> Option<Action> {
        match self {
            Geofence::Circular(g) => g.evaluate(state, now),
            Geofence::NamedZone(g) => g.evaluate(state),
            Geofence::Polygon(g) => g.evaluate(state, now),
        }
    }

    /// Named-zone geofences carry no coordinates worth logging.
    pub fn reports_location(&self) -> bool {
        !matches!(self, Geofence::NamedZone(_))
    }
}
