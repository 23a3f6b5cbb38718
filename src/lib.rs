//! Geofence-driven garage door operator
//!
//! Watches tracker telemetry on an MQTT bus and operates garage door
//! controllers when a tracker crosses a configured geofence boundary.
//!
//! Module structure:
//! - `domain/` - Core value types (Point, Action, TrackerId)
//! - `infra/` - Infrastructure (Config, OpsContext)
//! - `io/` - External interfaces (bus router, control-plane HTTP, openers)
//! - `services/` - Business logic (geofences, trackers, actuation)

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
