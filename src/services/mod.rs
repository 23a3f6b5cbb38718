//! Business logic: geofence models, tracker state, actuation

pub mod coordinator;
pub mod garage;
pub mod geofence;
pub mod tracker;

pub use garage::Garage;
pub use geofence::Geofence;
pub use tracker::{Tracker, TrackerState};
