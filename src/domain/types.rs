//! Shared value types for geofence evaluation and actuation

use serde::{Deserialize, Deserializer};
use std::fmt;

/// A latitude/longitude pair in decimal degrees.
///
/// The origin is treated as the "unknown" sentinel: lat=0 lng=0 are valid
/// coordinates, but they are in the middle of the ocean, so it is safe to
/// assume they mean undefined.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct Point {
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
}

impl Point {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// A point is defined iff both coordinates are non-zero.
    pub fn is_defined(&self) -> bool {
        self.lat != 0.0 && self.lng != 0.0
    }
}

/// Door action produced by the geofence evaluator and consumed by openers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Open,
    Close,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Open => "open",
            Action::Close => "close",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque tracker identity, unique within the garage set.
///
/// Config files may give ids as strings or integers; both normalize to the
/// string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerId(pub String);

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackerId {
    fn from(s: &str) -> Self {
        TrackerId(s.to_string())
    }
}

impl<'de> Deserialize<'de> for TrackerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct IdVisitor;

        impl<'de> Visitor<'de> for IdVisitor {
            type Value = TrackerId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or integer tracker id")
            }

            fn visit_str<E>(self, value: &str) -> Result<TrackerId, E>
            where
                E: de::Error,
            {
                Ok(TrackerId(value.to_string()))
            }

            fn visit_string<E>(self, value: String) -> Result<TrackerId, E>
            where
                E: de::Error,
            {
                Ok(TrackerId(value))
            }

            fn visit_u64<E>(self, value: u64) -> Result<TrackerId, E>
            where
                E: de::Error,
            {
                Ok(TrackerId(value.to_string()))
            }

            fn visit_i64<E>(self, value: i64) -> Result<TrackerId, E>
            where
                E: de::Error,
            {
                Ok(TrackerId(value.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}
