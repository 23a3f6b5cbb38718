//! Named-zone geofence: transitions between zone labels published on the
//! tracker's zone topic

use crate::domain::types::Action;
use crate::services::tracker::TrackerState;
use serde::Deserialize;

/// A zone label transition, e.g. `home` to `not_home`. A trigger is
/// defined iff both labels are non-empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZoneTrigger {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

impl ZoneTrigger {
    pub fn is_defined(&self) -> bool {
        !self.from.is_empty() && !self.to.is_empty()
    }
}

/// Triggers for the open and close actions. The garage closes when the
/// tracker moves from `close_trigger.from` to `close_trigger.to`, and
/// opens for the `open_trigger` transition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamedZoneGeofence {
    #[serde(default)]
    pub open_trigger: ZoneTrigger,
    #[serde(default)]
    pub close_trigger: ZoneTrigger,
}

impl NamedZoneGeofence {
    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if !self.open_trigger.is_defined() && !self.close_trigger.is_defined() {
            anyhow::bail!("namedzone geofence requires an open_trigger or close_trigger");
        }
        Ok(())
    }

    /// Close is evaluated first: the safer action wins if both triggers
    /// somehow describe the same transition.
    pub(crate) fn evaluate(&self, state: &TrackerState) -> Option<Action> {
        if self.close_trigger.is_defined()
            && state.prev_zone == self.close_trigger.from
            && state.cur_zone == self.close_trigger.to
        {
            return Some(Action::Close);
        }
        if self.open_trigger.is_defined()
            && state.prev_zone == self.open_trigger.from
            && state.cur_zone == self.open_trigger.to
        {
            return Some(Action::Open);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geofence() -> NamedZoneGeofence {
        NamedZoneGeofence {
            open_trigger: ZoneTrigger { from: "not_home".into(), to: "home".into() },
            close_trigger: ZoneTrigger { from: "home".into(), to: "not_home".into() },
        }
    }

    fn state(prev: &str, cur: &str) -> TrackerState {
        TrackerState {
            prev_zone: prev.to_string(),
            cur_zone: cur.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_close_transition() {
        assert_eq!(geofence().evaluate(&state("home", "not_home")), Some(Action::Close));
    }

    #[test]
    fn test_open_transition() {
        assert_eq!(geofence().evaluate(&state("not_home", "home")), Some(Action::Open));
    }

    #[test]
    fn test_repeated_zone_is_idempotent() {
        // same payload twice in a row: prev == cur, no transition
        assert_eq!(geofence().evaluate(&state("not_home", "not_home")), None);
        assert_eq!(geofence().evaluate(&state("home", "home")), None);
    }

    #[test]
    fn test_unrelated_transition() {
        assert_eq!(geofence().evaluate(&state("work", "not_home")), None);
    }

    #[test]
    fn test_undefined_trigger_never_fires() {
        let g = NamedZoneGeofence {
            open_trigger: ZoneTrigger { from: "not_home".into(), to: "home".into() },
            close_trigger: ZoneTrigger::default(),
        };
        // empty close trigger must not match empty prev/cur zones
        assert_eq!(g.evaluate(&state("", "")), None);
        assert_eq!(g.evaluate(&state("not_home", "home")), Some(Action::Open));
    }

    #[test]
    fn test_validate_requires_one_trigger() {
        assert!(NamedZoneGeofence::default().validate().is_err());
        assert!(geofence().validate().is_ok());
    }
}
