//! Actuation coordinator
//!
//! `check` runs the evaluator and, when a crossing demands an action,
//! walks the gates in order: master pause, per-garage operation lock,
//! anti-flap window. A passing check acquires the lock and hands the
//! opener call to a background task so geofence checks for other trackers
//! are never blocked by door I/O; the task holds the lock through the
//! cooldown before releasing it.

use crate::domain::types::Action;
use crate::infra::ops::OpsContext;
use crate::services::garage::Garage;
use crate::services::tracker::Tracker;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Because scalar lat and lng arrive in separate messages, an intermediate
/// merged point can sit just across a boundary; crossings that reverse one
/// recorded within this window are debounced.
const FLAP_WINDOW: Duration = Duration::from_secs(10);

/// Lock hold time after an actuation when no cooldown is configured.
const POST_ACTION_LINGER: Duration = Duration::from_secs(5);

/// Retry loop budget. Kept at 1 to avoid rate-limiting upstream
/// controllers; the loop structure stays so the budget can be raised.
const MAX_ATTEMPTS: u32 = 1;

/// Evaluate the tracker against its garage's geofence and actuate if a
/// boundary was crossed.
pub fn check(garage: &Arc<Garage>, tracker: &Arc<Tracker>, ctx: &Arc<OpsContext>) {
    let now = Instant::now();
    let action = {
        let mut state = tracker.state.lock();
        garage.geofence.evaluate(&mut state, now)
    };
    let Some(action) = action else { return };

    if ctx.master_pause() != 0 {
        info!(
            tracker = %tracker.id,
            action = %action,
            "operations are paused, skipping action"
        );
        return;
    }

    if garage.op_lock.load(Ordering::Acquire) {
        debug!(
            garage = garage.index,
            tracker = %tracker.id,
            "operation lock held, skipping action"
        );
        return;
    }

    if !ctx.skip_flap_delay && flap_gate_blocks(tracker, action, now) {
        info!(
            tracker = %tracker.id,
            action = %action,
            "boundary re-crossed within flap window, skipping action"
        );
        return;
    }

    if garage.op_lock.swap(true, Ordering::AcqRel) {
        // another tracker for this garage won the race
        return;
    }

    let garage = garage.clone();
    let tracker = tracker.clone();
    let ctx = ctx.clone();
    tokio::spawn(async move {
        actuate(garage, tracker, ctx, action).await;
    });
}

/// True when the opposite crossing for this action was recorded less than
/// `FLAP_WINDOW` ago.
fn flap_gate_blocks(tracker: &Arc<Tracker>, action: Action, now: Instant) -> bool {
    let state = tracker.state.lock();
    let last = match action {
        Action::Open => state.last_left_open_geo,
        Action::Close => state.last_entered_close_geo,
    };
    matches!(last, Some(t) if now.duration_since(t) < FLAP_WINDOW)
}

async fn actuate(garage: Arc<Garage>, tracker: Arc<Tracker>, ctx: Arc<OpsContext>, action: Action) {
    if garage.geofence.reports_location() {
        let location = tracker.state.lock().current_location;
        info!(
            tracker = %tracker.id,
            action = %action,
            lat = location.lat,
            lng = location.lng,
            "attempting to operate garage door"
        );
    } else {
        info!(tracker = %tracker.id, action = %action, "attempting to operate garage door");
    }

    for attempt in (1..=MAX_ATTEMPTS).rev() {
        match garage.opener.set_state(action).await {
            Ok(()) => break,
            Err(e) => {
                error!(garage = garage.index, error = %e, "failed to operate garage door");
                if attempt == 1 {
                    warn!("no further attempts will be made");
                } else {
                    warn!(remaining = attempt - 1, "retrying garage door operation");
                }
            }
        }
    }

    // hold the lock through the cooldown to prevent flapping from
    // overlapping geofences
    if ctx.cooldown > Duration::ZERO {
        tokio::time::sleep(ctx.cooldown).await;
    } else if !ctx.skip_flap_delay {
        tokio::time::sleep(POST_ACTION_LINGER).await;
    }
    garage.op_lock.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Point, TrackerId};
    use crate::infra::config::{ComplexTopicConfig, TrackerConfig};
    use crate::io::opener::{Opener, OpenerError};
    use crate::services::geofence::{CircularGeofence, Geofence};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records actions instead of talking to a controller.
    struct RecordingOpener {
        actions: Mutex<Vec<Action>>,
    }

    impl RecordingOpener {
        fn new() -> Arc<Self> {
            Arc::new(Self { actions: Mutex::new(Vec::new()) })
        }

        fn actions(&self) -> Vec<Action> {
            self.actions.lock().clone()
        }
    }

    #[async_trait]
    impl Opener for RecordingOpener {
        async fn set_state(&self, action: Action) -> Result<(), OpenerError> {
            self.actions.lock().push(action);
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    fn circular_garage(opener: Arc<dyn Opener>) -> (Arc<Garage>, Arc<Tracker>) {
        let (tracker, _rx) = Tracker::from_config(&TrackerConfig {
            id: TrackerId::from("t1"),
            lat_topic: "t/lat".into(),
            lng_topic: "t/lng".into(),
            zone_topic: String::new(),
            complex_topic: ComplexTopicConfig::default(),
        });
        let geofence = Geofence::Circular(CircularGeofence {
            center: Point::new(40.0, -75.0),
            close_distance: 0.1,
            open_distance: 0.05,
        });
        let garage = Garage::new(0, geofence, opener, vec![tracker.clone()]);
        (garage, tracker)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_close_crossing_actuates_once() {
        let opener = RecordingOpener::new();
        let (garage, tracker) = circular_garage(opener.clone());
        let ctx = OpsContext::new(false, true, 0);

        // tracker starts at the center (distance 0), moves ~0.556 km out
        tracker.state.lock().current_location = Point::new(40.005, -75.0);
        check(&garage, &tracker, &ctx);
        settle().await;

        assert_eq!(opener.actions(), vec![Action::Close]);
        // lock released after the (zero) cooldown
        assert!(!garage.op_lock.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_pause_suppresses_actuation() {
        let opener = RecordingOpener::new();
        let (garage, tracker) = circular_garage(opener.clone());
        let ctx = OpsContext::new(false, true, 0);
        ctx.pause(0).await;

        tracker.state.lock().current_location = Point::new(40.005, -75.0);
        check(&garage, &tracker, &ctx);
        settle().await;

        assert!(opener.actions().is_empty());

        // a fresh crossing after resume actuates normally
        ctx.resume();
        {
            let mut state = tracker.state.lock();
            state.current_location = Point::new(40.0001, -75.0001);
        }
        check(&garage, &tracker, &ctx);
        settle().await;
        assert_eq!(opener.actions(), vec![Action::Open]);
    }

    #[tokio::test]
    async fn test_op_lock_serializes_actuations() {
        let opener = RecordingOpener::new();
        let (garage, tracker) = circular_garage(opener.clone());
        let ctx = OpsContext::new(false, true, 0);

        garage.op_lock.store(true, Ordering::Release);
        tracker.state.lock().current_location = Point::new(40.005, -75.0);
        check(&garage, &tracker, &ctx);
        settle().await;

        assert!(opener.actions().is_empty());
    }

    #[tokio::test]
    async fn test_flap_gate_blocks_quick_reversal() {
        let opener = RecordingOpener::new();
        let (garage, tracker) = circular_garage(opener.clone());
        // flap delay active, no cooldown
        let ctx = OpsContext::new(false, false, 0);

        {
            let mut state = tracker.state.lock();
            // left the open ring moments ago, now crossing back in
            state.cur_distance = 1.0;
            state.current_location = Point::new(40.0001, -75.0001);
            state.last_left_open_geo = Some(Instant::now());
        }
        check(&garage, &tracker, &ctx);
        settle().await;
        assert!(opener.actions().is_empty());

        // an old crossing outside the window does not block
        {
            let mut state = tracker.state.lock();
            state.cur_distance = 1.0;
            state.last_left_open_geo = Some(Instant::now() - Duration::from_secs(11));
        }
        check(&garage, &tracker, &ctx);
        settle().await;
        assert_eq!(opener.actions(), vec![Action::Open]);
    }

    #[tokio::test]
    async fn test_opener_error_still_releases_lock() {
        struct FailingOpener;

        #[async_trait]
        impl Opener for FailingOpener {
            async fn set_state(&self, _action: Action) -> Result<(), OpenerError> {
                Err(OpenerError::Rejected("boom".into()))
            }
            async fn shutdown(&self) {}
        }

        let (garage, tracker) = circular_garage(Arc::new(FailingOpener));
        let ctx = OpsContext::new(false, true, 0);

        tracker.state.lock().current_location = Point::new(40.005, -75.0);
        check(&garage, &tracker, &ctx);
        settle().await;

        assert!(!garage.op_lock.load(Ordering::Acquire));
    }
}
