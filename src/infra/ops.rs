//! Process-wide operating state
//!
//! A single `OpsContext` is built at startup and handed to every task that
//! needs it; there are no hidden globals. The master pause register is
//! written by the pause-countdown task and the HTTP handlers; everything
//! else only reads it, re-sampling at each decision point.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::info;

/// Master pause register values: 0 = operating, <0 = paused indefinitely,
/// >0 = seconds of finite pause remaining.
pub struct OpsContext {
    master_pause: AtomicI64,
    /// Suppress all opener actuation; log "would have" lines instead.
    pub testing: bool,
    /// GDO_SKIP_FLAP_DELAY=true disables the anti-flap gate and the
    /// post-action linger.
    pub skip_flap_delay: bool,
    /// Operation-lock hold time after each actuation.
    pub cooldown: Duration,
    pause_tx: mpsc::Sender<i64>,
    pause_rx: tokio::sync::Mutex<mpsc::Receiver<i64>>,
}

impl OpsContext {
    pub fn new(testing: bool, skip_flap_delay: bool, cooldown_minutes: u64) -> Arc<Self> {
        let (pause_tx, pause_rx) = mpsc::channel(1);
        Arc::new(Self {
            master_pause: AtomicI64::new(0),
            testing,
            skip_flap_delay,
            cooldown: Duration::from_secs(cooldown_minutes * 60),
            pause_tx,
            pause_rx: tokio::sync::Mutex::new(pause_rx),
        })
    }

    pub fn master_pause(&self) -> i64 {
        self.master_pause.load(Ordering::Relaxed)
    }

    /// Pause garage operations, either indefinitely (duration <= 0) or for
    /// a finite number of seconds. Tracking and geofence awareness keep
    /// running; only actuation is disabled.
    ///
    /// A finite pause starts a countdown task that decrements the register
    /// once per second and accepts overrides (new durations or a resume)
    /// through the pause channel.
    pub async fn pause(self: &Arc<Self>, duration: i64) {
        let duration = if duration == 0 { -1 } else { duration };
        if duration > 0 {
            info!(
                seconds = duration,
                "pausing operations, use /resume to resume sooner"
            );
        } else {
            info!("pausing operations indefinitely, use /resume to resume");
        }

        // a finite countdown is already running, hand it the new duration
        if self.master_pause() > 0 {
            let _ = self.pause_tx.send(duration).await;
            return;
        }
        self.master_pause.store(duration, Ordering::Relaxed);

        if duration > 0 {
            let ctx = self.clone();
            tokio::spawn(async move {
                ctx.run_pause_countdown().await;
            });
        }
    }

    async fn run_pause_countdown(self: Arc<Self>) {
        // only one countdown runs at a time; it holds the receiver for its
        // whole lifetime
        let mut rx = self.pause_rx.lock().await;
        while self.master_pause() > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;

            // non-blocking check for an override from /pause or /resume
            match rx.try_recv() {
                Ok(msg) => {
                    self.master_pause.store(msg, Ordering::Relaxed);
                    if msg <= 0 {
                        // indefinite pause (<0) or resume (=0); the
                        // countdown is no longer needed
                        return;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
            self.master_pause.fetch_sub(1, Ordering::Relaxed);
        }
        info!("pause timeout reached, resuming operations");
        self.master_pause.store(0, Ordering::Relaxed);
    }

    /// Resume garage operations immediately.
    pub fn resume(self: &Arc<Self>) {
        info!("resuming operations");
        let current = self.master_pause();
        if current > 0 {
            // signal the countdown task; sent from a task because the
            // channel is only drained once per second
            let ctx = self.clone();
            tokio::spawn(async move {
                let _ = ctx.pause_tx.send(0).await;
            });
        } else if current < 0 {
            self.master_pause.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_indefinite_pause_and_resume() {
        let ctx = OpsContext::new(false, false, 0);
        assert_eq!(ctx.master_pause(), 0);

        ctx.pause(0).await;
        assert_eq!(ctx.master_pause(), -1);

        ctx.resume();
        assert_eq!(ctx.master_pause(), 0);
    }

    #[tokio::test]
    async fn test_explicit_indefinite_pause() {
        let ctx = OpsContext::new(false, false, 0);
        ctx.pause(-5).await;
        assert_eq!(ctx.master_pause(), -5);
        ctx.resume();
        assert_eq!(ctx.master_pause(), 0);
    }

    #[tokio::test]
    async fn test_finite_pause_counts_down() {
        let ctx = OpsContext::new(false, false, 0);
        ctx.pause(2).await;
        assert!(ctx.master_pause() > 0);

        // countdown ticks once per second; after ~2.5s it must be done
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(ctx.master_pause(), 0);
    }

    #[tokio::test]
    async fn test_resume_cancels_finite_pause() {
        let ctx = OpsContext::new(false, false, 0);
        ctx.pause(600).await;
        assert_eq!(ctx.master_pause(), 600);

        ctx.resume();
        // the countdown drains the channel on its next 1s tick
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(ctx.master_pause(), 0);
    }

    #[tokio::test]
    async fn test_new_duration_overrides_running_countdown() {
        let ctx = OpsContext::new(false, false, 0);
        ctx.pause(600).await;
        ctx.pause(-1).await; // override with indefinite
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(ctx.master_pause(), -1);
    }

    #[test]
    fn test_cooldown_minutes() {
        let ctx = OpsContext::new(false, false, 3);
        assert_eq!(ctx.cooldown, Duration::from_secs(180));
    }
}
