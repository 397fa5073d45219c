use std::time::Duration;
use tokio::time::{interval, Instant, Interval};

/// Drives the reconcile loop. Ticks that fall behind are delayed rather than bunched up, so a
/// slow reconcile never causes a burst of catch-up ticks.
pub(crate) struct Timer {
    interval: Interval,
    started: Instant,
}

impl Timer {
    /// The first tick completes immediately.
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Self {
            interval,
            started: Instant::now(),
        }
    }

    /// Wait for the next tick, returning the time elapsed since the timer was created.
    pub async fn tick(&mut self) -> Duration {
        // NOTE: `Interval::tick` yields the scheduled deadline, which lags behind when late.
        self.interval.tick().await;
        self.started.elapsed()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
