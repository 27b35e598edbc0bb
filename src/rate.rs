use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// Fixed-cadence controller for the publish loop.
///
/// The interval is measured from the start of each cycle, so time spent
/// sending is absorbed into the wait instead of drifting the cadence.
pub struct RateController {
    interval: Duration,
    cycle_start: Option<Instant>,
}

impl RateController {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            cycle_start: None,
        }
    }

    /// Mark the start of a cycle.
    pub fn start_cycle(&mut self) {
        self.cycle_start = Some(Instant::now());
    }

    /// Wait until one interval has passed since the last `start_cycle`.
    /// Without a started cycle this waits a full interval.
    pub async fn wait_for_next(&mut self) {
        let from = self.cycle_start.take().unwrap_or_else(Instant::now);
        sleep_until(from + self.interval).await;
    }

    /// Get configured interval between cycles
    pub fn interval(&self) -> Duration {
        self.interval
    }
}
