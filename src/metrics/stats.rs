use hdrhistogram::Histogram;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Send counters and send-latency histogram for the publish loop
pub struct Stats {
    // Send latency in microseconds, 1us to 60s, 3 significant digits
    latency_hist: RwLock<Histogram<u64>>,

    // Counters
    pub cycle_count: RwLock<u64>,
    pub sent_count: RwLock<u64>,
    pub error_count: RwLock<u64>,

    // Timing
    start_time: Instant,
    last_snapshot: RwLock<(Instant, u64)>,
}

impl Stats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            latency_hist: RwLock::new(
                Histogram::new_with_bounds(1, 60_000_000, 3).expect("static histogram bounds"),
            ),
            cycle_count: RwLock::new(0),
            sent_count: RwLock::new(0),
            error_count: RwLock::new(0),
            start_time: now,
            last_snapshot: RwLock::new((now, 0)),
        }
    }

    /// Record a successful send and how long it took
    pub async fn record_sent(&self, latency: Duration) {
        *self.sent_count.write().await += 1;
        let us = (latency.as_micros() as u64).max(1);
        let _ = self.latency_hist.write().await.record(us);
    }

    /// Record a failed send
    pub async fn record_error(&self) {
        *self.error_count.write().await += 1;
    }

    /// Record a completed cycle (both sends succeeded)
    pub async fn record_cycle(&self) {
        *self.cycle_count.write().await += 1;
    }

    /// Get current snapshot of statistics
    pub async fn snapshot(&self) -> StatsSnapshot {
        let now = Instant::now();
        let cycles = *self.cycle_count.read().await;
        let sent = *self.sent_count.read().await;
        let errors = *self.error_count.read().await;

        let hist = self.latency_hist.read().await;
        let (p50, p95, p99, max, mean) = if hist.is_empty() {
            (0, 0, 0, 0, 0.0)
        } else {
            (
                hist.value_at_quantile(0.5),
                hist.value_at_quantile(0.95),
                hist.value_at_quantile(0.99),
                hist.max(),
                hist.mean(),
            )
        };
        drop(hist);

        let (interval, interval_sent) = {
            let mut last = self.last_snapshot.write().await;
            let interval = now.duration_since(last.0);
            let interval_sent = sent - last.1;
            *last = (now, sent);
            (interval, interval_sent)
        };

        StatsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            cycles,
            sent_count: sent,
            error_count: errors,
            elapsed_secs: now.duration_since(self.start_time).as_secs_f64(),
            interval_secs: interval.as_secs_f64(),
            interval_sent_count: interval_sent,
            latency_us_p50: p50,
            latency_us_p95: p95,
            latency_us_p99: p99,
            latency_us_max: max,
            latency_us_mean: mean,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view; one CSV row per snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub timestamp: String,
    pub cycles: u64,
    pub sent_count: u64,
    pub error_count: u64,
    pub elapsed_secs: f64,
    pub interval_secs: f64,
    pub interval_sent_count: u64,
    pub latency_us_p50: u64,
    pub latency_us_p95: u64,
    pub latency_us_p99: u64,
    pub latency_us_max: u64,
    pub latency_us_mean: f64,
}

impl StatsSnapshot {
    /// Average send rate over the whole run
    pub fn avg_send_rate(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.sent_count as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }

    /// Send rate since the previous snapshot
    pub fn interval_send_rate(&self) -> f64 {
        if self.interval_secs > 0.0 {
            self.interval_sent_count as f64 / self.interval_secs
        } else {
            0.0
        }
    }
}
