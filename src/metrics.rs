use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window of latency samples
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    samples: Arc<Mutex<VecDeque<u64>>>,
    window: usize,
}

impl PercentileTracker {
    /// Create a tracker that keeps the latest `window` samples
    pub fn new(window: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(window))),
            window,
        }
    }

    /// Record a sample in nanoseconds
    pub fn record(&self, nanos: u64) {
        let mut samples = self.samples.lock();
        if samples.len() >= self.window {
            samples.pop_front();
        }
        samples.push_back(nanos);
    }

    /// Percentile `p` (0.0-1.0) of the window, in microseconds
    pub fn percentile_us(&self, p: f64) -> f64 {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<_> = samples.iter().copied().collect();
        drop(samples);
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx.min(sorted.len() - 1)] as f64 / 1000.0
    }

    pub fn count(&self) -> usize {
        self.samples.lock().len()
    }
}

/// Counters for one consumer role.
///
/// Clones share the same counters, so the pipeline can keep a handle while the
/// consumer thread records into its own.
#[derive(Debug, Clone)]
pub struct RoleMetrics {
    claimed: Arc<AtomicU64>,
    /// Times the role parked behind a head it did not own
    not_owned: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
    apply_latency: PercentileTracker,
    start_time: Instant,
}

impl RoleMetrics {
    pub fn new() -> Self {
        Self {
            claimed: Arc::new(AtomicU64::new(0)),
            not_owned: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
            apply_latency: PercentileTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    pub fn record_claimed(&self) {
        self.claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_owned(&self) {
        self.not_owned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one `apply` call took
    pub fn record_latency(&self, elapsed: Duration) {
        self.apply_latency.record(elapsed.as_nanos() as u64);
    }

    pub fn total_claimed(&self) -> u64 {
        self.claimed.load(Ordering::Relaxed)
    }

    pub fn total_not_owned(&self) -> u64 {
        self.not_owned.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Claimed records per second since creation
    pub fn throughput_rps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_claimed() as f64 / elapsed
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            claimed: self.total_claimed(),
            not_owned: self.total_not_owned(),
            failures: self.total_failures(),
            throughput_rps: self.throughput_rps(),
            latency_p50_us: self.apply_latency.percentile_us(0.50),
            latency_p95_us: self.apply_latency.percentile_us(0.95),
            latency_p99_us: self.apply_latency.percentile_us(0.99),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for RoleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of role metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub claimed: u64,
    pub not_owned: u64,
    pub failures: u64,
    pub throughput_rps: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a single human-readable line
    pub fn format(&self) -> String {
        format!(
            "Claimed: {}, Parked: {}, Failed: {}, Throughput: {:.2} rec/s, \
             Apply P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.claimed,
            self.not_owned,
            self.failures,
            self.throughput_rps,
            self.latency_p50_us,
            self.latency_p95_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_tracker() {
        let tracker = PercentileTracker::new(10);
        for i in 1..=10 {
            tracker.record(i * 1000);
        }
        assert_eq!(tracker.percentile_us(0.5), 5.0);
        assert_eq!(tracker.percentile_us(0.99), 10.0);
        assert_eq!(tracker.count(), 10);
    }

    #[test]
    fn test_tracker_window_evicts_oldest() {
        let tracker = PercentileTracker::new(2);
        tracker.record(1_000_000);
        tracker.record(1000);
        tracker.record(2000);
        assert_eq!(tracker.count(), 2);
        assert_eq!(tracker.percentile_us(1.0), 2.0);
    }

    #[test]
    fn test_role_metrics_shared_between_clones() {
        let metrics = RoleMetrics::new();
        let handle = metrics.clone();
        for _ in 0..3 {
            metrics.record_claimed();
            metrics.record_latency(Duration::from_micros(4));
        }
        metrics.record_not_owned();
        metrics.record_failure();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.claimed, 3);
        assert_eq!(snapshot.not_owned, 1);
        assert_eq!(snapshot.failures, 1);
        assert!(snapshot.format().contains("Claimed: 3"));
    }
}
