//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; `report()` swaps the windowed counters
//! for the periodic log line while `snapshot()` only loads, so the
//! Prometheus endpoint never resets anything.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::error::PredictError;
use crate::services::engine::Outcome;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
const BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
const NUM_BUCKETS: usize = 11;

/// Rejection kinds in reporting order, matching `PredictError::kind`
pub const REJECTION_KINDS: [&str; 4] =
    ["unknown_gate", "malformed_snapshot", "clock_regression", "not_dispatched"];

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn rejection_index(kind: &str) -> usize {
    REJECTION_KINDS.iter().position(|k| *k == kind).unwrap_or(0)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].swap(0, Ordering::Relaxed))
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Accepted submissions (monotonic)
    submissions_total: AtomicU64,
    /// Accepted submissions since last report (reset on report)
    submissions_since_report: AtomicU64,
    /// Rejections by kind, indexed like `REJECTION_KINDS` (monotonic)
    rejections: [AtomicU64; REJECTION_KINDS.len()],
    dispatches_total: AtomicU64,
    redirects_total: AtomicU64,
    signal_losses_total: AtomicU64,
    advisories_total: AtomicU64,
    /// Explicit in-transit marks (monotonic)
    in_transit_total: AtomicU64,
    /// Sum of evaluation latencies in microseconds (reset on report)
    eval_latency_sum_us: AtomicU64,
    /// Max evaluation latency in microseconds (reset on report)
    eval_latency_max_us: AtomicU64,
    /// Evaluation latency histogram (reset on report)
    eval_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Evaluation latency histogram since startup (Prometheus)
    eval_latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    /// Evaluation latency sum since startup (Prometheus)
    eval_latency_sum_total_us: AtomicU64,
    /// Users with a session (updated by predictor)
    active_users: AtomicU64,
    /// Egress events dropped due to channel full (monotonic)
    egress_dropped: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            submissions_total: AtomicU64::new(0),
            submissions_since_report: AtomicU64::new(0),
            rejections: std::array::from_fn(|_| AtomicU64::new(0)),
            dispatches_total: AtomicU64::new(0),
            redirects_total: AtomicU64::new(0),
            signal_losses_total: AtomicU64::new(0),
            advisories_total: AtomicU64::new(0),
            in_transit_total: AtomicU64::new(0),
            eval_latency_sum_us: AtomicU64::new(0),
            eval_latency_max_us: AtomicU64::new(0),
            eval_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            eval_latency_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            eval_latency_sum_total_us: AtomicU64::new(0),
            active_users: AtomicU64::new(0),
            egress_dropped: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record an accepted submission and its evaluation latency (lock-free)
    #[inline]
    pub fn record_submission(&self, latency_us: u64) {
        self.submissions_total.fetch_add(1, Ordering::Relaxed);
        self.submissions_since_report.fetch_add(1, Ordering::Relaxed);
        self.eval_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.eval_latency_sum_total_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.eval_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.eval_latency_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.eval_latency_max_us, latency_us);
    }

    /// Record the dispatch outcome of an accepted submission
    #[inline]
    pub fn record_outcome(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Unchanged => return,
            Outcome::Committed => &self.dispatches_total,
            Outcome::Redirected => &self.redirects_total,
            Outcome::SignalLost => &self.signal_losses_total,
            Outcome::Advisory => &self.advisories_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected submission or control request
    #[inline]
    pub fn record_rejection(&self, err: &PredictError) {
        self.rejections[rejection_index(err.kind())].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_in_transit(&self) {
        self.in_transit_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_active_users(&self, users: usize) {
        self.active_users.store(users as u64, Ordering::Relaxed);
    }

    /// Record an egress event dropped due to channel full (lock-free)
    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn submissions_total(&self) -> u64 {
        self.submissions_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn rejections(&self, kind: &str) -> u64 {
        self.rejections[rejection_index(kind)].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dispatches_total(&self) -> u64 {
        self.dispatches_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn redirects_total(&self) -> u64 {
        self.redirects_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn signal_losses_total(&self) -> u64 {
        self.signal_losses_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn advisories_total(&self) -> u64 {
        self.advisories_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn egress_dropped(&self) -> u64 {
        self.egress_dropped.load(Ordering::Relaxed)
    }

    /// Cumulative view for exposition; resets nothing
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submissions_total: self.submissions_total(),
            rejections: std::array::from_fn(|i| self.rejections[i].load(Ordering::Relaxed)),
            dispatches_total: self.dispatches_total(),
            redirects_total: self.redirects_total(),
            signal_losses_total: self.signal_losses_total(),
            advisories_total: self.advisories_total(),
            in_transit_total: self.in_transit_total.load(Ordering::Relaxed),
            eval_latency_buckets: load_buckets(&self.eval_latency_buckets_total),
            eval_latency_sum_us: self.eval_latency_sum_total_us.load(Ordering::Relaxed),
            active_users: self.active_users.load(Ordering::Relaxed),
            egress_dropped: self.egress_dropped(),
        }
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let submissions = self.submissions_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.eval_latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.eval_latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.eval_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let submissions_per_sec = if elapsed.as_secs_f64() > 0.0 {
            submissions as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency = if submissions > 0 { latency_sum / submissions } else { 0 };
        let rejections_total =
            self.rejections.iter().map(|r| r.load(Ordering::Relaxed)).sum::<u64>();

        MetricsSummary {
            submissions_total: self.submissions_total(),
            submissions_per_sec,
            rejections_total,
            dispatches_total: self.dispatches_total(),
            redirects_total: self.redirects_total(),
            signal_losses_total: self.signal_losses_total(),
            advisories_total: self.advisories_total(),
            avg_eval_latency_us: avg_latency,
            max_eval_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            active_users: self.active_users.load(Ordering::Relaxed),
            egress_dropped: self.egress_dropped(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for exposition)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

/// Cumulative counters since startup
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub submissions_total: u64,
    /// Indexed like `REJECTION_KINDS`
    pub rejections: [u64; REJECTION_KINDS.len()],
    pub dispatches_total: u64,
    pub redirects_total: u64,
    pub signal_losses_total: u64,
    pub advisories_total: u64,
    pub in_transit_total: u64,
    pub eval_latency_buckets: [u64; NUM_BUCKETS],
    pub eval_latency_sum_us: u64,
    pub active_users: u64,
    pub egress_dropped: u64,
}

/// Windowed view since the previous report
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub submissions_total: u64,
    pub submissions_per_sec: f64,
    pub rejections_total: u64,
    pub dispatches_total: u64,
    pub redirects_total: u64,
    pub signal_losses_total: u64,
    pub advisories_total: u64,
    pub avg_eval_latency_us: u64,
    pub max_eval_latency_us: u64,
    /// Bounds: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub active_users: u64,
    pub egress_dropped: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            submissions_total = %self.submissions_total,
            submissions_per_sec = format!("{:.1}", self.submissions_per_sec),
            rejections_total = %self.rejections_total,
            dispatches = %self.dispatches_total,
            redirects = %self.redirects_total,
            signal_losses = %self.signal_losses_total,
            advisories = %self.advisories_total,
            avg_latency_us = %self.avg_eval_latency_us,
            max_latency_us = %self.max_eval_latency_us,
            p50_us = %self.lat_p50_us,
            p99_us = %self.lat_p99_us,
            active_users = %self.active_users,
            egress_dropped = %self.egress_dropped,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::UserId;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.submissions_total(), 0);
        assert_eq!(metrics.dispatches_total(), 0);
    }

    #[test]
    fn test_record_outcomes() {
        let metrics = Metrics::new();
        metrics.record_outcome(Outcome::Unchanged);
        metrics.record_outcome(Outcome::Committed);
        metrics.record_outcome(Outcome::Redirected);
        metrics.record_outcome(Outcome::Redirected);
        metrics.record_outcome(Outcome::SignalLost);
        metrics.record_outcome(Outcome::Advisory);

        assert_eq!(metrics.dispatches_total(), 1);
        assert_eq!(metrics.redirects_total(), 2);
        assert_eq!(metrics.signal_losses_total(), 1);
        assert_eq!(metrics.advisories_total(), 1);
    }

    #[test]
    fn test_rejections_by_kind() {
        let metrics = Metrics::new();
        let user = UserId::new("u1");
        metrics.record_rejection(&PredictError::ClockRegression {
            user: user.clone(),
            previous: 10,
            attempted: 5,
        });
        metrics.record_rejection(&PredictError::NotDispatched { user });

        assert_eq!(metrics.rejections("clock_regression"), 1);
        assert_eq!(metrics.rejections("not_dispatched"), 1);
        assert_eq!(metrics.rejections("unknown_gate"), 0);
        assert_eq!(metrics.report().rejections_total, 2);
    }

    #[test]
    fn test_report_resets_window_only() {
        let metrics = Metrics::new();
        metrics.record_submission(10);
        metrics.record_submission(20);
        metrics.record_submission(30);

        let summary = metrics.report();
        assert_eq!(summary.submissions_total, 3);
        assert_eq!(summary.avg_eval_latency_us, 20);
        assert_eq!(summary.max_eval_latency_us, 30);

        let summary = metrics.report();
        assert_eq!(summary.submissions_total, 3);
        assert_eq!(summary.avg_eval_latency_us, 0);
        assert_eq!(summary.max_eval_latency_us, 0);

        // Exposition is cumulative
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.eval_latency_buckets.iter().sum::<u64>(), 3);
        assert_eq!(snapshot.eval_latency_sum_us, 60);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(10), 0);
        assert_eq!(bucket_index(11), 1);
        assert_eq!(bucket_index(5120), 9);
        assert_eq!(bucket_index(5121), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_submission(15);
        }
        let summary = metrics.report();
        assert_eq!(summary.lat_p50_us, 20);
        assert_eq!(summary.lat_p99_us, 20);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_submission(i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.submissions_total(), 10_000);
    }
}
