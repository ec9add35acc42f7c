//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so the controller, the zone worker and the transition
//! source can record from different tasks without contention.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Time-to-fix bucket boundaries (milliseconds)
/// Buckets: ≤250, ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, >128000
pub const FIX_LATENCY_BOUNDS_MS: [u64; 10] =
    [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000];
pub const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a time-to-fix value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    FIX_LATENCY_BOUNDS_MS.partition_point(|&bound| bound < latency_ms)
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

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Lock-free metrics collector
pub struct Metrics {
    /// EXIT transitions received from the platform
    exits_received: AtomicU64,
    /// ENTER transitions received from the platform
    enters_received: AtomicU64,
    /// Transition payloads discarded (undecodable or error-flagged)
    transitions_discarded: AtomicU64,
    /// Cycles started (initial + exit-triggered)
    cycles_started: AtomicU64,
    /// Exit signals absorbed into an in-flight cycle
    cycles_coalesced: AtomicU64,
    /// Stalled fix requests abandoned for a fresh cycle
    cycles_superseded: AtomicU64,
    /// Cycles aborted because fine location was not granted
    permission_denied: AtomicU64,
    /// Cycles aborted because settings did not satisfy the policy
    settings_failed: AtomicU64,
    /// Location update subscriptions the platform refused
    location_requests_failed: AtomicU64,
    /// Fixes delivered to the controller
    fixes_delivered: AtomicU64,
    /// Time-to-fix histogram (cycle start to fix delivered)
    fix_latency_buckets: [AtomicU64; NUM_BUCKETS],
    fix_latency_sum_ms: AtomicU64,
    fix_latency_max_ms: AtomicU64,
    zone_installs_ok: AtomicU64,
    zone_installs_failed: AtomicU64,
    zone_removes_ok: AtomicU64,
    zone_removes_failed: AtomicU64,
    /// Fix workers currently alive (0 or 1)
    live_workers: AtomicU64,
    started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            exits_received: AtomicU64::new(0),
            enters_received: AtomicU64::new(0),
            transitions_discarded: AtomicU64::new(0),
            cycles_started: AtomicU64::new(0),
            cycles_coalesced: AtomicU64::new(0),
            cycles_superseded: AtomicU64::new(0),
            permission_denied: AtomicU64::new(0),
            settings_failed: AtomicU64::new(0),
            location_requests_failed: AtomicU64::new(0),
            fixes_delivered: AtomicU64::new(0),
            fix_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            fix_latency_sum_ms: AtomicU64::new(0),
            fix_latency_max_ms: AtomicU64::new(0),
            zone_installs_ok: AtomicU64::new(0),
            zone_installs_failed: AtomicU64::new(0),
            zone_removes_ok: AtomicU64::new(0),
            zone_removes_failed: AtomicU64::new(0),
            live_workers: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_exit_received(&self) {
        self.exits_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_enter_received(&self) {
        self.enters_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transition_discarded(&self) {
        self.transitions_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cycle_started(&self) {
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cycle_coalesced(&self) {
        self.cycles_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cycle_superseded(&self) {
        self.cycles_superseded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_permission_denied(&self) {
        self.permission_denied.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_settings_failed(&self) {
        self.settings_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_location_request_failed(&self) {
        self.location_requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fix delivered `latency_ms` after its cycle started
    #[inline]
    pub fn record_fix_delivered(&self, latency_ms: u64) {
        self.fixes_delivered.fetch_add(1, Ordering::Relaxed);
        self.fix_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.fix_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.fix_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_zone_install(&self, ok: bool) {
        if ok {
            self.zone_installs_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.zone_installs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_zone_remove(&self, ok: bool) {
        if ok {
            self.zone_removes_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.zone_removes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn worker_started(&self) {
        self.live_workers.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn worker_stopped(&self) {
        // Saturating: a worker torn down twice must not underflow the gauge
        let _ = self.live_workers.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        });
    }

    pub fn live_workers(&self) -> u64 {
        self.live_workers.load(Ordering::Relaxed)
    }

    pub fn cycles_started(&self) -> u64 {
        self.cycles_started.load(Ordering::Relaxed)
    }

    pub fn fixes_delivered(&self) -> u64 {
        self.fixes_delivered.load(Ordering::Relaxed)
    }

    /// Take a consistent-enough snapshot of all counters
    pub fn report(&self) -> MetricsSummary {
        let fixes = self.fixes_delivered.load(Ordering::Relaxed);
        let latency_sum = self.fix_latency_sum_ms.load(Ordering::Relaxed);
        MetricsSummary {
            uptime_secs: self.started_at.elapsed().as_secs(),
            exits_received: self.exits_received.load(Ordering::Relaxed),
            enters_received: self.enters_received.load(Ordering::Relaxed),
            transitions_discarded: self.transitions_discarded.load(Ordering::Relaxed),
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_coalesced: self.cycles_coalesced.load(Ordering::Relaxed),
            cycles_superseded: self.cycles_superseded.load(Ordering::Relaxed),
            permission_denied: self.permission_denied.load(Ordering::Relaxed),
            settings_failed: self.settings_failed.load(Ordering::Relaxed),
            location_requests_failed: self.location_requests_failed.load(Ordering::Relaxed),
            fixes_delivered: fixes,
            fix_latency_buckets: load_buckets(&self.fix_latency_buckets),
            fix_latency_sum_ms: latency_sum,
            fix_latency_avg_ms: if fixes > 0 { latency_sum / fixes } else { 0 },
            fix_latency_max_ms: self.fix_latency_max_ms.load(Ordering::Relaxed),
            zone_installs_ok: self.zone_installs_ok.load(Ordering::Relaxed),
            zone_installs_failed: self.zone_installs_failed.load(Ordering::Relaxed),
            zone_removes_ok: self.zone_removes_ok.load(Ordering::Relaxed),
            zone_removes_failed: self.zone_removes_failed.load(Ordering::Relaxed),
            live_workers: self.live_workers.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub exits_received: u64,
    pub enters_received: u64,
    pub transitions_discarded: u64,
    pub cycles_started: u64,
    pub cycles_coalesced: u64,
    pub cycles_superseded: u64,
    pub permission_denied: u64,
    pub settings_failed: u64,
    pub location_requests_failed: u64,
    pub fixes_delivered: u64,
    pub fix_latency_buckets: [u64; NUM_BUCKETS],
    pub fix_latency_sum_ms: u64,
    pub fix_latency_avg_ms: u64,
    pub fix_latency_max_ms: u64,
    pub zone_installs_ok: u64,
    pub zone_installs_failed: u64,
    pub zone_removes_ok: u64,
    pub zone_removes_failed: u64,
    pub live_workers: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            exits = %self.exits_received,
            enters = %self.enters_received,
            discarded = %self.transitions_discarded,
            cycles = %self.cycles_started,
            coalesced = %self.cycles_coalesced,
            superseded = %self.cycles_superseded,
            permission_denied = %self.permission_denied,
            settings_failed = %self.settings_failed,
            fixes = %self.fixes_delivered,
            fix_avg_ms = %self.fix_latency_avg_ms,
            fix_max_ms = %self.fix_latency_max_ms,
            installs_ok = %self.zone_installs_ok,
            installs_failed = %self.zone_installs_failed,
            removes_ok = %self.zone_removes_ok,
            removes_failed = %self.zone_removes_failed,
            live_workers = %self.live_workers,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(250), 0);
        assert_eq!(bucket_index(251), 1);
        assert_eq!(bucket_index(128000), 9);
        assert_eq!(bucket_index(500000), 10);
    }

    #[test]
    fn test_fix_latency_summary() {
        let metrics = Metrics::new();
        metrics.record_fix_delivered(300);
        metrics.record_fix_delivered(900);

        let summary = metrics.report();
        assert_eq!(summary.fixes_delivered, 2);
        assert_eq!(summary.fix_latency_sum_ms, 1200);
        assert_eq!(summary.fix_latency_avg_ms, 600);
        assert_eq!(summary.fix_latency_max_ms, 900);
        assert_eq!(summary.fix_latency_buckets[1], 1);
        assert_eq!(summary.fix_latency_buckets[2], 1);
    }

    #[test]
    fn test_worker_gauge_never_underflows() {
        let metrics = Metrics::new();
        metrics.worker_started();
        metrics.worker_stopped();
        metrics.worker_stopped();
        assert_eq!(metrics.live_workers(), 0);
    }

    #[test]
    fn test_zone_counters() {
        let metrics = Metrics::new();
        metrics.record_zone_install(true);
        metrics.record_zone_install(false);
        metrics.record_zone_remove(true);

        let summary = metrics.report();
        assert_eq!(summary.zone_installs_ok, 1);
        assert_eq!(summary.zone_installs_failed, 1);
        assert_eq!(summary.zone_removes_ok, 1);
        assert_eq!(summary.zone_removes_failed, 0);
    }
}
