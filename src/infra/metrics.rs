//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Lock-free metrics collector
pub struct Metrics {
    /// Total events recorded by this device (monotonic)
    events_recorded: AtomicU64,
    /// Duplicate inserts suppressed as already-recorded (monotonic)
    duplicates_suppressed: AtomicU64,
    /// Record attempts rejected by validation (monotonic)
    records_rejected: AtomicU64,
    /// CDC rows folded into the book (monotonic)
    cdc_applied: AtomicU64,
    /// CDC rows discarded (other driver, stale day, non-insert) (monotonic)
    cdc_discarded: AtomicU64,
    /// CDC/actions dropped because the tracker channel was full (monotonic)
    channel_dropped: AtomicU64,
    /// Notifications pushed successfully (monotonic)
    notifications_sent: AtomicU64,
    /// Notification pushes that failed (monotonic)
    notifications_failed: AtomicU64,
    /// Geofence zone triggers raised (monotonic)
    geofence_triggers: AtomicU64,
    /// Position pings evaluated (monotonic)
    position_pings: AtomicU64,
    /// Events processed since last report (reset on report)
    events_since_report: AtomicU64,
    /// Start of the current reporting window
    window_start: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_recorded: AtomicU64::new(0),
            duplicates_suppressed: AtomicU64::new(0),
            records_rejected: AtomicU64::new(0),
            cdc_applied: AtomicU64::new(0),
            cdc_discarded: AtomicU64::new(0),
            channel_dropped: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            geofence_triggers: AtomicU64::new(0),
            position_pings: AtomicU64::new(0),
            events_since_report: AtomicU64::new(0),
            window_start: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_event_recorded(&self) {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
        self.events_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_duplicate_suppressed(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cdc_applied(&self) {
        self.cdc_applied.fetch_add(1, Ordering::Relaxed);
        self.events_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cdc_discarded(&self) {
        self.cdc_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_channel_dropped(&self) {
        self.channel_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification(&self, sent: bool) {
        if sent {
            self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_geofence_trigger(&self) {
        self.geofence_triggers.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_ping(&self) {
        self.position_pings.fetch_add(1, Ordering::Relaxed);
    }

    /// Produce a snapshot and reset the per-window counters
    pub fn report(&self) -> MetricsSummary {
        let mut window_start = self.window_start.lock();
        let elapsed = window_start.elapsed().as_secs_f64().max(0.001);
        *window_start = Instant::now();
        drop(window_start);

        let window_events = self.events_since_report.swap(0, Ordering::Relaxed);

        MetricsSummary {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            cdc_applied: self.cdc_applied.load(Ordering::Relaxed),
            cdc_discarded: self.cdc_discarded.load(Ordering::Relaxed),
            channel_dropped: self.channel_dropped.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            geofence_triggers: self.geofence_triggers.load(Ordering::Relaxed),
            position_pings: self.position_pings.load(Ordering::Relaxed),
            events_per_sec: window_events as f64 / elapsed,
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSummary {
    pub events_recorded: u64,
    pub duplicates_suppressed: u64,
    pub records_rejected: u64,
    pub cdc_applied: u64,
    pub cdc_discarded: u64,
    pub channel_dropped: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub geofence_triggers: u64,
    pub position_pings: u64,
    pub events_per_sec: f64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events_recorded = %self.events_recorded,
            duplicates_suppressed = %self.duplicates_suppressed,
            records_rejected = %self.records_rejected,
            cdc_applied = %self.cdc_applied,
            cdc_discarded = %self.cdc_discarded,
            channel_dropped = %self.channel_dropped,
            notifications_sent = %self.notifications_sent,
            notifications_failed = %self.notifications_failed,
            geofence_triggers = %self.geofence_triggers,
            events_per_sec = %format!("{:.1}", self.events_per_sec),
            "metrics_report"
        );
    }
}
