//! Wake protocol counters.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;
use tracing::trace;

/// Process-wide counters, shared as `Arc<WakeMetrics>`.
#[derive(Debug, Default)]
pub struct WakeMetrics {
    wake_requests: AtomicU64,
    wake_leaders: AtomicU64,
    wake_joiners: AtomicU64,
    wake_fast_path: AtomicU64,
    wakes_became_awake: AtomicU64,
    wakes_timed_out: AtomicU64,
    poll_errors: AtomicU64,
    pending_wakes: AtomicI64,
    events_received: AtomicU64,
    events_duplicate: AtomicU64,
    scale_ups: AtomicU64,
    scale_failures: AtomicU64,
    sleeps: AtomicU64,
    sleep_failures: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub wake_requests: u64,
    pub wake_leaders: u64,
    pub wake_joiners: u64,
    pub wake_fast_path: u64,
    pub wakes_became_awake: u64,
    pub wakes_timed_out: u64,
    pub poll_errors: u64,
    pub pending_wakes: i64,
    pub events_received: u64,
    pub events_duplicate: u64,
    pub scale_ups: u64,
    pub scale_failures: u64,
    pub sleeps: u64,
    pub sleep_failures: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl WakeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A caller entered `request_wake`.
    pub fn record_wake_request(&self) {
        bump(&self.wake_requests);
    }

    /// A caller found the workload already awake.
    pub fn record_fast_path(&self) {
        bump(&self.wake_fast_path);
    }

    /// A caller created a new wait group and published a wake event.
    pub fn record_leader(&self) {
        bump(&self.wake_leaders);
        self.pending_wakes.fetch_add(1, Ordering::Relaxed);
    }

    /// A caller joined an existing wait group.
    pub fn record_joiner(&self) {
        bump(&self.wake_joiners);
    }

    /// A wait group resolved.
    pub fn record_resolved(&self, became_awake: bool) {
        if became_awake {
            bump(&self.wakes_became_awake);
        } else {
            bump(&self.wakes_timed_out);
        }
        self.pending_wakes.fetch_sub(1, Ordering::Relaxed);
        trace!(became_awake, "wait group resolved");
    }

    pub fn record_poll_error(&self) {
        bump(&self.poll_errors);
    }

    /// The scaler consumed a wake event.
    pub fn record_event(&self, duplicate: bool) {
        bump(&self.events_received);
        if duplicate {
            bump(&self.events_duplicate);
        }
    }

    pub fn record_scale_up(&self, ok: bool) {
        if ok {
            bump(&self.scale_ups);
        } else {
            bump(&self.scale_failures);
        }
    }

    pub fn record_sleep(&self, ok: bool) {
        if ok {
            bump(&self.sleeps);
        } else {
            bump(&self.sleep_failures);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            wake_requests: load(&self.wake_requests),
            wake_leaders: load(&self.wake_leaders),
            wake_joiners: load(&self.wake_joiners),
            wake_fast_path: load(&self.wake_fast_path),
            wakes_became_awake: load(&self.wakes_became_awake),
            wakes_timed_out: load(&self.wakes_timed_out),
            poll_errors: load(&self.poll_errors),
            pending_wakes: self.pending_wakes.load(Ordering::Relaxed),
            events_received: load(&self.events_received),
            events_duplicate: load(&self.events_duplicate),
            scale_ups: load(&self.scale_ups),
            scale_failures: load(&self.scale_failures),
            sleeps: load(&self.sleeps),
            sleep_failures: load(&self.sleep_failures),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_gauge_tracks_groups() {
        let metrics = WakeMetrics::new();
        metrics.record_leader();
        metrics.record_leader();
        metrics.record_resolved(true);

        let snap = metrics.snapshot();
        assert_eq!(snap.wake_leaders, 2);
        assert_eq!(snap.pending_wakes, 1);
        assert_eq!(snap.wakes_became_awake, 1);
        assert_eq!(snap.wakes_timed_out, 0);
    }

    #[test]
    fn outcome_counters() {
        let metrics = WakeMetrics::new();
        metrics.record_event(false);
        metrics.record_event(true);
        metrics.record_scale_up(true);
        metrics.record_scale_up(false);
        metrics.record_sleep(false);

        let snap = metrics.snapshot();
        assert_eq!(snap.events_received, 2);
        assert_eq!(snap.events_duplicate, 1);
        assert_eq!(snap.scale_ups, 1);
        assert_eq!(snap.scale_failures, 1);
        assert_eq!(snap.sleeps, 0);
        assert_eq!(snap.sleep_failures, 1);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = WakeMetrics::new();
        metrics.record_wake_request();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["wake_requests"], 1);
    }
}
