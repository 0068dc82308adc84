//! Dispatch-delay health tracking.
//!
//! Observes how far behind its due slot each dispatch runs and logs
//! threshold crossings. The thresholds are observational: nothing here
//! throttles or cancels work, operators watch the logs and the
//! snapshot.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{error, warn};

/// Atomics-backed delay statistics for one iterator.
#[derive(Debug)]
pub struct DelayTracker {
    entity_type: String,
    field_name: String,
    acceptable_ms: i64,
    maximum_ms: i64,
    dispatches: AtomicU64,
    late_dispatches: AtomicU64,
    last_delay_ms: AtomicI64,
    worst_delay_ms: AtomicI64,
}

/// Point-in-time view of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelaySnapshot {
    /// Total dispatches observed.
    pub dispatches: u64,
    /// Dispatches that exceeded the acceptable delay.
    pub late_dispatches: u64,
    /// Delay of the most recent dispatch.
    pub last_delay: Duration,
    /// Worst delay observed so far.
    pub worst_delay: Duration,
}

impl DelayTracker {
    /// Create a tracker with the given alerting thresholds.
    pub fn new(
        entity_type: impl Into<String>,
        field_name: impl Into<String>,
        acceptable: Duration,
        maximum: Duration,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            field_name: field_name.into(),
            acceptable_ms: acceptable.as_millis() as i64,
            maximum_ms: maximum.as_millis() as i64,
            dispatches: AtomicU64::new(0),
            late_dispatches: AtomicU64::new(0),
            last_delay_ms: AtomicI64::new(0),
            worst_delay_ms: AtomicI64::new(0),
        }
    }

    /// Record the delay between a slot's due instant and its dispatch.
    pub fn observe(&self, delay: chrono::Duration) {
        let delay_ms = delay.num_milliseconds().max(0);

        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.last_delay_ms.store(delay_ms, Ordering::Relaxed);
        self.worst_delay_ms.fetch_max(delay_ms, Ordering::Relaxed);

        if delay_ms > self.maximum_ms {
            self.late_dispatches.fetch_add(1, Ordering::Relaxed);
            error!(
                entity_type = %self.entity_type,
                field = %self.field_name,
                delay_ms,
                maximum_ms = self.maximum_ms,
                "dispatch delayed past the maximum check delay"
            );
        } else if delay_ms > self.acceptable_ms {
            self.late_dispatches.fetch_add(1, Ordering::Relaxed);
            warn!(
                entity_type = %self.entity_type,
                field = %self.field_name,
                delay_ms,
                acceptable_ms = self.acceptable_ms,
                "dispatch delayed past the acceptable delay"
            );
        }
    }

    /// Current statistics.
    pub fn snapshot(&self) -> DelaySnapshot {
        DelaySnapshot {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            late_dispatches: self.late_dispatches.load(Ordering::Relaxed),
            last_delay: Duration::from_millis(
                self.last_delay_ms.load(Ordering::Relaxed).max(0) as u64,
            ),
            worst_delay: Duration::from_millis(
                self.worst_delay_ms.load(Ordering::Relaxed).max(0) as u64,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> DelayTracker {
        DelayTracker::new(
            "host",
            "heartbeat",
            Duration::from_millis(100),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_observe_counts_dispatches() {
        let tracker = tracker();
        tracker.observe(chrono::Duration::milliseconds(10));
        tracker.observe(chrono::Duration::milliseconds(20));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.dispatches, 2);
        assert_eq!(snapshot.late_dispatches, 0);
        assert_eq!(snapshot.last_delay, Duration::from_millis(20));
    }

    #[test]
    fn test_worst_delay_is_sticky() {
        let tracker = tracker();
        tracker.observe(chrono::Duration::milliseconds(80));
        tracker.observe(chrono::Duration::milliseconds(30));

        assert_eq!(tracker.snapshot().worst_delay, Duration::from_millis(80));
    }

    #[test]
    fn test_late_dispatches_counted_past_acceptable() {
        let tracker = tracker();
        tracker.observe(chrono::Duration::milliseconds(150));
        tracker.observe(chrono::Duration::milliseconds(600));

        assert_eq!(tracker.snapshot().late_dispatches, 2);
    }

    #[test]
    fn test_negative_delay_clamped_to_zero() {
        let tracker = tracker();
        tracker.observe(chrono::Duration::milliseconds(-50));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.last_delay, Duration::ZERO);
        assert_eq!(snapshot.late_dispatches, 0);
    }
}
