//! Throttle statistics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::ThrottleState;

/// Counters updated by `submit` and the drain loop.
///
/// Counts use atomics so reading stats never contends with the queue lock.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    abandoned: AtomicU64,
    last_request_at: Mutex<Option<DateTime<Utc>>>,
}

/// How a single task ended, as seen by the drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Succeeded,
    Failed,
    Panicked,
}

impl Counters {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, outcome: TaskOutcome, delivered: bool) {
        let counter = match outcome {
            TaskOutcome::Succeeded => &self.succeeded,
            TaskOutcome::Failed => &self.failed,
            TaskOutcome::Panicked => &self.panicked,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if !delivered {
            self.abandoned.fetch_add(1, Ordering::Relaxed);
        }

        *self.last_request_at.lock() = Some(Utc::now());
    }

    pub(crate) fn snapshot(&self, state: ThrottleState, pending: usize, min_interval_ms: u64) -> ThrottleStats {
        ThrottleStats {
            state,
            pending,
            min_interval_ms,
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            last_request_at: *self.last_request_at.lock(),
        }
    }
}

/// Point-in-time view of a throttle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleStats {
    /// Whether a drain loop is running
    pub state: ThrottleState,
    /// Tasks waiting to run
    pub pending: usize,
    /// Configured minimum interval
    pub min_interval_ms: u64,
    /// Tasks accepted by `submit`
    pub submitted: u64,
    /// Tasks whose operation returned `Ok`
    pub succeeded: u64,
    /// Tasks whose operation returned `Err`
    pub failed: u64,
    /// Tasks whose operation panicked
    pub panicked: u64,
    /// Finished tasks whose caller had already dropped its submission
    pub abandoned: u64,
    /// Wall-clock time the most recent task finished. Always the
    /// completion time, independent of the lane's interval anchor.
    pub last_request_at: Option<DateTime<Utc>>,
}

impl ThrottleStats {
    /// Tasks that have finished, whatever the outcome.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.panicked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = Counters::default();

        counters.record_submitted();
        counters.record_submitted();
        counters.record_submitted();
        counters.record_outcome(TaskOutcome::Succeeded, true);
        counters.record_outcome(TaskOutcome::Failed, false);

        let stats = counters.snapshot(ThrottleState::Draining, 1, 1000);

        assert_eq!(stats.state, ThrottleState::Draining);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.panicked, 0);
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.completed(), 2);
        assert!(stats.last_request_at.is_some());
    }

    #[test]
    fn test_fresh_counters_have_no_last_request() {
        let stats = Counters::default().snapshot(ThrottleState::Idle, 0, 250);

        assert_eq!(stats.completed(), 0);
        assert_eq!(stats.min_interval_ms, 250);
        assert!(stats.last_request_at.is_none());
    }

    #[test]
    fn test_stats_serialize_state_lowercase() {
        let stats = Counters::default().snapshot(ThrottleState::Idle, 0, 1000);
        let json = serde_json::to_value(&stats).unwrap();

        assert_eq!(json["state"], "idle");
        assert_eq!(json["min_interval_ms"], 1000);
    }
}
