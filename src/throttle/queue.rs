//! The request throttle queue.

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info_span, trace, warn, Instrument};

use super::stats::{Counters, ThrottleStats};
use super::task::{Submission, Task};
use super::ThrottleState;
use crate::config::{IntervalAnchor, ThrottleConfig};
use crate::error::{PacerError, Result};

/// Serializes asynchronous operations so that no two start less than
/// `min_interval` apart.
///
/// Operations run one at a time in submission order on a drain loop that is
/// spawned when the first task arrives at an idle throttle and exits once
/// the queue is empty. Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct RequestThrottle {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    config: ThrottleConfig,
    handle: Handle,
    queue: Mutex<QueueState>,
    counters: Counters,
    next_id: AtomicU64,
}

/// Everything the drain loop and `submit` coordinate on. Guarded by a
/// single lock that is never held across an await.
struct QueueState {
    tasks: VecDeque<Task>,
    draining: bool,
    last_request: Option<Instant>,
}

impl RequestThrottle {
    /// Create a throttle driven by the current Tokio runtime.
    pub fn new(config: ThrottleConfig) -> Result<Self> {
        Self::named("default", config)
    }

    /// Create a named throttle driven by the current Tokio runtime.
    ///
    /// The name only shows up in logs and stats.
    pub fn named(name: impl Into<String>, config: ThrottleConfig) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| PacerError::NoRuntime)?;
        Ok(Self::with_handle(name, config, handle))
    }

    /// Create a named throttle whose drain loop runs on `handle`.
    pub fn with_handle(name: impl Into<String>, config: ThrottleConfig, handle: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                handle,
                queue: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    draining: false,
                    last_request: None,
                }),
                counters: Counters::default(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Queue an operation and return a future for its result.
    ///
    /// The task is appended immediately, so the order of `submit` calls is
    /// the order of execution. The returned future resolves to whatever the
    /// operation returned; its error is passed through unchanged.
    pub fn submit<F, Fut, T, E>(&self, operation: F) -> Submission<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (task, submission) = Task::new(id, operation);

        let pending = {
            let mut queue = self.shared.queue.lock();
            queue.tasks.push_back(task);
            queue.tasks.len()
        };
        self.shared.counters.record_submitted();

        trace!(
            throttle = %self.shared.name,
            task_id = id,
            pending = pending,
            "Task queued"
        );

        self.trigger_drain();
        submission
    }

    /// Start a drain loop unless one is already running or there is
    /// nothing to drain. Returns whether a loop was started.
    pub(crate) fn trigger_drain(&self) -> bool {
        {
            let mut queue = self.shared.queue.lock();
            if queue.draining || queue.tasks.is_empty() {
                return false;
            }
            queue.draining = true;
        }

        // If the runtime is already shut down, spawn drops the future and
        // the guard resets the queue right here.
        let guard = DrainGuard {
            shared: Arc::clone(&self.shared),
            finished: false,
        };
        let span = info_span!("throttle.drain", throttle = %self.shared.name);
        self.shared.handle.spawn(drain(guard).instrument(span));
        true
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Configured minimum interval between task starts.
    pub fn min_interval(&self) -> Duration {
        self.shared.config.min_interval()
    }

    /// Configuration this throttle was built with.
    pub fn config(&self) -> ThrottleConfig {
        self.shared.config
    }

    /// Whether a drain loop is running.
    pub fn state(&self) -> ThrottleState {
        if self.shared.queue.lock().draining {
            ThrottleState::Draining
        } else {
            ThrottleState::Idle
        }
    }

    /// Number of tasks waiting to start.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// Snapshot of counters and queue state.
    pub fn stats(&self) -> ThrottleStats {
        let (state, pending) = {
            let queue = self.shared.queue.lock();
            let state = if queue.draining {
                ThrottleState::Draining
            } else {
                ThrottleState::Idle
            };
            (state, queue.tasks.len())
        };

        self.shared
            .counters
            .snapshot(state, pending, self.shared.config.min_interval_ms)
    }
}

impl std::fmt::Debug for RequestThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestThrottle")
            .field("name", &self.shared.name)
            .field("config", &self.shared.config)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Owned by a drain loop. If the loop is dropped before it finishes (the
/// runtime shut down), every queued task is dropped so its `Submission`
/// resolves to `Cancelled`, and the throttle goes back to idle.
struct DrainGuard {
    shared: Arc<Shared>,
    finished: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let abandoned: Vec<Task> = {
            let mut queue = self.shared.queue.lock();
            queue.draining = false;
            queue.tasks.drain(..).collect()
        };

        warn!(
            throttle = %self.shared.name,
            cancelled = abandoned.len(),
            "Drain loop dropped before finishing, cancelling queued tasks"
        );
        // Senders drop outside the lock.
        drop(abandoned);
    }
}

/// Run queued tasks until the queue is empty.
///
/// Only one of these runs per throttle at a time; the `draining` flag is
/// set by `trigger_drain` and cleared here under the same lock that guards
/// the emptiness check, so a concurrent `submit` either lands in this loop
/// or starts the next one.
async fn drain(mut guard: DrainGuard) {
    let shared = Arc::clone(&guard.shared);
    let min_interval = shared.config.min_interval();
    debug!("Drain loop started");

    loop {
        let wait = {
            let mut queue = shared.queue.lock();
            if queue.tasks.is_empty() {
                queue.draining = false;
                guard.finished = true;
                break;
            }
            queue
                .last_request
                .map(|last| min_interval.saturating_sub(last.elapsed()))
                .unwrap_or(Duration::ZERO)
        };

        if !wait.is_zero() {
            trace!(wait_ms = wait.as_millis() as u64, "Waiting for interval");
            tokio::time::sleep(wait).await;
        }

        // Only this loop removes tasks, so the head is still there.
        let next = shared.queue.lock().tasks.pop_front();
        let Some(task) = next else {
            continue;
        };

        let task_id = task.id;
        let queued_for = task.enqueued_at.elapsed();
        let started = Instant::now();
        let report = task.run().await;
        let finished = Instant::now();

        shared.queue.lock().last_request = Some(match shared.config.anchor {
            IntervalAnchor::Completion => finished,
            IntervalAnchor::Start => started,
        });
        shared.counters.record_outcome(report.outcome, report.delivered);

        debug!(
            task_id = task_id,
            outcome = ?report.outcome,
            queued_ms = queued_for.as_millis() as u64,
            ran_ms = (finished - started).as_millis() as u64,
            "Task finished"
        );
    }

    debug!("Drain loop stopped, throttle idle");
}
