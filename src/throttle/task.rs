//! Queued tasks and the futures callers await on.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::stats::TaskOutcome;
use crate::error::Cancelled;

type TaskFuture = Pin<Box<dyn Future<Output = TaskReport> + Send>>;

/// What the drain loop learns from running a task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TaskReport {
    pub(crate) outcome: TaskOutcome,
    /// False when the caller dropped its `Submission` first
    pub(crate) delivered: bool,
}

/// Message sent back to the submitter.
enum Delivery<T, E> {
    Completed(Result<T, E>),
    Panicked(Box<dyn Any + Send>),
}

/// A type-erased operation plus the channel its outcome goes back on.
pub(crate) struct Task {
    pub(crate) id: u64,
    pub(crate) enqueued_at: Instant,
    run: Box<dyn FnOnce() -> TaskFuture + Send>,
}

impl Task {
    /// Wrap an operation, returning the task and the caller's half.
    pub(crate) fn new<F, Fut, T, E>(id: u64, operation: F) -> (Self, Submission<T, E>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let run = Box::new(move || -> TaskFuture {
            Box::pin(async move {
                // The closure call sits inside the guarded future so a panic
                // while building the operation is caught too.
                let result = AssertUnwindSafe(async move { operation().await })
                    .catch_unwind()
                    .await;

                let (outcome, delivery) = match result {
                    Ok(Ok(value)) => (TaskOutcome::Succeeded, Delivery::Completed(Ok(value))),
                    Ok(Err(err)) => {
                        warn!(task_id = id, error = %err, "Throttled task failed");
                        (TaskOutcome::Failed, Delivery::Completed(Err(err)))
                    }
                    Err(payload) => {
                        error!(
                            task_id = id,
                            panic = %panic_message(payload.as_ref()),
                            "Throttled task panicked"
                        );
                        (TaskOutcome::Panicked, Delivery::Panicked(payload))
                    }
                };

                let delivered = tx.send(delivery).is_ok();
                if !delivered {
                    debug!(task_id = id, "Submission dropped before the task finished");
                }

                TaskReport { outcome, delivered }
            })
        });

        let task = Self {
            id,
            enqueued_at: Instant::now(),
            run,
        };

        (task, Submission { id, rx })
    }

    /// Start the operation.
    pub(crate) fn run(self) -> impl Future<Output = TaskReport> + Send {
        (self.run)()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// The pending result of a submitted operation.
///
/// Resolves to exactly what the operation returned. If the operation
/// panicked, the panic resumes in whoever awaits this future. If the task
/// was dropped without running (the runtime shut down), it resolves to
/// `Err(E::from(Cancelled))`.
///
/// Dropping a `Submission` does not withdraw the task; it still runs and
/// its result is discarded.
#[must_use = "dropping a Submission discards the result but the task still runs"]
pub struct Submission<T, E> {
    id: u64,
    rx: oneshot::Receiver<Delivery<T, E>>,
}

impl<T, E> Submission<T, E> {
    /// Identifier of the task, unique per throttle and increasing in
    /// submission order.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T, E> std::fmt::Debug for Submission<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission").field("id", &self.id).finish()
    }
}

impl<T, E> Future for Submission<T, E>
where
    E: From<Cancelled>,
{
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Delivery::Completed(result))) => Poll::Ready(result),
            Poll::Ready(Ok(Delivery::Panicked(payload))) => std::panic::resume_unwind(payload),
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::from(Cancelled))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_delivers_value() {
        let (task, submission) = Task::new(7, || async { Ok::<_, anyhow::Error>("a") });

        assert_eq!(task.id, 7);
        assert_eq!(submission.id(), 7);

        let report = task.run().await;
        assert_eq!(report.outcome, TaskOutcome::Succeeded);
        assert!(report.delivered);
        assert_eq!(submission.await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_task_delivers_error_unchanged() {
        let (task, submission) =
            Task::new(1, || async { Err::<(), _>(anyhow::anyhow!("boom")) });

        let report = task.run().await;
        assert_eq!(report.outcome, TaskOutcome::Failed);
        assert_eq!(submission.await.unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn test_task_catches_panic_while_building_operation() {
        let (task, submission) = Task::new(2, || -> futures::future::Ready<anyhow::Result<()>> {
            panic!("no future for you")
        });

        let report = task.run().await;
        assert_eq!(report.outcome, TaskOutcome::Panicked);

        let joined = tokio::spawn(submission).await;
        assert!(joined.unwrap_err().is_panic());
    }

    #[tokio::test]
    async fn test_dropped_submission_is_reported() {
        let (task, submission) = Task::new(3, || async { Ok::<_, anyhow::Error>(()) });
        drop(submission);

        let report = task.run().await;
        assert_eq!(report.outcome, TaskOutcome::Succeeded);
        assert!(!report.delivered);
    }

    #[tokio::test]
    async fn test_dropped_task_cancels_submission() {
        let (task, submission) = Task::new(4, || async { Ok::<_, anyhow::Error>(()) });
        drop(task);

        let err = submission.await.unwrap_err();
        assert!(err.downcast_ref::<Cancelled>().is_some());
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "Unknown panic");
    }
}
