//! Cancellable background tasks with ordered event delivery.
//!
//! Work runs on the tokio worker pool. Every task gets its own event channel;
//! whoever holds the [`TaskHandle`] is the single consumer of that task's
//! progress, message and outcome events, which arrive in the order the task
//! produced them. Dropping the handle detaches the consumer: the task keeps
//! running and its reports are silently discarded.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::domain::{Error, TaskOutcome};

pub type TaskId = u64;

#[derive(Debug)]
pub enum TaskEvent<T, P> {
    Progress(P),
    Message(String),
    Finished(TaskOutcome<T>),
}

/// The worker side of a task: reports state and observes cancellation.
pub struct TaskContext<T, P> {
    id: TaskId,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<TaskEvent<T, P>>,
}

impl<T, P> TaskContext<T, P> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn report_progress(&self, progress: P) {
        let _ = self.events.send(TaskEvent::Progress(progress));
    }

    pub fn report_message(&self, message: impl Into<String>) {
        let _ = self.events.send(TaskEvent::Message(message.into()));
    }
}

/// The owner side of a task.
pub struct TaskHandle<T, P> {
    id: TaskId,
    cancel: CancellationToken,
    events: mpsc::UnboundedReceiver<TaskEvent<T, P>>,
}

impl<T, P> TaskHandle<T, P> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Requests cooperative cancellation. The task settles at its next check.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, or `None` once the outcome has been delivered.
    pub async fn next_event(&mut self) -> Option<TaskEvent<T, P>> {
        self.events.recv().await
    }

    /// Skips remaining events and waits for the terminal outcome.
    pub async fn outcome(mut self) -> TaskOutcome<T> {
        while let Some(event) = self.events.recv().await {
            if let TaskEvent::Finished(outcome) = event {
                return outcome;
            }
        }
        TaskOutcome::Failed(Error::Internal("task ended without an outcome".to_string()))
    }
}

/// Spawns tasks and keeps track of them so they can all be stopped at shutdown.
#[derive(Clone, Default)]
pub struct TaskRunner {
    root: CancellationToken,
    tracker: TaskTracker,
    next_id: Arc<AtomicU64>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` in the background. Must be called within a tokio runtime.
    pub fn spawn<T, P, F, Fut>(&self, name: &'static str, work: F) -> TaskHandle<T, P>
    where
        T: Send + 'static,
        P: Send + 'static,
        F: FnOnce(TaskContext<T, P>) -> Fut,
        Fut: Future<Output = TaskOutcome<T>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = self.root.child_token();
        let (tx, rx) = mpsc::unbounded_channel();

        let context = TaskContext {
            id,
            cancel: cancel.clone(),
            events: tx.clone(),
        };
        let body = work(context);

        let span = tracing::info_span!("task", task_id = id, task = name);
        self.tracker.spawn(
            async move {
                let outcome = match AssertUnwindSafe(body).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::error!("Task panicked");
                        TaskOutcome::Failed(Error::Internal("task panicked".to_string()))
                    }
                };

                match &outcome {
                    TaskOutcome::Succeeded(_) => tracing::debug!("Task succeeded"),
                    TaskOutcome::Failed(e) => tracing::debug!(error = %e, "Task failed"),
                    TaskOutcome::Cancelled => tracing::debug!("Task cancelled"),
                }
                let _ = tx.send(TaskEvent::Finished(outcome));
            }
            .instrument(span),
        );

        TaskHandle {
            id,
            cancel,
            events: rx,
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Cancels every task and waits until all of them have finished cleaning up.
    pub async fn shutdown(&self) {
        tracing::debug!(active = self.tracker.len(), "Shutting down task runner");
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
