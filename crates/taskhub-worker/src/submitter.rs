//! One-off task submission with a completion race against a watchdog.
//!
//! Every submitted task gets a [`TaskHandle`]. The handle resolves with
//! the first of:
//!
//! - the record reaching a terminal state, in which case the stored
//!   outcome decides the result
//! - the watchdog timeout expiring, in which case the record is forced
//!   to `failed` and the handle resolves with no value
//!
//! The handle resolves exactly once; whichever path loses is ignored.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, warn};

use taskhub_core::result::AppResult;
use taskhub_core::types::TaskId;
use taskhub_entity::{NewTask, TaskMeta, TaskOutcome};
use taskhub_queue::{TaskQueue, TaskSubscription};

use crate::router::LaneRouter;

/// Error payload a task's executor reported.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("task reported failure: {0}")]
pub struct TaskFailure(pub Value);

/// What a [`TaskHandle`] resolves to.
///
/// `Ok(None)` covers every outcome without a value: timeouts, removed
/// records, unreadable records, and handlers that returned nothing.
pub type TaskResult = Result<Option<Value>, TaskFailure>;

/// Completion of one submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: Option<TaskId>,
    rx: Option<oneshot::Receiver<TaskResult>>,
}

impl TaskHandle {
    fn pending(task_id: TaskId, rx: oneshot::Receiver<TaskResult>) -> Self {
        Self {
            task_id: Some(task_id),
            rx: Some(rx),
        }
    }

    /// A handle that resolves immediately with no value.
    pub fn resolved() -> Self {
        Self {
            task_id: None,
            rx: None,
        }
    }

    /// ID of the record backing this handle, if one was created.
    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(Ok(None));
        };

        match Pin::new(rx).poll(cx) {
            Poll::Ready(result) => {
                this.rx = None;
                // A dropped watcher (runtime shutdown) resolves empty.
                Poll::Ready(result.unwrap_or(Ok(None)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Parameters of a single submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Logical task type.
    pub event_id: String,
    /// Payload handed to the executor.
    pub context: Value,
    /// Delay before the record becomes eligible.
    pub delay: Option<Duration>,
    /// Marks firings of recurring tasks.
    pub exclusive: bool,
    /// Watchdog timeout; the submitter default applies when absent.
    pub timeout: Option<Duration>,
}

/// Creates task records and watches them to completion.
#[derive(Debug, Clone)]
pub struct TaskSubmitter {
    queue: Arc<dyn TaskQueue>,
    router: LaneRouter,
    default_timeout: Duration,
}

impl TaskSubmitter {
    /// Create a submitter over `queue`.
    pub fn new(queue: Arc<dyn TaskQueue>, router: LaneRouter, default_timeout: Duration) -> Self {
        Self {
            queue,
            router,
            default_timeout,
        }
    }

    /// Create a record for `request` and start watching it.
    ///
    /// The watchdog starts when the record is created, so a delayed task
    /// whose delay exceeds its timeout is failed before it runs.
    pub async fn submit(&self, request: SubmitRequest) -> AppResult<TaskHandle> {
        let lane = self.router.lane_for(&request.event_id);
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let meta = TaskMeta {
            delay_ms: request.delay.map(as_millis).filter(|ms| *ms > 0),
            exclusive: request.exclusive,
            timeout_ms: Some(as_millis(timeout)),
        };

        let record = self
            .queue
            .create(NewTask {
                id: TaskId::new(),
                event_id: request.event_id,
                context: request.context,
                lane,
                meta,
            })
            .await?;
        let task_id = record.id;

        let subscription = match self.queue.subscribe(task_id).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(%task_id, "Failed to subscribe to task, relying on timeout: {}", e);
                None
            }
        };

        debug!(
            %task_id,
            event_id = %record.event_id,
            %lane,
            timeout_ms = as_millis(timeout),
            "Submitted task"
        );

        let (tx, rx) = oneshot::channel();
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            let result = watch_task(queue, task_id, subscription, timeout).await;
            let _ = tx.send(result);
        });

        Ok(TaskHandle::pending(task_id, rx))
    }
}

async fn watch_task(
    queue: Arc<dyn TaskQueue>,
    task_id: TaskId,
    subscription: Option<TaskSubscription>,
    timeout: Duration,
) -> TaskResult {
    let finished = async {
        match subscription {
            // A closed channel means the record is gone; the re-read below
            // resolves that case.
            Some(mut subscription) => {
                let _ = subscription.wait_for(|state| state.is_terminal()).await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = finished => resolve_finished(queue.as_ref(), task_id).await,
        _ = time::sleep(timeout) => {
            debug!(%task_id, "Failed task due to timeout");
            if let Err(e) = queue.fail(task_id).await {
                warn!(%task_id, "Failed to mark timed out task as failed: {}", e);
            }
            Ok(None)
        }
    }
}

async fn resolve_finished(queue: &dyn TaskQueue, task_id: TaskId) -> TaskResult {
    match queue.get(task_id).await {
        Ok(Some(record)) => match record.result {
            Some(TaskOutcome::Failure(err)) => Err(TaskFailure(err)),
            Some(TaskOutcome::Success(Value::Null)) | None => Ok(None),
            Some(TaskOutcome::Success(value)) => Ok(Some(value)),
        },
        Ok(None) => {
            debug!(%task_id, "Task record removed before completion was read");
            Ok(None)
        }
        Err(e) => {
            warn!(%task_id, "Failed to read finished task: {}", e);
            Ok(None)
        }
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
