//! Scheduler facade: the entry point for submitting, querying, and
//! unscheduling tasks.

use std::sync::Arc;
use std::time::Duration;

use futures::future;
use serde_json::Value;
use tokio::sync::watch;
use tracing;

use taskhub_core::config::scheduler::{RecurringTaskConfig, SchedulerConfig};
use taskhub_core::error::AppError;
use taskhub_core::result::AppResult;
use taskhub_core::traits::cache::CacheProvider;
use taskhub_entity::TaskRecord;
use taskhub_queue::TaskQueue;

use crate::jobs::ReaperHandler;
use crate::query::TaskQueryService;
use crate::recurrence::{RecurrenceDriver, RecurringTask};
use crate::registry::TaskRegistry;
use crate::router::LaneRouter;
use crate::submitter::{SubmitRequest, TaskHandle, TaskSubmitter};

/// A request to run a task once or on an interval.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    /// Logical task type.
    pub event_id: String,
    /// Payload handed to the executor.
    pub context: Value,
    /// Recurrence interval. A zero interval counts as none.
    pub interval: Option<Duration>,
    /// Delay before the record (or the first evaluation) becomes eligible.
    pub delay: Option<Duration>,
    /// Marks the record as a recurring firing.
    pub exclusive: bool,
    /// Watchdog timeout.
    pub timeout: Option<Duration>,
}

impl ScheduleRequest {
    /// A one-off request for `event_id` with an empty context.
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            context: Value::Object(serde_json::Map::new()),
            interval: None,
            delay: None,
            exclusive: false,
            timeout: None,
        }
    }

    /// Set the payload.
    pub fn context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Repeat every `interval`.
    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Delay eligibility by `delay`.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Mark as exclusive.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Set the watchdog timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn recurrence_interval(&self) -> Option<Duration> {
        self.interval.filter(|interval| !interval.is_zero())
    }
}

impl From<&RecurringTaskConfig> for ScheduleRequest {
    fn from(config: &RecurringTaskConfig) -> Self {
        Self {
            event_id: config.event_id.clone(),
            context: config.context.clone(),
            interval: Some(Duration::from_millis(config.interval_ms)),
            delay: config.delay_ms.map(Duration::from_millis),
            exclusive: false,
            timeout: config.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Cluster-aware task scheduler.
///
/// Cheap to clone; every clone shares the same registry and shutdown signal.
#[derive(Debug, Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Debug)]
struct SchedulerInner {
    queue: Arc<dyn TaskQueue>,
    config: SchedulerConfig,
    registry: Arc<TaskRegistry>,
    submitter: TaskSubmitter,
    query: TaskQueryService,
    recurrence: RecurrenceDriver,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    /// Create a scheduler over a shared queue and key-value store.
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn CacheProvider>,
        config: SchedulerConfig,
    ) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let submitter = TaskSubmitter::new(
            Arc::clone(&queue),
            LaneRouter::new(config.push_events.iter().cloned()),
            Duration::from_millis(config.default_timeout_ms),
        );
        let query = TaskQueryService::new(
            Arc::clone(&queue),
            Duration::from_millis(config.stale_active_after_ms),
            config.scan_limit,
            config.reaper.event_id.clone(),
        );
        let recurrence = RecurrenceDriver::new(
            submitter.clone(),
            query.clone(),
            store,
            Arc::clone(&registry),
            Duration::from_secs(config.last_run_ttl_seconds),
            config.exclusive_lease,
        );
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(SchedulerInner {
                queue,
                config,
                registry,
                submitter,
                query,
                recurrence,
                shutdown_tx,
            }),
        }
    }

    /// Start the reaper and the configured recurring tasks.
    pub async fn init(&self) -> AppResult<()> {
        let config = &self.inner.config;
        if config.reaper.interval_ms == 0 {
            return Err(AppError::validation("scheduler.reaper.interval_ms must be positive"));
        }
        if let Some(bad) = config.recurring.iter().find(|task| task.interval_ms == 0) {
            return Err(AppError::validation(format!(
                "Recurring task '{}' needs a positive interval_ms",
                bad.event_id
            )));
        }

        self.schedule(
            ScheduleRequest::new(config.reaper.event_id.clone())
                .every(Duration::from_millis(config.reaper.interval_ms))
                .timeout(Duration::from_millis(config.reaper.timeout_ms)),
        )
        .await?;

        for task in &config.recurring {
            self.schedule(ScheduleRequest::from(task)).await?;
        }

        tracing::info!(
            "Scheduler initialized: role={}, recurring={}",
            config.role,
            self.inner.registry.len()
        );
        Ok(())
    }

    /// Submit a one-off task, or start driving a recurring one.
    ///
    /// A one-off task returns a handle that resolves on completion or
    /// timeout. A recurring request returns an already resolved handle;
    /// on nodes that do not drive recurrence it is accepted and ignored.
    pub async fn schedule(&self, request: ScheduleRequest) -> AppResult<TaskHandle> {
        if request.event_id.is_empty() {
            return Err(AppError::validation("Task event ID must not be empty"));
        }

        let Some(interval) = request.recurrence_interval() else {
            return self
                .inner
                .submitter
                .submit(SubmitRequest {
                    event_id: request.event_id,
                    context: request.context,
                    delay: request.delay,
                    exclusive: request.exclusive,
                    timeout: request.timeout,
                })
                .await;
        };

        if self.inner.config.role.drives_recurrence() {
            self.inner.recurrence.start(RecurringTask {
                event_id: request.event_id,
                context: request.context,
                interval,
                delay: request.delay,
                timeout: request.timeout,
            });
        } else {
            tracing::debug!(
                "Role '{}' does not drive recurring tasks, ignoring '{}'",
                self.inner.config.role,
                request.event_id
            );
        }

        Ok(TaskHandle::resolved())
    }

    /// Stop the local loop for `event_id` and remove its scheduled records.
    ///
    /// Returns how many records were removed.
    pub async fn unschedule(&self, event_id: &str) -> AppResult<usize> {
        if self.inner.registry.remove(event_id) {
            tracing::info!("Unscheduled recurring task '{}'", event_id);
        }

        let tasks = self.inner.query.find_tasks(Some(event_id)).await?;
        Ok(self.remove_all(&tasks).await)
    }

    /// Whether a record of `event_id` is delayed, queued, or active.
    pub async fn is_scheduled(&self, event_id: &str) -> AppResult<bool> {
        self.inner.query.is_scheduled(event_id).await
    }

    /// Scheduled records, optionally filtered by event ID.
    pub async fn get_tasks(&self, event_id: Option<&str>) -> AppResult<Vec<TaskRecord>> {
        self.inner.query.find_tasks(event_id).await
    }

    /// Stop every local loop, signal runners, and remove every scheduled record.
    ///
    /// Returns how many records were removed.
    pub async fn shutdown(&self) -> AppResult<usize> {
        let loops = self.inner.registry.clear();
        self.inner.shutdown_tx.send_replace(true);

        let tasks = self.inner.query.find_tasks(None).await?;
        let removed = self.remove_all(&tasks).await;
        tracing::info!(
            "Scheduler shut down: stopped {} recurring loops, removed {} tasks",
            loops,
            removed
        );
        Ok(removed)
    }

    /// Receiver that flips to `true` on [`Scheduler::shutdown`].
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    /// The handler that reaps finished records for this scheduler.
    pub fn reaper_handler(&self) -> Arc<ReaperHandler> {
        Arc::new(ReaperHandler::new(
            Arc::clone(&self.inner.queue),
            self.inner.config.reaper.clone(),
        ))
    }

    /// Local recurring-task registry.
    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    /// Scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    async fn remove_all(&self, tasks: &[TaskRecord]) -> usize {
        let results = future::join_all(tasks.iter().map(|task| async move {
            match self.inner.queue.remove(task.id).await {
                Ok(removed) => removed,
                Err(e) => {
                    tracing::warn!("Failed to remove task {}: {}", task.id, e);
                    false
                }
            }
        }))
        .await;
        results.into_iter().filter(|removed| *removed).count()
    }
}
