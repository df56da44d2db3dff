//! Recurring tasks: a local polling loop per event that fires at most one
//! cluster-wide record at a time.
//!
//! Each node that drives recurrence runs its own loop. Before firing, a
//! loop checks the shared `<event>:lastrun` timestamp and the queue for
//! an already scheduled record of the same event. The check and the
//! firing are not atomic; two nodes evaluating the same event at the same
//! instant can both fire. Enabling `exclusive_lease` closes that window
//! with a `set_nx` lease per firing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time;
use tracing::{debug, info, trace, warn};

use taskhub_cache::keys;
use taskhub_core::traits::cache::CacheProvider;

use crate::query::TaskQueryService;
use crate::registry::TaskRegistry;
use crate::submitter::{SubmitRequest, TaskSubmitter};

/// A recurring task definition.
#[derive(Debug, Clone)]
pub struct RecurringTask {
    /// Event ID fired on each run.
    pub event_id: String,
    /// Payload of every firing.
    pub context: Value,
    /// Minimum time between firings.
    pub interval: Duration,
    /// Delay before the first evaluation; defaults to the interval.
    pub delay: Option<Duration>,
    /// Watchdog timeout of every firing.
    pub timeout: Option<Duration>,
}

impl RecurringTask {
    /// Time before the first evaluation.
    pub fn initial_delay(&self) -> Duration {
        [self.delay, Some(self.interval)]
            .into_iter()
            .flatten()
            .find(|d| !d.is_zero())
            .unwrap_or(Duration::from_millis(1))
    }
}

/// Result of evaluating a recurring task once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A record was fired and has settled.
    Fired,
    /// The last firing is more recent than the interval.
    RanRecently,
    /// A record of the event is already delayed, queued, or active.
    AlreadyScheduled,
    /// Another node holds this interval's lease.
    LeaseHeld,
    /// The queue could not be consulted, so nothing was fired.
    Skipped,
}

/// Drives recurring tasks on this node.
#[derive(Debug, Clone)]
pub struct RecurrenceDriver {
    submitter: TaskSubmitter,
    query: TaskQueryService,
    store: Arc<dyn CacheProvider>,
    registry: Arc<TaskRegistry>,
    last_run_ttl: Duration,
    exclusive_lease: bool,
}

impl RecurrenceDriver {
    /// Create a driver.
    pub fn new(
        submitter: TaskSubmitter,
        query: TaskQueryService,
        store: Arc<dyn CacheProvider>,
        registry: Arc<TaskRegistry>,
        last_run_ttl: Duration,
        exclusive_lease: bool,
    ) -> Self {
        Self {
            submitter,
            query,
            store,
            registry,
            last_run_ttl,
            exclusive_lease,
        }
    }

    /// Start a polling loop for `task` unless one already runs for its event.
    ///
    /// Returns `false` if the event was already registered.
    pub fn start(&self, task: RecurringTask) -> bool {
        let Some(entry) = self.registry.try_register(&task.event_id, task.interval) else {
            debug!(event_id = %task.event_id, "Recurring task already registered, skipping");
            return false;
        };

        info!(
            "Registered: {} (every {}ms)",
            task.event_id,
            task.interval.as_millis()
        );

        let driver = self.clone();
        tokio::spawn(async move { driver.run(task, entry.generation).await });
        true
    }

    async fn run(self, task: RecurringTask, generation: u64) {
        time::sleep(task.initial_delay()).await;

        while self.registry.is_current(&task.event_id, generation) {
            let outcome = self.evaluate(&task).await;
            trace!(event_id = %task.event_id, ?outcome, "Evaluated recurring task");
            time::sleep(task.interval).await;
        }

        debug!(event_id = %task.event_id, "Recurring task loop stopped");
    }

    /// Evaluate `task` once: fire a record if none ran within the interval
    /// and none is currently scheduled, then wait for it to settle.
    pub async fn evaluate(&self, task: &RecurringTask) -> CycleOutcome {
        let last_run_key = keys::last_run(&task.event_id);
        let interval_ms = i64::try_from(task.interval.as_millis()).unwrap_or(i64::MAX);

        if let Some(last_run) = self.read_last_run(&last_run_key).await {
            let elapsed = Utc::now().timestamp_millis() - last_run;
            if elapsed < interval_ms {
                trace!(event_id = %task.event_id, elapsed, "Recurring task ran recently");
                return CycleOutcome::RanRecently;
            }
        }

        match self.query.is_scheduled(&task.event_id).await {
            Ok(true) => {
                debug!("Skipping schedule of {} - already scheduled", task.event_id);
                return CycleOutcome::AlreadyScheduled;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(event_id = %task.event_id, "Failed to check for scheduled tasks: {}", e);
                return CycleOutcome::Skipped;
            }
        }

        if self.exclusive_lease && !self.acquire_lease(task).await {
            debug!(event_id = %task.event_id, "Lease held elsewhere, skipping");
            return CycleOutcome::LeaseHeld;
        }

        info!(event_id = %task.event_id, "Firing recurring task");
        let handle = match self
            .submitter
            .submit(SubmitRequest {
                event_id: task.event_id.clone(),
                context: task.context.clone(),
                delay: None,
                exclusive: true,
                timeout: task.timeout,
            })
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(event_id = %task.event_id, "Failed to fire recurring task: {}", e);
                return CycleOutcome::Skipped;
            }
        };

        match handle.await {
            Ok(_) => debug!(event_id = %task.event_id, "Recurring task settled"),
            Err(e) => debug!(event_id = %task.event_id, "Recurring task failed: {}", e),
        }

        let now = Utc::now().timestamp_millis().to_string();
        if let Err(e) = self.store.set(&last_run_key, &now, self.last_run_ttl).await {
            warn!(event_id = %task.event_id, "Failed to record last run: {}", e);
        }

        CycleOutcome::Fired
    }

    /// Last-run timestamp; read errors and unparsable values count as absent.
    async fn read_last_run(&self, key: &str) -> Option<i64> {
        match self.store.get(key).await {
            Ok(value) => value.and_then(|raw| raw.parse().ok()),
            Err(e) => {
                debug!(key, "Failed to read last run: {}", e);
                None
            }
        }
    }

    async fn acquire_lease(&self, task: &RecurringTask) -> bool {
        let key = keys::lease(&task.event_id);
        let now = Utc::now().timestamp_millis().to_string();
        match self.store.set_nx(&key, &now, task.interval).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(event_id = %task.event_id, "Failed to take lease: {}", e);
                false
            }
        }
    }
}
