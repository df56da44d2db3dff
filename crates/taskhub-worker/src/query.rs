//! Lookup of scheduled task records across both lanes.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future;
use tracing::{debug, info, warn};

use taskhub_core::result::AppResult;
use taskhub_entity::{Lane, TaskRecord, TaskState};
use taskhub_queue::{ListRange, TaskQueue};

/// Finds delayed, queued, and active records, optionally filtered by
/// event ID.
///
/// Active records that have not changed state for longer than the
/// staleness threshold are treated as stuck: they are removed and left
/// out of the result. Records of the exempt event (the reaper) are never
/// treated as stuck.
#[derive(Debug, Clone)]
pub struct TaskQueryService {
    queue: Arc<dyn TaskQueue>,
    stale_after: Duration,
    scan_limit: usize,
    exempt_event: String,
}

impl TaskQueryService {
    /// Create a query service over `queue`.
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        stale_after: std::time::Duration,
        scan_limit: usize,
        exempt_event: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            stale_after: Duration::from_std(stale_after).unwrap_or(Duration::MAX),
            scan_limit,
            exempt_event: exempt_event.into(),
        }
    }

    /// Find scheduled records, de-duplicated by task ID.
    pub async fn find_tasks(&self, event_id: Option<&str>) -> AppResult<Vec<TaskRecord>> {
        let (work, push) = future::try_join(
            self.search_lane(Lane::Work, event_id),
            self.search_lane(Lane::Push, event_id),
        )
        .await?;

        let mut seen = HashSet::new();
        Ok(work
            .into_iter()
            .chain(push)
            .filter(|record| seen.insert(record.id))
            .collect())
    }

    /// Whether any scheduled record exists for `event_id`.
    pub async fn is_scheduled(&self, event_id: &str) -> AppResult<bool> {
        Ok(!self.find_tasks(Some(event_id)).await?.is_empty())
    }

    async fn search_lane(&self, lane: Lane, event_id: Option<&str>) -> AppResult<Vec<TaskRecord>> {
        let matches = |record: &TaskRecord| event_id.is_none_or(|id| record.event_id == id);
        let range = ListRange::first(self.scan_limit);

        let mut found = Vec::new();
        for state in [TaskState::Delayed, TaskState::Queued] {
            let records = self.queue.list_by_state(lane, state, range).await?;
            found.extend(records.into_iter().filter(|record| matches(record)));
        }

        let now = Utc::now();
        let mut stale = Vec::new();
        let active = self.queue.list_by_state(lane, TaskState::Active, range).await?;
        for record in active.into_iter().filter(|record| matches(record)) {
            if record.event_id != self.exempt_event && record.idle_for(now) > self.stale_after {
                stale.push(record);
            } else {
                found.push(record);
            }
        }

        if !stale.is_empty() {
            future::join_all(stale.iter().map(|record| self.remove_stale(record))).await;
        }

        debug!(%lane, event_id = event_id.unwrap_or("*"), found = found.len(), "Searched lane");
        Ok(found)
    }

    async fn remove_stale(&self, record: &TaskRecord) {
        info!(
            task_id = %record.id,
            event_id = %record.event_id,
            "Removing stuck active task"
        );
        if let Err(e) = self.queue.remove(record.id).await {
            warn!(task_id = %record.id, "Failed to remove stuck task: {}", e);
        }
    }
}
