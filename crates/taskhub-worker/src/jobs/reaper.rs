//! Finished-record cleanup handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::future;
use serde_json::Value;
use tracing;

use taskhub_core::config::ReaperConfig;
use taskhub_entity::{Lane, TaskRecord, TaskState};
use taskhub_queue::{ListRange, TaskQueue};

use crate::executor::{TaskExecutionError, TaskHandler};

/// Removes finished records older than the retention window from both lanes.
#[derive(Debug)]
pub struct ReaperHandler {
    /// Task queue to reap
    queue: Arc<dyn TaskQueue>,
    /// Reaper configuration
    config: ReaperConfig,
}

impl ReaperHandler {
    /// Create a new reaper handler
    pub fn new(queue: Arc<dyn TaskQueue>, config: ReaperConfig) -> Self {
        Self { queue, config }
    }

    /// States whose records are reaped
    fn reaped_states(&self) -> &'static [TaskState] {
        if self.config.include_failed {
            &[TaskState::Complete, TaskState::Failed]
        } else {
            &[TaskState::Complete]
        }
    }

    /// Remove expired finished records. Returns how many were removed.
    ///
    /// Listing or removal errors are logged and skipped; the next run
    /// picks up whatever was missed.
    pub async fn reap(&self) -> usize {
        let retention =
            Duration::from_std(std::time::Duration::from_millis(self.config.retention_ms))
                .unwrap_or(Duration::MAX);
        let range = ListRange::first(self.config.page_size);
        let now = Utc::now();

        let mut expired: Vec<TaskRecord> = Vec::new();
        for lane in Lane::ALL {
            for state in self.reaped_states() {
                match self.queue.list_by_state(lane, *state, range).await {
                    Ok(records) => expired.extend(
                        records
                            .into_iter()
                            .filter(|record| record.age(now) > retention),
                    ),
                    Err(e) => {
                        tracing::warn!("Failed to list {} tasks in {} lane: {}", state, lane, e);
                    }
                }
            }
        }

        let removals = future::join_all(expired.iter().map(|record| async move {
            match self.queue.remove(record.id).await {
                Ok(removed) => removed,
                Err(e) => {
                    tracing::warn!("Failed to remove finished task {}: {}", record.id, e);
                    false
                }
            }
        }))
        .await;

        let removed = removals.into_iter().filter(|removed| *removed).count();
        if removed > 0 {
            tracing::info!("Cleaned up {} finished tasks", removed);
        } else {
            tracing::debug!("No finished tasks to clean up");
        }
        removed
    }
}

#[async_trait]
impl TaskHandler for ReaperHandler {
    fn event_id(&self) -> &str {
        &self.config.event_id
    }

    async fn execute(&self, _task: &TaskRecord) -> Result<Option<Value>, TaskExecutionError> {
        let removed = self.reap().await;
        Ok(Some(serde_json::json!({ "removed": removed })))
    }
}
