//! Queue manager that dispatches to the configured engine.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use taskhub_core::config::queue::QueueConfig;
use taskhub_core::error::AppError;
use taskhub_core::result::AppResult;
use taskhub_core::types::TaskId;
use taskhub_entity::{Lane, NewTask, TaskOutcome, TaskRecord, TaskState};

use crate::traits::{ListRange, TaskQueue, TaskSubscription};

/// Queue manager that wraps the configured engine.
#[derive(Debug, Clone)]
pub struct QueueManager {
    /// The inner queue engine.
    inner: Arc<dyn TaskQueue>,
}

impl QueueManager {
    /// Create a new queue manager from configuration.
    pub async fn new(config: &QueueConfig) -> AppResult<Self> {
        let inner: Arc<dyn TaskQueue> = match config.provider.as_str() {
            #[cfg(feature = "redis-backend")]
            "redis" => {
                info!("Initializing Redis task queue");
                let poll = std::time::Duration::from_millis(config.subscription_poll_ms);
                Arc::new(crate::redis::RedisTaskQueue::connect(&config.redis, poll).await?)
            }
            #[cfg(feature = "memory")]
            "memory" => {
                info!("Initializing in-memory task queue");
                Arc::new(crate::memory::MemoryTaskQueue::new())
            }
            other => {
                return Err(AppError::configuration(format!(
                    "Unknown queue provider: '{other}'. Supported: memory, redis"
                )));
            }
        };

        Ok(Self { inner })
    }

    /// Create a queue manager from an existing engine (for testing).
    pub fn from_queue(queue: Arc<dyn TaskQueue>) -> Self {
        Self { inner: queue }
    }
}

#[async_trait]
impl TaskQueue for QueueManager {
    async fn create(&self, task: NewTask) -> AppResult<TaskRecord> {
        self.inner.create(task).await
    }

    async fn subscribe(&self, id: TaskId) -> AppResult<TaskSubscription> {
        self.inner.subscribe(id).await
    }

    async fn get(&self, id: TaskId) -> AppResult<Option<TaskRecord>> {
        self.inner.get(id).await
    }

    async fn list_by_state(
        &self,
        lane: Lane,
        state: TaskState,
        range: ListRange,
    ) -> AppResult<Vec<TaskRecord>> {
        self.inner.list_by_state(lane, state, range).await
    }

    async fn remove(&self, id: TaskId) -> AppResult<bool> {
        self.inner.remove(id).await
    }

    async fn fail(&self, id: TaskId) -> AppResult<bool> {
        self.inner.fail(id).await
    }

    async fn claim_next(&self, lane: Lane) -> AppResult<Option<TaskRecord>> {
        self.inner.claim_next(lane).await
    }

    async fn finish(&self, id: TaskId, outcome: TaskOutcome) -> AppResult<bool> {
        self.inner.finish(id, outcome).await
    }

    async fn health_check(&self) -> AppResult<bool> {
        self.inner.health_check().await
    }
}
