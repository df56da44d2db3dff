//! Queue engine contract.

use async_trait::async_trait;
use tokio::sync::watch;

use taskhub_core::result::AppResult;
use taskhub_core::types::TaskId;
use taskhub_entity::{Lane, NewTask, TaskOutcome, TaskRecord, TaskState};

/// Observes the state of one record.
///
/// The channel closes when the record is removed (or, for polling
/// engines, once a terminal state has been delivered).
pub type TaskSubscription = watch::Receiver<TaskState>;

/// Ordering of a state listing, by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Oldest first.
    #[default]
    Asc,
    /// Newest first.
    Desc,
}

/// Bounded page of a state listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRange {
    /// Records to skip.
    pub offset: usize,
    /// Maximum records to return.
    pub limit: usize,
    /// Sort order.
    pub order: SortOrder,
}

impl ListRange {
    /// The first `limit` records, oldest first.
    pub fn first(limit: usize) -> Self {
        Self {
            offset: 0,
            limit,
            order: SortOrder::Asc,
        }
    }
}

/// A persistent, multi-consumer task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync + std::fmt::Debug + 'static {
    /// Create a record. A positive `meta.delay_ms` creates it delayed.
    async fn create(&self, task: NewTask) -> AppResult<TaskRecord>;

    /// Observe a record's state transitions.
    async fn subscribe(&self, id: TaskId) -> AppResult<TaskSubscription>;

    /// Read the authoritative record.
    async fn get(&self, id: TaskId) -> AppResult<Option<TaskRecord>>;

    /// List records of one lane in one state.
    async fn list_by_state(
        &self,
        lane: Lane,
        state: TaskState,
        range: ListRange,
    ) -> AppResult<Vec<TaskRecord>>;

    /// Delete a record. Returns `false` if it did not exist.
    async fn remove(&self, id: TaskId) -> AppResult<bool>;

    /// Force a non-terminal record into [`TaskState::Failed`] without a result.
    /// Returns `false` if the record is missing or already terminal.
    async fn fail(&self, id: TaskId) -> AppResult<bool>;

    /// Promote due delayed records of a lane, then move its oldest queued
    /// record to [`TaskState::Active`] and return it.
    async fn claim_next(&self, lane: Lane) -> AppResult<Option<TaskRecord>>;

    /// Store an executor's outcome: success completes the record, failure
    /// fails it. Returns `false` if the record is missing or already terminal.
    async fn finish(&self, id: TaskId, outcome: TaskOutcome) -> AppResult<bool>;

    /// Check that the engine is reachable.
    async fn health_check(&self) -> AppResult<bool>;
}
