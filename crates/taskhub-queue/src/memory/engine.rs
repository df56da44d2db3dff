//! Single-process queue engine backed by a map of records.
//!
//! Every record carries a `watch` sender; subscribers see each state
//! transition, and the channel closes when the record is removed.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, watch};
use tracing::debug;

use taskhub_core::result::AppResult;
use taskhub_core::AppError;
use taskhub_core::types::TaskId;
use taskhub_entity::{Lane, NewTask, TaskOutcome, TaskRecord, TaskState};

use crate::traits::{ListRange, SortOrder, TaskQueue, TaskSubscription};

#[derive(Debug)]
struct Slot {
    record: TaskRecord,
    state_tx: watch::Sender<TaskState>,
}

impl Slot {
    fn transition(&mut self, state: TaskState, now: DateTime<Utc>) {
        self.record.state = state;
        self.record.updated_at = now;
        self.state_tx.send_replace(state);
    }
}

/// In-memory [`TaskQueue`].
#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    slots: RwLock<HashMap<TaskId, Slot>>,
}

impl MemoryTaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held, in any state.
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Whether the queue holds no records.
    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn create(&self, task: NewTask) -> AppResult<TaskRecord> {
        let record = TaskRecord::from_new(task, Utc::now())?;
        let (state_tx, _) = watch::channel(record.state);

        let mut slots = self.slots.write().await;
        if slots.contains_key(&record.id) {
            return Err(AppError::validation(format!(
                "Task {} already exists",
                record.id
            )));
        }
        slots.insert(
            record.id,
            Slot {
                record: record.clone(),
                state_tx,
            },
        );

        debug!(
            task_id = %record.id,
            event_id = %record.event_id,
            lane = %record.lane,
            state = %record.state,
            "Created task record"
        );
        Ok(record)
    }

    async fn subscribe(&self, id: TaskId) -> AppResult<TaskSubscription> {
        let slots = self.slots.read().await;
        slots
            .get(&id)
            .map(|slot| slot.state_tx.subscribe())
            .ok_or_else(|| AppError::not_found(format!("Task {id} not found")))
    }

    async fn get(&self, id: TaskId) -> AppResult<Option<TaskRecord>> {
        let slots = self.slots.read().await;
        Ok(slots.get(&id).map(|slot| slot.record.clone()))
    }

    async fn list_by_state(
        &self,
        lane: Lane,
        state: TaskState,
        range: ListRange,
    ) -> AppResult<Vec<TaskRecord>> {
        let slots = self.slots.read().await;
        let mut records: Vec<TaskRecord> = slots
            .values()
            .filter(|slot| slot.record.lane == lane && slot.record.state == state)
            .map(|slot| slot.record.clone())
            .collect();
        drop(slots);

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if range.order == SortOrder::Desc {
            records.reverse();
        }

        Ok(records
            .into_iter()
            .skip(range.offset)
            .take(range.limit)
            .collect())
    }

    async fn remove(&self, id: TaskId) -> AppResult<bool> {
        let removed = self.slots.write().await.remove(&id);
        Ok(removed.is_some())
    }

    async fn fail(&self, id: TaskId) -> AppResult<bool> {
        let mut slots = self.slots.write().await;
        match slots.get_mut(&id) {
            Some(slot) if !slot.record.state.is_terminal() => {
                slot.transition(TaskState::Failed, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_next(&self, lane: Lane) -> AppResult<Option<TaskRecord>> {
        let now = Utc::now();
        let mut slots = self.slots.write().await;

        for slot in slots.values_mut() {
            if slot.record.lane == lane && slot.record.is_due(now) {
                slot.transition(TaskState::Queued, now);
            }
        }

        let next = slots
            .values()
            .filter(|slot| slot.record.lane == lane && slot.record.state == TaskState::Queued)
            .min_by(|a, b| {
                a.record
                    .created_at
                    .cmp(&b.record.created_at)
                    .then(a.record.id.cmp(&b.record.id))
            })
            .map(|slot| slot.record.id);

        Ok(next.and_then(|id| {
            slots.get_mut(&id).map(|slot| {
                slot.transition(TaskState::Active, now);
                slot.record.clone()
            })
        }))
    }

    async fn finish(&self, id: TaskId, outcome: TaskOutcome) -> AppResult<bool> {
        let mut slots = self.slots.write().await;
        match slots.get_mut(&id) {
            Some(slot) if !slot.record.state.is_terminal() => {
                let state = if outcome.is_failure() {
                    TaskState::Failed
                } else {
                    TaskState::Complete
                };
                slot.record.result = Some(outcome);
                slot.transition(state, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}
