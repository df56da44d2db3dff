//! Task record entity model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use taskhub_core::error::AppError;
use taskhub_core::result::AppResult;
use taskhub_core::types::TaskId;

use super::lane::Lane;
use super::outcome::TaskOutcome;
use super::status::TaskState;

/// Optional scheduling metadata attached at creation.
///
/// A recurrence interval is never part of a record: each firing of a
/// recurring task is its own one-off record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Delay before the record becomes eligible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Set on firings of recurring tasks.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclusive: bool,
    /// Watchdog timeout the submitter armed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// A persisted unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task identifier.
    pub id: TaskId,
    /// Logical task type; routing and dedup key.
    pub event_id: String,
    /// Payload handed to the executor.
    pub context: serde_json::Value,
    /// Lane the record was routed into.
    pub lane: Lane,
    /// Scheduling metadata.
    #[serde(default)]
    pub meta: TaskMeta,
    /// Current state.
    pub state: TaskState,
    /// When a delayed record becomes eligible.
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    /// Outcome written by the executor.
    #[serde(default)]
    pub result: Option<TaskOutcome>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed state.
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Build a fresh record from creation parameters.
    ///
    /// A positive delay puts the record in [`TaskState::Delayed`] until
    /// `now + delay`; otherwise it is immediately [`TaskState::Queued`].
    /// A delay whose eligibility time is not representable is rejected.
    pub fn from_new(new: NewTask, now: DateTime<Utc>) -> AppResult<Self> {
        let delay = new.meta.delay_ms.filter(|ms| *ms > 0);
        let (state, run_at) = match delay {
            Some(ms) => {
                let run_at = i64::try_from(ms)
                    .ok()
                    .and_then(Duration::try_milliseconds)
                    .and_then(|delay| now.checked_add_signed(delay))
                    .ok_or_else(|| {
                        AppError::validation(format!("Task delay of {ms}ms is out of range"))
                    })?;
                (TaskState::Delayed, Some(run_at))
            }
            None => (TaskState::Queued, None),
        };

        Ok(Self {
            id: new.id,
            event_id: new.event_id,
            context: new.context,
            lane: new.lane,
            meta: new.meta,
            state,
            run_at,
            result: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether a delayed record's eligibility time has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Delayed && self.run_at.is_none_or(|at| at <= now)
    }

    /// Time since the record was created.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Time since the record last changed state.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }
}

/// Data required to create a new task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    /// Identifier generated by the submitter.
    pub id: TaskId,
    /// Logical task type.
    pub event_id: String,
    /// Payload handed to the executor.
    pub context: serde_json::Value,
    /// Lane the record is routed into.
    pub lane: Lane,
    /// Scheduling metadata.
    pub meta: TaskMeta,
}
