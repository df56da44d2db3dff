//! Task record state enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a task record. Owned and mutated by the queue engine and
/// its executors; the scheduler only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting for its delay to elapse.
    Delayed,
    /// Eligible, waiting for an executor to claim it.
    Queued,
    /// Claimed by an executor.
    Active,
    /// Finished; the executor's outcome is stored on the record.
    Complete,
    /// Failed, either reported by the executor or forced by a watchdog.
    Failed,
}

impl TaskState {
    /// States a record can be in while it still counts as scheduled.
    pub const PENDING: [TaskState; 3] = [Self::Delayed, Self::Queued, Self::Active];

    /// Check if the record reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Return the state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delayed => "delayed",
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
