//! Key layout of the Redis queue engine.
//!
//! - `<prefix>task:<id>` holds the JSON record.
//! - `<prefix>lane:<lane>:<state>` is a sorted set of task ids. Delayed
//!   records are scored by eligibility time, every other state by
//!   creation time (epoch milliseconds).

use taskhub_core::types::TaskId;
use taskhub_entity::{Lane, TaskRecord, TaskState};

/// Key of a record.
pub fn task(prefix: &str, id: TaskId) -> String {
    format!("{prefix}task:{id}")
}

/// Key of the index holding a lane's records in one state.
pub fn lane_state(prefix: &str, lane: Lane, state: TaskState) -> String {
    format!("{prefix}lane:{lane}:{state}")
}

/// Score of a record in its current state index.
pub fn score(record: &TaskRecord) -> i64 {
    match (record.state, record.run_at) {
        (TaskState::Delayed, Some(run_at)) => run_at.timestamp_millis(),
        _ => record.created_at.timestamp_millis(),
    }
}
