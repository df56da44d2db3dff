//! Terminal outcome written by an executor.

use serde::{Deserialize, Serialize};

/// Result stored on a finished record.
///
/// Serialized as `{"result": value}` on success and `{"err": error}` on
/// failure, and decoded once when the record is read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// The executor produced a value.
    #[serde(rename = "result")]
    Success(serde_json::Value),
    /// The executor reported an error payload.
    #[serde(rename = "err")]
    Failure(serde_json::Value),
}

impl TaskOutcome {
    /// Whether the executor reported a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}
