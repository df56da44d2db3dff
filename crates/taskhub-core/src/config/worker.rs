//! Worker runner configuration.

use serde::{Deserialize, Serialize};

/// Worker runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent task executions per lane.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Interval in milliseconds between lane polls when idle.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How long shutdown waits for in-flight executions, in seconds.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            drain_timeout_seconds: default_drain_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    500
}

fn default_drain_timeout() -> u64 {
    30
}
