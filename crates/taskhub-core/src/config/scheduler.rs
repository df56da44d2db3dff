//! Scheduler configuration: routing, timeouts, staleness, reaping, and
//! the recurring tasks a node drives on startup.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which duties a node takes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Serves both lanes and drives recurring tasks.
    #[default]
    Combined,
    /// Serves the work lane and drives recurring tasks.
    Worker,
    /// Serves the push lane only.
    Pusher,
    /// Submits and queries only.
    Client,
}

impl NodeRole {
    /// Whether this node runs an executor for the work lane.
    pub fn serves_work(&self) -> bool {
        matches!(self, Self::Combined | Self::Worker)
    }

    /// Whether this node runs an executor for the push lane.
    pub fn serves_push(&self) -> bool {
        matches!(self, Self::Combined | Self::Pusher)
    }

    /// Whether recurring tasks get a local polling loop on this node.
    pub fn drives_recurrence(&self) -> bool {
        self.serves_work()
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Combined => write!(f, "combined"),
            Self::Worker => write!(f, "worker"),
            Self::Pusher => write!(f, "pusher"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Duties of this node.
    #[serde(default)]
    pub role: NodeRole,
    /// Event IDs routed to the push lane; everything else goes to the work lane.
    #[serde(default)]
    pub push_events: Vec<String>,
    /// Watchdog timeout for one-off tasks that do not specify one.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// An active record untouched for longer than this is considered stuck.
    #[serde(default = "default_stale_active_after_ms")]
    pub stale_active_after_ms: u64,
    /// Page size used when scanning lanes for scheduled records.
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
    /// TTL of `<event>:lastrun` keys in seconds.
    #[serde(default = "default_last_run_ttl")]
    pub last_run_ttl_seconds: u64,
    /// Take a `set_nx` lease per firing instead of relying on check-then-act.
    #[serde(default)]
    pub exclusive_lease: bool,
    /// Reaper settings.
    #[serde(default)]
    pub reaper: ReaperConfig,
    /// Recurring tasks registered at startup.
    #[serde(default)]
    pub recurring: Vec<RecurringTaskConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::default(),
            push_events: Vec::new(),
            default_timeout_ms: default_timeout_ms(),
            stale_active_after_ms: default_stale_active_after_ms(),
            scan_limit: default_scan_limit(),
            last_run_ttl_seconds: default_last_run_ttl(),
            exclusive_lease: false,
            reaper: ReaperConfig::default(),
            recurring: Vec::new(),
        }
    }
}

/// Reaper (finished-record cleanup) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Event ID the reaper fires under. Exempt from staleness removal.
    #[serde(default = "default_reaper_event")]
    pub event_id: String,
    /// Interval between reaper firings.
    #[serde(default = "default_reaper_interval")]
    pub interval_ms: u64,
    /// Time box for a single reaper firing.
    #[serde(default = "default_reaper_timeout")]
    pub timeout_ms: u64,
    /// Finished records older than this (since creation) are removed.
    #[serde(default = "default_retention")]
    pub retention_ms: u64,
    /// Maximum number of finished records examined per state and lane.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Also reap records in the `failed` state.
    #[serde(default = "default_true")]
    pub include_failed: bool,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            event_id: default_reaper_event(),
            interval_ms: default_reaper_interval(),
            timeout_ms: default_reaper_timeout(),
            retention_ms: default_retention(),
            page_size: default_page_size(),
            include_failed: true,
        }
    }
}

/// A recurring task driven from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringTaskConfig {
    /// Event ID fired on each run.
    pub event_id: String,
    /// Minimum time between firings.
    pub interval_ms: u64,
    /// Delay before the first evaluation (defaults to the interval).
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Watchdog timeout of each firing.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Payload handed to the executor.
    #[serde(default = "default_context")]
    pub context: serde_json::Value,
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_stale_active_after_ms() -> u64 {
    20_000
}

fn default_scan_limit() -> usize {
    100_000
}

fn default_last_run_ttl() -> u64 {
    86_400
}

fn default_reaper_event() -> String {
    "taskhub.reaper".to_string()
}

fn default_reaper_interval() -> u64 {
    10_000
}

fn default_reaper_timeout() -> u64 {
    300_000
}

fn default_retention() -> u64 {
    30_000
}

fn default_page_size() -> usize {
    2_000
}

fn default_true() -> bool {
    true
}

fn default_context() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_duties() {
        assert!(NodeRole::Combined.serves_work() && NodeRole::Combined.serves_push());
        assert!(NodeRole::Worker.drives_recurrence());
        assert!(!NodeRole::Worker.serves_push());
        assert!(NodeRole::Pusher.serves_push());
        assert!(!NodeRole::Pusher.drives_recurrence());
        assert!(!NodeRole::Client.serves_work() && !NodeRole::Client.serves_push());
    }
}
