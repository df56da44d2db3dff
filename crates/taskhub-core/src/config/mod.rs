//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section. Every field has a default, so an empty configuration is valid.

pub mod cache;
pub mod logging;
pub mod queue;
pub mod scheduler;
pub mod worker;

use serde::{Deserialize, Serialize};

use self::cache::CacheConfig;
use self::logging::LoggingConfig;
use self::queue::QueueConfig;
use self::scheduler::SchedulerConfig;
use self::worker::WorkerConfig;

use crate::error::AppError;

pub use self::scheduler::{NodeRole, ReaperConfig, RecurringTaskConfig};

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Key-value store settings (last-run timestamps, leases).
    #[serde(default)]
    pub cache: CacheConfig,
    /// Task queue engine settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Scheduling and reaping settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Worker runner settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `<dir>/default.toml` with an environment-specific overlay
    /// `<dir>/<env>.toml` and environment variables prefixed with
    /// `TASKHUB_` (nested keys separated by `__`).
    pub fn load(dir: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(&format!("{dir}/default")).required(false))
            .add_source(config::File::with_name(&format!("{dir}/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("TASKHUB")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("scheduler.push_events")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}
