//! Task queue engine configuration.

use serde::{Deserialize, Serialize};

/// Top-level queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue engine: `"memory"` or `"redis"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// How often a Redis subscription re-reads a record's state.
    #[serde(default = "default_subscription_poll")]
    pub subscription_poll_ms: u64,
    /// Redis-specific queue configuration.
    #[serde(default)]
    pub redis: RedisQueueConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            subscription_poll_ms: default_subscription_poll(),
            redis: RedisQueueConfig::default(),
        }
    }
}

/// Redis queue backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisQueueConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Key prefix for record and index keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisQueueConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_provider() -> String {
    "memory".to_string()
}

fn default_subscription_poll() -> u64 {
    250
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "taskhub:q:".to_string()
}
