//! # taskhub-cache
//!
//! Key-value store providers for TaskHub. Supports two modes:
//!
//! - **memory**: In-process store using [moka](https://crates.io/crates/moka)
//! - **redis**: Redis-backed store using the [redis](https://crates.io/crates/redis) crate
//!
//! The provider is selected at runtime based on configuration. Only a
//! Redis store is shared between nodes; the memory store suits single-node
//! deployments and tests.

pub mod keys;
#[cfg(feature = "memory")]
pub mod memory;
pub mod provider;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use provider::CacheManager;
