//! # taskhub-queue
//!
//! The persistent, multi-consumer task queue the scheduler builds on.
//!
//! - [`TaskQueue`] is the narrow contract the scheduler and the worker
//!   runner consume: create, subscribe, get, list by lane and state,
//!   remove, force-fail, claim, and finish.
//! - **memory**: a single-process engine, used for tests and
//!   single-node deployments.
//! - **redis**: a Redis engine shared by every node pointing at the same
//!   server and key prefix.

#[cfg(feature = "memory")]
pub mod memory;
pub mod provider;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod traits;

pub use provider::QueueManager;
pub use traits::{ListRange, SortOrder, TaskQueue, TaskSubscription};
