//! Distributed task scheduling on top of a shared task queue.
//!
//! This crate provides:
//! - A scheduler facade that submits one-off tasks and drives recurring ones
//! - A task submitter that races completion against a timeout watchdog
//! - A recurrence driver that deduplicates firings across nodes
//! - A query service that finds scheduled tasks and drops stuck ones
//! - A reaper that removes finished task records
//! - A worker runner and executor that claim and run queued tasks

pub mod executor;
pub mod jobs;
pub mod query;
pub mod recurrence;
pub mod registry;
pub mod router;
pub mod runner;
pub mod scheduler;
pub mod submitter;

pub use executor::{TaskExecutionError, TaskExecutor, TaskHandler};
pub use runner::WorkerRunner;
pub use scheduler::{ScheduleRequest, Scheduler};
pub use submitter::{TaskFailure, TaskHandle, TaskResult};
