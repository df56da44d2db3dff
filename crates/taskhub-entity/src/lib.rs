//! # taskhub-entity
//!
//! Data model shared by the queue engines and the scheduler: task
//! records, their states, the two routing lanes, and the terminal
//! outcome an executor writes back.

pub mod task;

pub use task::{Lane, NewTask, TaskMeta, TaskOutcome, TaskRecord, TaskState};
