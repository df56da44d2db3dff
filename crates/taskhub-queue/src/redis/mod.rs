//! Redis queue engine.

pub mod engine;
pub mod keys;

pub use engine::RedisTaskQueue;
