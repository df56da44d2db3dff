//! In-process queue engine.

pub mod engine;

pub use engine::MemoryTaskQueue;
