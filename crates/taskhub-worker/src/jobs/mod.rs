//! Built-in task handler implementations.

pub mod reaper;

pub use reaper::ReaperHandler;
