//! Core traits defined in `taskhub-core` and implemented by other crates.

pub mod cache;

pub use cache::CacheProvider;
