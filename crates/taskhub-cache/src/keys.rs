//! Key builders for every entry the scheduler keeps in the shared store.
//!
//! Providers apply their own configured prefix on top of these keys.

/// Epoch-millisecond timestamp of the last completed firing of a recurring event.
pub fn last_run(event_id: &str) -> String {
    format!("{event_id}:lastrun")
}

/// Per-firing lease of a recurring event (only used with `exclusive_lease`).
pub fn lease(event_id: &str) -> String {
    format!("{event_id}:lease")
}
