//! Process-local memory of which recurring events have a polling loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// A registered recurring event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrenceEntry {
    /// Identifies the loop that owns this entry.
    pub generation: u64,
    /// Interval the loop was started with.
    pub interval: Duration,
}

/// At most one entry, and so at most one polling loop, per event ID.
///
/// A loop keeps running only while the registry still holds its
/// generation, so unscheduling and re-scheduling an event never leaves
/// two loops alive.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    entries: DashMap<String, RecurrenceEntry>,
    next_generation: AtomicU64,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `event_id` for a new loop. Returns `None` if a loop already owns it.
    pub fn try_register(&self, event_id: &str, interval: Duration) -> Option<RecurrenceEntry> {
        match self.entries.entry(event_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let entry = RecurrenceEntry {
                    generation: self.next_generation.fetch_add(1, Ordering::Relaxed) + 1,
                    interval,
                };
                slot.insert(entry);
                Some(entry)
            }
        }
    }

    /// Whether the loop holding `generation` still owns `event_id`.
    pub fn is_current(&self, event_id: &str, generation: u64) -> bool {
        self.entries
            .get(event_id)
            .is_some_and(|entry| entry.generation == generation)
    }

    /// Whether any loop owns `event_id`.
    pub fn contains(&self, event_id: &str) -> bool {
        self.entries.contains_key(event_id)
    }

    /// Drop the entry for `event_id`; its loop exits at its next boundary.
    pub fn remove(&self, event_id: &str) -> bool {
        self.entries.remove(event_id).is_some()
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Registered event IDs.
    pub fn event_ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered events.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no event is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
