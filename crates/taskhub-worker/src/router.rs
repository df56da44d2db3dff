//! Static lane classification of event IDs.

use std::collections::HashSet;
use std::sync::Arc;

use taskhub_entity::Lane;

/// Routes push-classified events to the push lane and everything else
/// to the work lane.
#[derive(Debug, Clone, Default)]
pub struct LaneRouter {
    push_events: Arc<HashSet<String>>,
}

impl LaneRouter {
    /// Create a router from the configured push events.
    pub fn new<I, S>(push_events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            push_events: Arc::new(push_events.into_iter().map(Into::into).collect()),
        }
    }

    /// Lane a new record for `event_id` is created in.
    pub fn lane_for(&self, event_id: &str) -> Lane {
        if self.push_events.contains(event_id) {
            Lane::Push
        } else {
            Lane::Work
        }
    }
}
