use chrono::{DateTime, Utc};
use mc_core::Event;
use std::collections::{HashSet, VecDeque};

/// Rolling view of recent events on the client side, newest first.
///
/// Live events are pushed as they arrive; a `history` reply from the hub is
/// merged in, deduplicated by timestamp so that replayed events already seen
/// live are not doubled up.
pub struct LocalHistory {
    capacity: usize,
    entries: VecDeque<Event>,
}

impl LocalHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: Event) {
        self.entries.push_front(event);
        self.entries.truncate(self.capacity);
    }

    pub fn merge(&mut self, incoming: Vec<Event>) {
        let mut seen: HashSet<DateTime<Utc>> =
            self.entries.iter().map(|event| event.timestamp).collect();
        for event in incoming {
            if seen.insert(event.timestamp) {
                self.entries.push_back(event);
            }
        }
        self.entries
            .make_contiguous()
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.entries.truncate(self.capacity);
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
