use mc_core::Event;
use std::collections::VecDeque;

/// Ring buffer of the most recent broadcast events, newest first, used to
/// replay state to clients that (re)join.
pub struct HistoryBuffer {
    capacity: usize,
    entries: VecDeque<Event>,
}

impl HistoryBuffer {
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

    /// Up to `limit` most recent events, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        self.entries.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
