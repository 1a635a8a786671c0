//! Processed-message-id guard for at-most-once dispatch.

use std::collections::HashSet;

/// Recently seen inbound message ids.
///
/// Bounded by clearing the whole set once it grows past `capacity`; there is
/// no per-entry eviction.
#[derive(Debug)]
pub struct ProcessedIds {
    ids: HashSet<String>,
    capacity: usize,
}

impl ProcessedIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            capacity,
        }
    }

    /// Record `id`. Returns `false` if it was already seen.
    pub fn check_and_insert(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        if self.ids.len() > self.capacity {
            self.ids.clear();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
