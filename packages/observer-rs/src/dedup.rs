//! Redelivery suppression keyed by broker message id.

use std::collections::HashSet;
use std::sync::Mutex;

/// Tracks message ids that have already been processed.
///
/// The set only grows. Check-and-mark happens inside one critical section,
/// so two workers racing on the same id cannot both see it as new.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<HashSet<String>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `id` is observed and marks it as seen.
    pub fn is_new(&self, id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if seen.contains(id) {
            return false;
        }
        seen.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
