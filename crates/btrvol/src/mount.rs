//! Mount reference counting.
//!
//! Several consumers can hold the same volume mounted; only the first
//! acquisition (0 to 1) and the last release (1 to 0) touch the filesystem.

use std::collections::{BTreeMap, HashMap};

/// What a count change requires from the filesystem adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing beyond bookkeeping.
    Bookkeeping,
    /// The volume must be physically mounted first.
    Mount,
    /// The volume must be physically unmounted first.
    Unmount,
}

/// Per-volume count of active consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountCounts {
    counts: HashMap<String, u64>,
}

impl MountCounts {
    /// Current count, or `None` if the volume is not tracked.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<u64> {
        self.counts.get(name).copied()
    }

    /// Set a count directly, tracking the volume if needed.
    pub fn set(&mut self, name: &str, count: u64) {
        self.counts.insert(name.to_string(), count);
    }

    /// Stop tracking a volume.
    pub fn forget(&mut self, name: &str) {
        self.counts.remove(name);
    }

    /// Whether anyone currently holds the volume.
    #[must_use]
    pub fn is_held(&self, name: &str) -> bool {
        self.get(name).unwrap_or(0) > 0
    }

    /// What acquiring the volume requires.
    #[must_use]
    pub fn on_acquire(&self, name: &str) -> Transition {
        if self.get(name).unwrap_or(0) == 0 {
            Transition::Mount
        } else {
            Transition::Bookkeeping
        }
    }

    /// What releasing the volume requires.
    #[must_use]
    pub fn on_release(&self, name: &str) -> Transition {
        if self.get(name) == Some(1) {
            Transition::Unmount
        } else {
            Transition::Bookkeeping
        }
    }

    /// Add one consumer, returning the new count.
    pub fn increment(&mut self, name: &str) -> u64 {
        let count = self.counts.entry(name.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Remove one consumer, returning the new count. Never goes below zero.
    pub fn decrement(&mut self, name: &str) -> u64 {
        let count = self.counts.entry(name.to_string()).or_insert(0);
        *count = count.saturating_sub(1);
        *count
    }

    /// Ordered copy of all counts.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|(name, count)| (name.clone(), *count))
            .collect()
    }
}
