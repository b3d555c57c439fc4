//! Keyed debounce timers
//!
//! A [`TimerArena`] holds at most one pending deadline per key. Scheduling a key
//! that is already pending replaces its deadline, which is how a debounce is
//! reset: the earlier emission is cancelled and a new one is armed. The owner
//! polls [`TimerArena::take_due`] from its tick and handles the fired keys.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;

/// Map from key to a cancellable deadline
#[derive(Debug, Clone)]
pub struct TimerArena<K> {
    deadlines: HashMap<K, DateTime<Utc>>,
}

impl<K> Default for TimerArena<K> {
    fn default() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> TimerArena<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` to fire at `deadline`, cancelling any earlier arming.
    ///
    /// Returns true if a pending timer was replaced.
    pub fn schedule(&mut self, key: K, deadline: DateTime<Utc>) -> bool {
        self.deadlines.insert(key, deadline).is_some()
    }

    /// Cancel the timer for `key`. Returns true if one was pending.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    /// Deadline currently armed for `key`
    pub fn deadline(&self, key: &K) -> Option<DateTime<Utc>> {
        self.deadlines.get(key).copied()
    }

    /// Remove and return every key whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<K> {
        let mut due: Vec<(K, DateTime<Utc>)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (key.clone(), *deadline))
            .collect();
        due.sort_by_key(|(_, deadline)| *deadline);

        for (key, _) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(key, _)| key).collect()
    }

    /// Earliest pending deadline, if any
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.deadlines.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
