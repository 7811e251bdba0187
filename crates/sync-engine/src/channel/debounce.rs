//! Per-record update debouncing
//!
//! Drops redundant push updates arriving faster than a minimum interval
//! for the same record. Advisory only: it limits UI update frequency and
//! is never applied to the reconciliation coordinator's authoritative
//! fetch path.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Rate limiter keyed by record identity
pub struct UpdateDebouncer {
    last_processed: DashMap<String, Instant>,
    min_interval: Duration,
}

impl UpdateDebouncer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_processed: DashMap::new(),
            min_interval,
        }
    }

    /// Whether an update for `record_key` arriving now should be processed
    ///
    /// The first update for a key always passes; later updates pass only
    /// if at least the minimum interval elapsed since the last one that
    /// passed.
    pub fn should_process(&self, record_key: &str) -> bool {
        self.should_process_at(record_key, Instant::now())
    }

    /// Instant-injecting variant for deterministic tests
    pub fn should_process_at(&self, record_key: &str, now: Instant) -> bool {
        use dashmap::mapref::entry::Entry;

        match self.last_processed.entry(record_key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
            Entry::Occupied(mut slot) => {
                if now.duration_since(*slot.get()) >= self.min_interval {
                    slot.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Forget a record's debounce state, e.g. after unsubscribe
    pub fn forget(&self, record_key: &str) {
        self.last_processed.remove(record_key);
    }

    /// Number of record keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.last_processed.len()
    }
}
