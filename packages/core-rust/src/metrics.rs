//! Named monotonic counters shared across concurrent units.
//!
//! The registry is the only state in the system mutated concurrently by many
//! independent units: request handlers, tickers, and the crash guard all push
//! increments. Writes are lock-free atomic adds; reads only ever happen during
//! periodic snapshotting and take a consistent copy without blocking writers
//! for longer than the copy itself.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Process-wide registry of named, monotonically-increasing counters.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    counters: DashMap<String, AtomicU64>,
}

impl MetricRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `amount` to the counter `name`, creating it at zero first if it
    /// does not exist yet. Never blocks beyond the shard lock of the map.
    pub fn increment(&self, name: &str, amount: u64) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(amount, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(name.to_owned())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(amount, Ordering::Relaxed);
    }

    /// Returns the current value of one counter, zero if it was never touched.
    #[must_use]
    pub fn value(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    /// Takes a consistent copy of all non-zero counters without resetting
    /// them. Drained entries keep their key in the map but report nothing
    /// here until they are incremented again.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .filter_map(|entry| {
                let value = entry.value().load(Ordering::Relaxed);
                (value > 0).then(|| (entry.key().clone(), value))
            })
            .collect()
    }

    /// Takes a copy of all non-zero counters and resets them to zero.
    ///
    /// Increments landing while the drain runs are either included in this
    /// snapshot or survive into the next one; none are lost.
    pub fn drain(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .filter_map(|entry| {
                let value = entry.value().swap(0, Ordering::Relaxed);
                (value > 0).then(|| (entry.key().clone(), value))
            })
            .collect()
    }
}
