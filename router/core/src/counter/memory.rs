//! In-memory counter store backed by a sharded concurrent map.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{CounterKey, CounterStore, WindowBucket};
use crate::error::CounterError;

/// Process-local counter store
///
/// `increment` holds the shard lock for the key across the stale check and
/// the add, so concurrent increments on one key never lose updates.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    buckets: DashMap<CounterKey, WindowBucket>,
}

impl MemoryCounterStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from previously persisted buckets
    pub fn from_entries(entries: impl IntoIterator<Item = (CounterKey, WindowBucket)>) -> Self {
        Self {
            buckets: entries.into_iter().collect(),
        }
    }

    /// Copy of every bucket, sorted by rendered key for stable output
    #[must_use]
    pub fn snapshot(&self) -> Vec<(CounterKey, WindowBucket)> {
        let mut entries: Vec<_> = self
            .buckets
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by_cached_key(|(k, _)| k.to_string());
        entries
    }

    /// Number of tracked counters
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no counters have been written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub(super) fn increment_sync(&self, key: &CounterKey, amount: u64, now: DateTime<Utc>) -> u64 {
        let mut entry = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| WindowBucket::open(0, now));
        let bucket = entry.value_mut();

        if let Some(kind) = key.window_kind() {
            if bucket.is_stale(kind, now) {
                *bucket = WindowBucket::open(0, now);
            }
        }

        bucket.count = bucket.count.saturating_add(amount);
        bucket.count
    }

    pub(super) fn set_sync(&self, key: &CounterKey, count: u64, now: DateTime<Utc>) {
        self.buckets.insert(key.clone(), WindowBucket::open(count, now));
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &CounterKey) -> Result<Option<WindowBucket>, CounterError> {
        Ok(self.buckets.get(key).map(|b| *b))
    }

    async fn increment(
        &self,
        key: &CounterKey,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<u64, CounterError> {
        Ok(self.increment_sync(key, amount, now))
    }

    async fn set(
        &self,
        key: &CounterKey,
        count: u64,
        now: DateTime<Utc>,
    ) -> Result<(), CounterError> {
        self.set_sync(key, count, now);
        Ok(())
    }
}
