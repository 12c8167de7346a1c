//! File-backed counter store.
//!
//! Counters live in a [`MemoryCounterStore`]; after every mutation the full
//! set is rewritten to a JSON snapshot so usage survives restarts. A failed
//! write is logged and the in-memory value is still returned.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{CounterKey, CounterStore, MemoryCounterStore, WindowBucket};
use crate::error::CounterError;
use crate::persist::StateFile;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterSnapshot {
    counters: Vec<CounterRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CounterRecord {
    key: CounterKey,
    #[serde(flatten)]
    bucket: WindowBucket,
}

/// Counter store persisted to a JSON state file
#[derive(Debug)]
pub struct FileCounterStore {
    inner: MemoryCounterStore,
    file: StateFile<CounterSnapshot>,
    persist_lock: Mutex<()>,
}

impl FileCounterStore {
    /// Open (or start) the store at `path`
    ///
    /// A missing file starts empty. An unreadable or corrupt file is logged
    /// and also starts empty; it is overwritten on the first mutation.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let file: StateFile<CounterSnapshot> = StateFile::new(path);
        let inner = match file.load().await {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    path = %file.path().display(),
                    counters = snapshot.counters.len(),
                    "Loaded counter state"
                );
                MemoryCounterStore::from_entries(
                    snapshot.counters.into_iter().map(|r| (r.key, r.bucket)),
                )
            }
            Ok(None) => MemoryCounterStore::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Counter state unreadable, starting fresh");
                MemoryCounterStore::new()
            }
        };

        Self {
            inner,
            file,
            persist_lock: Mutex::new(()),
        }
    }

    /// In-memory view of the counters
    #[must_use]
    pub fn memory(&self) -> &MemoryCounterStore {
        &self.inner
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = CounterSnapshot {
            counters: self
                .inner
                .snapshot()
                .into_iter()
                .map(|(key, bucket)| CounterRecord { key, bucket })
                .collect(),
        };

        if let Err(e) = self.file.save(&snapshot).await {
            tracing::warn!(error = %e, "Failed to persist counter state; continuing in memory");
        }
    }
}

#[async_trait]
impl CounterStore for FileCounterStore {
    async fn get(&self, key: &CounterKey) -> Result<Option<WindowBucket>, CounterError> {
        self.inner.get(key).await
    }

    async fn increment(
        &self,
        key: &CounterKey,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<u64, CounterError> {
        let count = self.inner.increment_sync(key, amount, now);
        self.persist().await;
        Ok(count)
    }

    async fn set(
        &self,
        key: &CounterKey,
        count: u64,
        now: DateTime<Utc>,
    ) -> Result<(), CounterError> {
        self.inner.set_sync(key, count, now);
        self.persist().await;
        Ok(())
    }
}
