//! Counter Store
//!
//! Time-windowed counters keyed by asset id and window kind, plus the
//! lifetime usage ledger used for least-used selection.
//!
//! # Key Layout
//!
//! ```text
//! model:<asset>:minute_usage   fixed 60s bucket   (RPM)
//! model:<asset>:day_usage      fixed 24h bucket   (RPD)
//! model:usage:<asset>          never resets       (least-used ledger)
//! ```
//!
//! Stores only need to make `increment` atomic per key. Window reset is
//! lazy: `get` may return an elapsed bucket and callers pass it through
//! [`effective_count`]; `increment` on an elapsed bucket opens a new one.

mod file;
mod memory;
mod window;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CounterError;

pub use file::FileCounterStore;
pub use memory::MemoryCounterStore;
pub use window::{effective_count, WindowBucket, WindowKind};

/// Identifies one counter
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CounterKey {
    /// A rate window bucket for an asset
    Window {
        /// Asset id
        asset_id: String,
        /// Which window
        window: WindowKind,
    },
    /// The asset's usage ledger entry
    Usage {
        /// Asset id
        asset_id: String,
    },
}

impl CounterKey {
    /// Key for an asset's rate window
    pub fn window(asset_id: impl Into<String>, window: WindowKind) -> Self {
        Self::Window {
            asset_id: asset_id.into(),
            window,
        }
    }

    /// Key for an asset's usage ledger
    pub fn usage(asset_id: impl Into<String>) -> Self {
        Self::Usage {
            asset_id: asset_id.into(),
        }
    }

    /// Window kind, for keys that reset
    #[must_use]
    pub fn window_kind(&self) -> Option<WindowKind> {
        match self {
            Self::Window { window, .. } => Some(*window),
            Self::Usage { .. } => None,
        }
    }

    /// Asset this key belongs to
    #[must_use]
    pub fn asset_id(&self) -> &str {
        match self {
            Self::Window { asset_id, .. } | Self::Usage { asset_id } => asset_id,
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Window { asset_id, window } => write!(f, "model:{asset_id}:{window}_usage"),
            Self::Usage { asset_id } => write!(f, "model:usage:{asset_id}"),
        }
    }
}

/// Pluggable counter backend
///
/// Implementations must make [`CounterStore::increment`] atomic per key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the raw bucket for a key; `None` when never written
    async fn get(&self, key: &CounterKey) -> Result<Option<WindowBucket>, CounterError>;

    /// Add `amount`, opening a fresh bucket if the key's window has elapsed.
    /// Returns the count after the increment.
    async fn increment(
        &self,
        key: &CounterKey,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<u64, CounterError>;

    /// Overwrite a counter (seeding and operator tooling)
    async fn set(&self, key: &CounterKey, count: u64, now: DateTime<Utc>)
        -> Result<(), CounterError>;
}

/// Shared counter store handle
pub type SharedCounterStore = Arc<dyn CounterStore>;
