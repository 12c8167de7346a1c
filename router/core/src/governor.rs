//! Quota Governor
//!
//! Decides whether a call to an asset may proceed given its declared
//! limits and the current window counters.
//!
//! # Evaluation Order
//!
//! The day window is checked before the minute window, so a daily
//! exhaustion is always reported as such even when the minute window is
//! also full.
//!
//! # Atomic Admission
//!
//! [`QuotaGovernor::check`] reads the windows, decides, and on a pass records
//! the call into both windows and the usage ledger while holding a per-asset
//! lock. Two concurrent checks on the same asset therefore cannot both pass
//! on a stale count. [`QuotaGovernor::peek`] and [`QuotaGovernor::status`]
//! only read.
//!
//! The governor decides; it does not interpret policy. Whether a denial is
//! raised or rerouted is up to the selection engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::catalog::{AssetDescriptor, LimitPolicy, RateLimits};
use crate::clock::SharedClock;
use crate::counter::{effective_count, CounterKey, SharedCounterStore, WindowBucket, WindowKind};
use crate::error::{CounterError, HardStopError, RateLimitError, SelectionError};

// ============================================================================
// Decision Types
// ============================================================================

/// Why a window refused a call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Denial {
    /// Window that tripped
    pub window: WindowKind,
    /// Configured limit for that window
    pub limit: u32,
    /// Calls already counted in the window
    pub count: u64,
    /// Time until the window resets
    pub retry_after: Duration,
}

impl Denial {
    /// Convert to the caller-facing error for a hard-stop asset
    ///
    /// Day denials become [`HardStopError`], minute denials [`RateLimitError`].
    #[must_use]
    pub fn into_error(self, asset_id: &str) -> SelectionError {
        match self.window {
            WindowKind::Day => HardStopError::LimitReached {
                asset_id: asset_id.to_string(),
                window: self.window,
                limit: self.limit,
                retry_after: self.retry_after,
            }
            .into(),
            WindowKind::Minute => RateLimitError {
                asset_id: asset_id.to_string(),
                window: self.window,
                limit: self.limit,
                retry_after: self.retry_after,
            }
            .into(),
        }
    }
}

/// Outcome of an admission check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The call may proceed
    Pass,
    /// A window is full
    Deny(Denial),
}

impl Admission {
    /// Whether the call may proceed
    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Raw window buckets for one asset as read from the store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Day bucket, if ever written
    pub day: Option<WindowBucket>,
    /// Minute bucket, if ever written
    pub minute: Option<WindowBucket>,
}

impl WindowSnapshot {
    /// Bucket for a window kind
    #[must_use]
    pub fn bucket(&self, window: WindowKind) -> Option<&WindowBucket> {
        match window {
            WindowKind::Day => self.day.as_ref(),
            WindowKind::Minute => self.minute.as_ref(),
        }
    }
}

/// Decide admission from limits and a window snapshot
///
/// Pure: stale buckets count as zero and nothing is recorded.
#[must_use]
pub fn evaluate(limits: &RateLimits, snapshot: &WindowSnapshot, now: DateTime<Utc>) -> Admission {
    for window in WindowKind::EVALUATION_ORDER {
        let Some(limit) = limits.for_window(window) else {
            continue;
        };
        let bucket = snapshot.bucket(window);
        let count = effective_count(bucket, window, now);
        if count >= u64::from(limit) {
            let retry_after = match bucket {
                Some(b) if !b.is_stale(window, now) => b.time_until_reset(window, now),
                _ => window.length(),
            };
            return Admission::Deny(Denial {
                window,
                limit,
                count,
                retry_after,
            });
        }
    }
    Admission::Pass
}

// ============================================================================
// Status Report
// ============================================================================

/// Read-only view of one window for one asset
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    /// Window kind
    pub window: WindowKind,
    /// Configured limit, `None` when unconstrained
    pub limit: Option<u32>,
    /// Calls counted in the live window
    pub used: u64,
    /// Calls left, `None` when unconstrained
    pub remaining: Option<u64>,
    /// When the live window closes, `None` when no window is open
    pub resets_at: Option<DateTime<Utc>>,
}

/// Read-only quota view of one asset
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    /// Asset id
    pub asset_id: String,
    /// Limit policy
    pub policy: LimitPolicy,
    /// Usage ledger value
    pub usage: u64,
    /// Whether a check right now would pass
    pub available: bool,
    /// Day then minute
    pub windows: Vec<WindowStatus>,
}

// ============================================================================
// Governor
// ============================================================================

/// Admission control over a counter store
pub struct QuotaGovernor {
    store: SharedCounterStore,
    clock: SharedClock,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for QuotaGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaGovernor")
            .field("locked_assets", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl QuotaGovernor {
    /// Create a governor over a store and clock
    #[must_use]
    pub fn new(store: SharedCounterStore, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            locks: DashMap::new(),
        }
    }

    /// Current time as seen by the governor
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Read both window buckets for an asset
    ///
    /// # Errors
    ///
    /// Returns an error if the counter store fails.
    pub async fn snapshot(&self, asset_id: &str) -> Result<WindowSnapshot, CounterError> {
        Ok(WindowSnapshot {
            day: self.store.get(&CounterKey::window(asset_id, WindowKind::Day)).await?,
            minute: self
                .store
                .get(&CounterKey::window(asset_id, WindowKind::Minute))
                .await?,
        })
    }

    /// Decide without recording
    ///
    /// # Errors
    ///
    /// Returns an error if the counter store fails.
    pub async fn peek(&self, asset: &AssetDescriptor) -> Result<Admission, CounterError> {
        let snapshot = self.snapshot(&asset.id).await?;
        Ok(evaluate(&asset.rate_limits, &snapshot, self.now()))
    }

    /// Decide and, on a pass, record the call
    ///
    /// A pass increments the minute window, the day window and the usage
    /// ledger under the asset's lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter store fails.
    pub async fn check(&self, asset: &AssetDescriptor) -> Result<Admission, CounterError> {
        let lock = self.asset_lock(&asset.id);
        let _guard = lock.lock().await;

        let now = self.now();
        let snapshot = self.snapshot(&asset.id).await?;
        let admission = evaluate(&asset.rate_limits, &snapshot, now);

        match admission {
            Admission::Pass => {
                for window in WindowKind::EVALUATION_ORDER {
                    self.store
                        .increment(&CounterKey::window(&asset.id, window), 1, now)
                        .await?;
                }
                self.store
                    .increment(&CounterKey::usage(&asset.id), 1, now)
                    .await?;
            }
            Admission::Deny(denial) => {
                tracing::debug!(
                    asset = %asset.id,
                    window = %denial.window,
                    limit = denial.limit,
                    count = denial.count,
                    "Admission denied"
                );
            }
        }

        Ok(admission)
    }

    /// Usage ledger value for an asset (zero when never used)
    ///
    /// # Errors
    ///
    /// Returns an error if the counter store fails.
    pub async fn usage(&self, asset_id: &str) -> Result<u64, CounterError> {
        Ok(self
            .store
            .get(&CounterKey::usage(asset_id))
            .await?
            .map_or(0, |b| b.count))
    }

    /// Overwrite the usage ledger value for an asset
    ///
    /// # Errors
    ///
    /// Returns an error if the counter store fails.
    pub async fn seed_usage(&self, asset_id: &str, count: u64) -> Result<(), CounterError> {
        self.store
            .set(&CounterKey::usage(asset_id), count, self.now())
            .await
    }

    /// Read-only quota view of an asset
    ///
    /// # Errors
    ///
    /// Returns an error if the counter store fails.
    pub async fn status(&self, asset: &AssetDescriptor) -> Result<QuotaStatus, CounterError> {
        let now = self.now();
        let snapshot = self.snapshot(&asset.id).await?;

        let windows = WindowKind::EVALUATION_ORDER
            .into_iter()
            .map(|window| {
                let bucket = snapshot.bucket(window).filter(|b| !b.is_stale(window, now));
                let used = bucket.map_or(0, |b| b.count);
                let limit = asset.rate_limits.for_window(window);
                WindowStatus {
                    window,
                    limit,
                    used,
                    remaining: limit.map(|l| u64::from(l).saturating_sub(used)),
                    resets_at: bucket.map(|b| b.resets_at(window)),
                }
            })
            .collect();

        Ok(QuotaStatus {
            asset_id: asset.id.clone(),
            policy: asset.limit_policy,
            usage: self.usage(&asset.id).await?,
            available: evaluate(&asset.rate_limits, &snapshot, now).is_pass(),
            windows,
        })
    }

    fn asset_lock(&self, asset_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(asset_id.to_string()).or_default().clone()
    }
}
