//! Routing Metrics
//!
//! Lock-free counters describing what the selection engine decided:
//! - Selections by reason (requested, least-used, rerouted)
//! - Denials by window
//! - Catalog exhaustion
//! - Per-asset selection counts

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::counter::WindowKind;

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Zeroed counter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Routing Metrics
// ============================================================================

/// Centralized metrics for the selection engine
#[derive(Debug)]
pub struct RoutingMetrics {
    /// Calls that returned an asset
    pub selections: Counter,
    /// Explicit requests admitted as asked
    pub requested: Counter,
    /// Least-used picks without an explicit request
    pub least_used: Counter,
    /// Soft-fail reroutes that found a replacement
    pub reroutes: Counter,
    /// Denials on the minute window
    pub minute_denials: Counter,
    /// Denials on the day window
    pub day_denials: Counter,
    /// Calls that found no admissible asset
    pub exhaustions: Counter,

    per_asset: DashMap<String, Counter>,
    started_at: Instant,
}

impl RoutingMetrics {
    /// Create new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            selections: Counter::new(),
            requested: Counter::new(),
            least_used: Counter::new(),
            reroutes: Counter::new(),
            minute_denials: Counter::new(),
            day_denials: Counter::new(),
            exhaustions: Counter::new(),
            per_asset: DashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Record a returned asset
    pub fn record_selection(&self, asset_id: &str, reason: &crate::selection::SelectionReason) {
        use crate::selection::SelectionReason;

        self.selections.inc();
        match reason {
            SelectionReason::Requested => self.requested.inc(),
            SelectionReason::LeastUsed => self.least_used.inc(),
            SelectionReason::Rerouted { .. } => self.reroutes.inc(),
        }
        self.per_asset.entry(asset_id.to_string()).or_default().inc();
    }

    /// Record a denial, of a requested asset or a least-used candidate
    pub fn record_denial(&self, window: WindowKind) {
        match window {
            WindowKind::Minute => self.minute_denials.inc(),
            WindowKind::Day => self.day_denials.inc(),
        }
    }

    /// Record catalog exhaustion
    pub fn record_exhausted(&self) {
        self.exhaustions.inc();
    }

    /// Time since the collector was created
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Point-in-time copy of every counter
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            selections: self.selections.get(),
            requested: self.requested.get(),
            least_used: self.least_used.get(),
            reroutes: self.reroutes.get(),
            minute_denials: self.minute_denials.get(),
            day_denials: self.day_denials.get(),
            exhaustions: self.exhaustions.get(),
            per_asset: self
                .per_asset
                .iter()
                .map(|e| (e.key().clone(), e.value().get()))
                .collect(),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

impl Default for RoutingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable view of [`RoutingMetrics`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub selections: u64,
    pub requested: u64,
    pub least_used: u64,
    pub reroutes: u64,
    pub minute_denials: u64,
    pub day_denials: u64,
    pub exhaustions: u64,
    /// Selections per asset id
    pub per_asset: BTreeMap<String, u64>,
    pub uptime_secs: u64,
}
