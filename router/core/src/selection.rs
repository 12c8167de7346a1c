//! Selection Engine
//!
//! Public entry point of the routing core. Resolves an explicitly requested
//! asset or picks the least-used admissible one, delegating admission to the
//! [`QuotaGovernor`].
//!
//! # Per-Call State Machine
//!
//! ```text
//! Resolve -> Admit -> Pass            -> return asset
//!                  -> Deny + HARD_STOP -> HardStopError (day) / RateLimitError (minute)
//!                  -> Deny + SOFT_FAIL -> least-used over the rest of the catalog
//! ```
//!
//! Least-used ranks candidates by their usage ledger value, ties broken by
//! catalog order, and admits the first one that passes. A candidate denied
//! during this phase is skipped whatever its policy; only when nothing passes
//! does the call fail with [`HardStopError::Exhausted`].
//!
//! A soft-fail reroute excludes only the asset that was requested, not other
//! assets on the same backend.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::catalog::{AssetDescriptor, Catalog, CatalogLoad, CatalogLoader, CatalogSource, LimitPolicy};
use crate::clock::SharedClock;
use crate::counter::{SharedCounterStore, WindowKind};
use crate::error::{CounterError, HardStopError, SelectionError};
use crate::governor::{Admission, QuotaGovernor, QuotaStatus};
use crate::metrics::RoutingMetrics;

// ============================================================================
// Request / Outcome
// ============================================================================

/// What the caller asked for
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionCriteria {
    /// Explicitly requested asset id
    pub model: Option<String>,
}

impl SelectionCriteria {
    /// No preference: least-used selection
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Request a specific asset
    pub fn model(id: impl Into<String>) -> Self {
        Self {
            model: Some(id.into()),
        }
    }
}

/// Why an asset was returned
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionReason {
    /// The requested asset was admitted
    Requested,
    /// No asset was requested; least-used pick
    LeastUsed,
    /// The requested soft-fail asset was denied and the call rerouted
    Rerouted {
        /// Asset that was requested
        from: String,
        /// Window that denied it
        window: WindowKind,
    },
}

/// An admitted asset plus the reason it was chosen
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelectionOutcome {
    /// The admitted asset
    pub asset: AssetDescriptor,
    /// Why it was chosen
    pub reason: SelectionReason,
}

// ============================================================================
// Engine
// ============================================================================

/// Quota-aware asset selection over a cached catalog
#[derive(Debug)]
pub struct SelectionEngine {
    catalog: RwLock<Arc<Catalog>>,
    governor: QuotaGovernor,
    metrics: Arc<RoutingMetrics>,
    free_only: bool,
}

impl SelectionEngine {
    /// Create an engine over a catalog, counter store and clock
    #[must_use]
    pub fn new(catalog: Catalog, store: SharedCounterStore, clock: SharedClock) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(catalog)),
            governor: QuotaGovernor::new(store, clock),
            metrics: Arc::new(RoutingMetrics::new()),
            free_only: false,
        }
    }

    /// Restrict least-used candidates to zero-cost assets
    #[must_use]
    pub fn with_free_only(mut self, free_only: bool) -> Self {
        self.free_only = free_only;
        self
    }

    /// Share an existing metrics collector
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<RoutingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current catalog
    #[must_use]
    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.read().clone()
    }

    /// The admission governor
    #[must_use]
    pub fn governor(&self) -> &QuotaGovernor {
        &self.governor
    }

    /// Routing metrics
    #[must_use]
    pub fn metrics(&self) -> &RoutingMetrics {
        &self.metrics
    }

    /// Swap in a new catalog; calls already running keep the old one
    pub fn replace_catalog(&self, catalog: Catalog) {
        *self.catalog.write() = Arc::new(catalog);
    }

    /// Reload the catalog from sources and swap it in
    ///
    /// Failed sources are skipped (and reported in the returned load); the
    /// swap happens even when some sources failed.
    pub async fn reload_catalog(&self, sources: &[CatalogSource]) -> CatalogLoad {
        let load = CatalogLoader::load(sources).await;
        self.replace_catalog(load.catalog.clone());
        load
    }

    /// Select an asset
    ///
    /// # Errors
    ///
    /// - [`SelectionError::AssetNotFound`] if the requested id is unknown
    /// - [`SelectionError::RateLimit`] for a minute denial on a hard-stop asset
    /// - [`SelectionError::HardStop`] for a day denial on a hard-stop asset, or
    ///   when no asset can be admitted
    /// - [`SelectionError::Counter`] if the counter store fails
    pub async fn select_model(
        &self,
        criteria: &SelectionCriteria,
    ) -> Result<AssetDescriptor, SelectionError> {
        self.select(criteria).await.map(|outcome| outcome.asset)
    }

    /// Select an asset and report why it was chosen
    ///
    /// # Errors
    ///
    /// Same as [`SelectionEngine::select_model`].
    pub async fn select(
        &self,
        criteria: &SelectionCriteria,
    ) -> Result<SelectionOutcome, SelectionError> {
        let catalog = self.catalog();

        let Some(requested) = criteria.model.as_deref() else {
            let asset = self.least_used(&catalog, None).await?;
            return Ok(self.finish(asset, SelectionReason::LeastUsed));
        };

        let asset = catalog
            .get(requested)
            .ok_or_else(|| SelectionError::AssetNotFound {
                asset_id: requested.to_string(),
            })?;

        let denial = match self.governor.check(asset).await? {
            Admission::Pass => return Ok(self.finish(asset.clone(), SelectionReason::Requested)),
            Admission::Deny(denial) => denial,
        };
        self.metrics.record_denial(denial.window);

        match asset.limit_policy {
            LimitPolicy::HardStop => {
                tracing::info!(
                    asset = %asset.id,
                    window = %denial.window,
                    limit = denial.limit,
                    "Hard-stop limit reached"
                );
                Err(denial.into_error(&asset.id))
            }
            LimitPolicy::SoftFail => {
                let replacement = self.least_used(&catalog, Some(&asset.id)).await?;
                tracing::info!(
                    from = %asset.id,
                    to = %replacement.id,
                    window = %denial.window,
                    "Soft-fail limit reached, rerouting"
                );
                Ok(self.finish(
                    replacement,
                    SelectionReason::Rerouted {
                        from: asset.id.clone(),
                        window: denial.window,
                    },
                ))
            }
        }
    }

    async fn least_used(
        &self,
        catalog: &Catalog,
        excluded: Option<&str>,
    ) -> Result<AssetDescriptor, SelectionError> {
        let mut candidates = Vec::with_capacity(catalog.len());
        for (position, asset) in catalog.iter().enumerate() {
            if Some(asset.id.as_str()) == excluded || (self.free_only && !asset.is_free()) {
                continue;
            }
            let usage = self.governor.usage(&asset.id).await?;
            candidates.push((usage, position, asset));
        }
        candidates.sort_by_key(|(usage, position, _)| (*usage, *position));

        let mut exhausted: Vec<(usize, &str)> = excluded
            .and_then(|id| catalog.position(id).map(|pos| (pos, id)))
            .into_iter()
            .collect();

        for (usage, position, asset) in candidates {
            match self.governor.check(asset).await? {
                Admission::Pass => {
                    tracing::debug!(asset = %asset.id, usage, "Least-used asset admitted");
                    return Ok(asset.clone());
                }
                Admission::Deny(denial) => {
                    tracing::debug!(
                        asset = %asset.id,
                        window = %denial.window,
                        "Candidate denied, trying next"
                    );
                    self.metrics.record_denial(denial.window);
                    exhausted.push((position, &asset.id));
                }
            }
        }

        exhausted.sort_unstable();
        let asset_ids: Vec<String> = exhausted.into_iter().map(|(_, id)| id.to_string()).collect();
        tracing::warn!(assets = ?asset_ids, "All assets exhausted");
        self.metrics.record_exhausted();
        Err(HardStopError::Exhausted { asset_ids }.into())
    }

    fn finish(&self, asset: AssetDescriptor, reason: SelectionReason) -> SelectionOutcome {
        self.metrics.record_selection(&asset.id, &reason);
        SelectionOutcome { asset, reason }
    }

    /// Usage ledger value for an asset
    ///
    /// # Errors
    ///
    /// Returns an error if the counter store fails.
    pub async fn usage(&self, asset_id: &str) -> Result<u64, CounterError> {
        self.governor.usage(asset_id).await
    }

    /// Overwrite an asset's usage ledger value
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError::AssetNotFound`] for an unknown id, or a
    /// counter error if the store fails.
    pub async fn seed_usage(&self, asset_id: &str, count: u64) -> Result<(), SelectionError> {
        if self.catalog().get(asset_id).is_none() {
            return Err(SelectionError::AssetNotFound {
                asset_id: asset_id.to_string(),
            });
        }
        self.governor.seed_usage(asset_id, count).await?;
        Ok(())
    }

    /// Read-only quota view of every asset, in catalog order
    ///
    /// # Errors
    ///
    /// Returns an error if the counter store fails.
    pub async fn quota_report(&self) -> Result<Vec<QuotaStatus>, CounterError> {
        let catalog = self.catalog();
        let mut report = Vec::with_capacity(catalog.len());
        for asset in catalog.iter() {
            report.push(self.governor.status(asset).await?);
        }
        Ok(report)
    }
}
