//! Asset Catalog
//!
//! Loads asset descriptors from JSON sources into an ordered, id-indexed
//! catalog. Catalog order matters: least-used selection breaks ties by it.
//!
//! # Source Format
//!
//! Each source is a JSON array:
//!
//! ```json
//! [
//!   {
//!     "id": "gemini-1.5-pro-latest",
//!     "provider": "google",
//!     "cost": 0.0,
//!     "simulation": {
//!       "onLimitExceeded": "HARD_STOP",
//!       "rateLimits": { "freeTier": { "RPM": 2, "RPD": 50 } }
//!     }
//!   }
//! ]
//! ```
//!
//! `backendId` is accepted in place of `provider`; when a record carries
//! both, `backendId` is used.
//!
//! # Fault Isolation
//!
//! [`CatalogLoader::load`] isolates failures per source: a bad source is
//! logged and reported in [`CatalogLoad::failures`] while the remaining
//! sources still load. [`CatalogLoader::load_strict`] stops at the first
//! failure instead.
//!
//! # Duplicate Ids
//!
//! Ids are unique. When a later entry reuses an id it replaces the earlier
//! entry in place (last definition wins, first position kept) and a warning
//! is logged.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::counter::WindowKind;
use crate::error::{CatalogErrorKind, CatalogLoadError};

// ============================================================================
// Asset Descriptor
// ============================================================================

/// What happens when an asset's limit is exceeded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitPolicy {
    /// Raise a typed error to the caller
    #[default]
    HardStop,
    /// Silently reroute to another asset
    SoftFail,
}

impl fmt::Display for LimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HardStop => write!(f, "HARD_STOP"),
            Self::SoftFail => write!(f, "SOFT_FAIL"),
        }
    }
}

/// Declared request limits; `None` leaves a window unconstrained
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    /// Requests per minute
    #[serde(rename = "RPM", default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<u32>,
    /// Requests per day
    #[serde(rename = "RPD", default, skip_serializing_if = "Option::is_none")]
    pub rpd: Option<u32>,
}

impl RateLimits {
    /// Limits with both windows set
    #[must_use]
    pub fn new(rpm: Option<u32>, rpd: Option<u32>) -> Self {
        Self { rpm, rpd }
    }

    /// Limit for a window kind
    #[must_use]
    pub fn for_window(&self, window: WindowKind) -> Option<u32> {
        match window {
            WindowKind::Minute => self.rpm,
            WindowKind::Day => self.rpd,
        }
    }
}

/// One selectable backend+model unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Unique asset id
    pub id: String,
    /// Physical provider / shared rate pool
    pub backend_id: String,
    /// Informational cost (zero for free assets)
    pub cost: f64,
    /// Behaviour when a limit is exceeded
    pub limit_policy: LimitPolicy,
    /// Declared limits
    pub rate_limits: RateLimits,
}

impl AssetDescriptor {
    /// Create an unconstrained hard-stop asset
    pub fn new(id: impl Into<String>, backend_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backend_id: backend_id.into(),
            cost: 0.0,
            limit_policy: LimitPolicy::HardStop,
            rate_limits: RateLimits::default(),
        }
    }

    /// Set the limit policy
    #[must_use]
    pub fn with_policy(mut self, policy: LimitPolicy) -> Self {
        self.limit_policy = policy;
        self
    }

    /// Set requests per minute
    #[must_use]
    pub fn with_rpm(mut self, rpm: u32) -> Self {
        self.rate_limits.rpm = Some(rpm);
        self
    }

    /// Set requests per day
    #[must_use]
    pub fn with_rpd(mut self, rpd: u32) -> Self {
        self.rate_limits.rpd = Some(rpd);
        self
    }

    /// Set cost
    #[must_use]
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Whether the asset costs nothing to call
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.cost == 0.0
    }
}

// ----------------------------------------------------------------------------
// Wire records
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AssetRecord {
    id: String,
    provider: Option<String>,
    #[serde(rename = "backendId")]
    backend_id: Option<String>,
    cost: f64,
    simulation: SimulationRecord,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulationRecord {
    on_limit_exceeded: LimitPolicy,
    #[serde(default)]
    rate_limits: RateLimitTiers,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitTiers {
    #[serde(default)]
    free_tier: RateLimits,
}

#[derive(Debug, Deserialize)]
#[serde(try_from = "AssetRecord")]
struct WireAsset(AssetDescriptor);

impl TryFrom<AssetRecord> for WireAsset {
    type Error = String;

    /// `backendId` wins over `provider`; one of them is required
    fn try_from(r: AssetRecord) -> Result<Self, Self::Error> {
        let Some(backend_id) = r.backend_id.or(r.provider) else {
            return Err(format!("asset {} has neither backendId nor provider", r.id));
        };
        Ok(Self(AssetDescriptor {
            id: r.id,
            backend_id,
            cost: r.cost,
            limit_policy: r.simulation.on_limit_exceeded,
            rate_limits: r.simulation.rate_limits.free_tier,
        }))
    }
}

/// Parse one source body into descriptors
///
/// # Errors
///
/// Returns the JSON error if the body is not an array of asset objects.
pub fn parse_assets(json: &str) -> Result<Vec<AssetDescriptor>, serde_json::Error> {
    let records: Vec<WireAsset> = serde_json::from_str(json)?;
    Ok(records.into_iter().map(|WireAsset(asset)| asset).collect())
}

// ============================================================================
// Catalog
// ============================================================================

/// Ordered, id-unique set of assets
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    assets: Vec<AssetDescriptor>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog, de-duplicating ids (last definition wins, first position kept)
    #[must_use]
    pub fn from_assets(assets: impl IntoIterator<Item = AssetDescriptor>) -> Self {
        let mut catalog = Self::default();
        for asset in assets {
            catalog.insert(asset);
        }
        catalog
    }

    fn insert(&mut self, asset: AssetDescriptor) {
        if let Some(&pos) = self.index.get(&asset.id) {
            tracing::warn!(asset = %asset.id, "Duplicate asset id in catalog, later definition wins");
            self.assets[pos] = asset;
        } else {
            self.index.insert(asset.id.clone(), self.assets.len());
            self.assets.push(asset);
        }
    }

    /// Look up an asset
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&AssetDescriptor> {
        self.index.get(id).map(|&i| &self.assets[i])
    }

    /// Catalog position of an asset
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Assets in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &AssetDescriptor> {
        self.assets.iter()
    }

    /// Asset ids in catalog order
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.assets.iter().map(|a| a.id.as_str()).collect()
    }

    /// Number of assets
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

// ============================================================================
// Loader
// ============================================================================

/// A static resource holding a JSON asset array
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogSource {
    /// A JSON file on disk
    File(PathBuf),
    /// An in-memory JSON document with a display name
    Inline {
        /// Name used in logs and errors
        name: String,
        /// The JSON body
        json: String,
    },
}

impl CatalogSource {
    /// File source
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Inline source
    pub fn inline(name: impl Into<String>, json: impl Into<String>) -> Self {
        Self::Inline {
            name: name.into(),
            json: json.into(),
        }
    }

    /// Name used in logs and errors
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Inline { name, .. } => name.clone(),
        }
    }

    async fn read(&self) -> Result<Vec<AssetDescriptor>, CatalogLoadError> {
        let wrap = |kind: CatalogErrorKind| CatalogLoadError {
            source_name: self.name(),
            kind,
        };

        match self {
            Self::File(path) => {
                let body = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| wrap(e.into()))?;
                parse_assets(&body).map_err(|e| wrap(e.into()))
            }
            Self::Inline { json, .. } => parse_assets(json).map_err(|e| wrap(e.into())),
        }
    }
}

/// Result of a fault-isolated load
#[derive(Debug, Default)]
pub struct CatalogLoad {
    /// Everything that loaded
    pub catalog: Catalog,
    /// Sources that failed
    pub failures: Vec<CatalogLoadError>,
}

impl CatalogLoad {
    /// Whether every source loaded
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Reads catalog sources
#[derive(Clone, Copy, Debug, Default)]
pub struct CatalogLoader;

impl CatalogLoader {
    /// Load every source, isolating failures per source
    pub async fn load(sources: &[CatalogSource]) -> CatalogLoad {
        let mut assets = Vec::new();
        let mut failures = Vec::new();

        for source in sources {
            match source.read().await {
                Ok(mut loaded) => {
                    tracing::debug!(source = %source.name(), assets = loaded.len(), "Catalog source loaded");
                    assets.append(&mut loaded);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping catalog source");
                    failures.push(e);
                }
            }
        }

        let catalog = Catalog::from_assets(assets);
        tracing::info!(
            assets = catalog.len(),
            failed_sources = failures.len(),
            "Catalog loaded"
        );
        CatalogLoad { catalog, failures }
    }

    /// Load every source, failing on the first bad one
    ///
    /// # Errors
    ///
    /// Returns the first source that could not be read or parsed.
    pub async fn load_strict(sources: &[CatalogSource]) -> Result<Catalog, CatalogLoadError> {
        let mut assets = Vec::new();
        for source in sources {
            assets.append(&mut source.read().await?);
        }
        Ok(Catalog::from_assets(assets))
    }
}
