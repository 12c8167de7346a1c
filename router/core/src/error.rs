//! Error Types
//!
//! The failure taxonomy of the routing core. Soft-fail denials never appear
//! here: they are consumed inside the selection engine's reroute loop.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::counter::WindowKind;

// =============================================================================
// Catalog Errors
// =============================================================================

/// Why a catalog source could not be loaded
#[derive(Debug, Error)]
pub enum CatalogErrorKind {
    /// The source could not be read
    #[error("unreadable: {0}")]
    Read(#[from] std::io::Error),

    /// The source is not a JSON array of asset objects
    #[error("malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A single catalog source failed to load
#[derive(Debug, Error)]
#[error("Failed to load catalog source {source_name}: {kind}")]
pub struct CatalogLoadError {
    /// Display name of the failing source (path or inline label)
    pub source_name: String,
    /// Underlying failure
    #[source]
    pub kind: CatalogErrorKind,
}

// =============================================================================
// Counter Errors
// =============================================================================

/// Errors raised by a counter store backend
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CounterError {
    /// The backing store could not be reached
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be interpreted
    #[error("Corrupt counter value for {key}: {detail}")]
    Corrupt {
        /// Rendered counter key
        key: String,
        /// What was wrong with it
        detail: String,
    },
}

// =============================================================================
// Admission Errors
// =============================================================================

/// Minute-window denial on a hard-stop asset
///
/// Transient: the caller should back off and retry after `retry_after`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Rate limit of {limit}/{window} reached for {asset_id} (retry in {}s)", retry_after.as_secs())]
pub struct RateLimitError {
    /// Asset that tripped the limit
    pub asset_id: String,
    /// Window that tripped (always [`WindowKind::Minute`] when raised by selection)
    pub window: WindowKind,
    /// Configured limit for the window
    pub limit: u32,
    /// Time until the window resets
    pub retry_after: Duration,
}

/// Terminal denial: the asset (or the whole catalog) is unusable until a day boundary
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HardStopError {
    /// A hard-stop asset exhausted its daily allowance
    #[error("Daily limit of {limit} reached for {asset_id} (resets in {}s)", retry_after.as_secs())]
    LimitReached {
        /// Asset that tripped the limit
        asset_id: String,
        /// Window that tripped
        window: WindowKind,
        /// Configured limit for the window
        limit: u32,
        /// Time until the window resets
        retry_after: Duration,
    },

    /// No asset in the catalog can admit the call
    #[error("All assets exhausted: {}", asset_ids.join(", "))]
    Exhausted {
        /// Every asset that was considered and denied
        asset_ids: Vec<String>,
    },
}

impl HardStopError {
    /// Window that tripped, if this is a single-asset stop
    #[must_use]
    pub fn window(&self) -> Option<WindowKind> {
        match self {
            Self::LimitReached { window, .. } => Some(*window),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Errors returned by the selection engine
#[derive(Debug, Error)]
pub enum SelectionError {
    /// The requested asset id is not in the catalog
    #[error("Asset not found: {asset_id}")]
    AssetNotFound {
        /// The id that was requested
        asset_id: String,
    },

    /// Minute-window denial on a hard-stop asset
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Day-window denial on a hard-stop asset, or catalog exhaustion
    #[error(transparent)]
    HardStop(#[from] HardStopError),

    /// The counter store failed
    #[error(transparent)]
    Counter(#[from] CounterError),
}

impl SelectionError {
    /// Whether retrying the same request later can succeed within the current day
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit(_) | Self::Counter(_))
    }

    /// Suggested backoff, when one is known
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit(e) => Some(e.retry_after),
            Self::HardStop(HardStopError::LimitReached { retry_after, .. }) => Some(*retry_after),
            _ => None,
        }
    }
}

// =============================================================================
// Persistence Errors
// =============================================================================

/// Errors writing or reading a persisted state file
#[derive(Debug, Error)]
pub enum PersistError {
    /// Filesystem failure
    #[error("State file I/O failed at {path}: {source}")]
    Io {
        /// File being read or written
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The document could not be (de)serialized
    #[error("State file {path} is not valid JSON: {source}")]
    Json {
        /// File being read or written
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },
}
