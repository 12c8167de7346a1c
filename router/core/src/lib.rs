//! Quota Router Core - Quota-Aware Model Routing
//!
//! Decides, for every outbound call to a rate-limited backend asset, whether
//! the call may proceed now, must be rejected for the current window, or
//! should be silently rerouted to an equivalent asset. A separate
//! exploration bandit picks among interchangeable assets for a role using
//! reward feedback.
//!
//! # Architecture
//!
//! ```text
//! caller ──► SelectionEngine ──► QuotaGovernor ──► CounterStore
//!                 │                                 (memory / JSON file)
//!                 └── Catalog (loaded once, reloadable)
//!
//! caller ──► ExplorationBandit ──► StateRepository
//!             (role arms, cooldowns)   (memory / JSON file)
//! ```
//!
//! The bandit knows nothing about quotas. Callers that want both pick an
//! arm with the bandit and admit the corresponding asset through the
//! selection engine.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use quota_router::{
//!     CatalogLoader, CatalogSource, MemoryCounterStore, SelectionCriteria,
//!     SelectionEngine, SystemClock,
//! };
//!
//! let load = CatalogLoader::load(&[CatalogSource::file("models/google.json")]).await;
//! let engine = SelectionEngine::new(
//!     load.catalog,
//!     Arc::new(MemoryCounterStore::new()),
//!     Arc::new(SystemClock),
//! );
//!
//! let asset = engine.select_model(&SelectionCriteria::any()).await?;
//! ```
//!
//! # Module Overview
//!
//! - [`catalog`]: Asset descriptors and the catalog loader
//! - [`counter`]: Time-windowed counters and store backends
//! - [`governor`]: Admission decisions per asset
//! - [`selection`]: Public selection entry point and reroute loop
//! - [`bandit`]: Role-scoped epsilon-greedy arm selection
//! - [`metrics`]: Routing decision counters
//! - [`config`]: TOML + environment configuration
//! - [`clock`]: Injectable time sources
//! - [`persist`]: Whole-document JSON state files
//! - [`error`]: Error taxonomy

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bandit;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod counter;
pub mod error;
pub mod governor;
pub mod metrics;
pub mod persist;
pub mod selection;

pub use bandit::{
    ArmSeed, BanditArm, BanditConfig, BanditState, ExplorationBandit, JsonFileRepository,
    MemoryRepository, Meta, MetaValue, StateRepository,
};
pub use catalog::{
    AssetDescriptor, Catalog, CatalogLoad, CatalogLoader, CatalogSource, LimitPolicy, RateLimits,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RouterConfig,
};
pub use counter::{
    CounterKey, CounterStore, FileCounterStore, MemoryCounterStore, SharedCounterStore,
    WindowBucket, WindowKind,
};
pub use error::{
    CatalogLoadError, CounterError, HardStopError, PersistError, RateLimitError, SelectionError,
};
pub use governor::{Admission, QuotaGovernor, QuotaStatus, WindowStatus};
pub use metrics::{MetricsSnapshot, RoutingMetrics};
pub use selection::{SelectionCriteria, SelectionEngine, SelectionOutcome, SelectionReason};
