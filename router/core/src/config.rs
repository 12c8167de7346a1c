//! TOML Configuration File Support
//!
//! Centralized configuration for the router, loaded from
//! `~/.config/quota-router/router.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [catalog]
//! sources = ["/etc/quota-router/google.json", "/etc/quota-router/openrouter.json"]
//! free_only = true
//! strict = false
//!
//! [counters]
//! state_path = "/var/lib/quota-router/counters.json"
//!
//! [bandit]
//! state_path = "/var/lib/quota-router/bandit.json"
//! epsilon = 0.4
//! similarity_weight = 0.5
//! cooldown_secs = 30
//! fallback_role = "default"
//! seed = 42
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bandit::BanditConfig;
use crate::catalog::CatalogSource;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Catalog section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogToml {
    /// Catalog JSON files, loaded in order
    pub sources: Option<Vec<PathBuf>>,

    /// Only select zero-cost assets
    pub free_only: Option<bool>,

    /// Fail on the first bad source instead of skipping it
    pub strict: Option<bool>,
}

/// Counter section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CountersToml {
    /// Counter snapshot file
    pub state_path: Option<PathBuf>,
}

/// Bandit section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditToml {
    /// Bandit state file
    pub state_path: Option<PathBuf>,

    /// Exploration probability
    pub epsilon: Option<f64>,

    /// Context similarity weight
    pub similarity_weight: Option<f64>,

    /// Backend cooldown in seconds
    pub cooldown_secs: Option<u64>,

    /// Role used when a role has no arms
    pub fallback_role: Option<String>,

    /// RNG seed
    pub seed: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterToml {
    /// Catalog section
    pub catalog: CatalogToml,

    /// Counter section
    pub counters: CountersToml,

    /// Bandit section
    pub bandit: BanditToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the router
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Catalog files, in load order
    pub catalog_sources: Vec<PathBuf>,

    /// Restrict least-used selection to zero-cost assets
    pub free_only: bool,

    /// Fail on the first bad catalog source
    pub strict_catalog: bool,

    /// Counter snapshot file; `None` keeps counters in memory
    pub counter_state: Option<PathBuf>,

    /// Bandit state file; `None` keeps bandit state in memory
    pub bandit_state: Option<PathBuf>,

    /// Bandit tunables
    pub bandit: BanditConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let state_dir = default_state_dir();
        Self {
            catalog_sources: Vec::new(),
            free_only: false,
            strict_catalog: false,
            counter_state: state_dir.as_ref().map(|d| d.join("counters.json")),
            bandit_state: state_dir.map(|d| d.join("bandit.json")),
            bandit: BanditConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RouterConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Catalog files as loader sources
    #[must_use]
    pub fn catalog_sources(&self) -> Vec<CatalogSource> {
        self.catalog_sources
            .iter()
            .cloned()
            .map(CatalogSource::File)
            .collect()
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if epsilon or the similarity
    /// weight lies outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.bandit.epsilon) {
            return Err(ConfigError::ValidationError(format!(
                "bandit.epsilon must be within [0, 1], got {}",
                self.bandit.epsilon
            )));
        }
        if !(0.0..=1.0).contains(&self.bandit.similarity_weight) {
            return Err(ConfigError::ValidationError(format!(
                "bandit.similarity_weight must be within [0, 1], got {}",
                self.bandit.similarity_weight
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/quota-router/router.toml` or
/// `~/.config/quota-router/router.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("quota-router").join("router.toml"))
}

/// Default directory for counter and bandit state
#[must_use]
pub fn default_state_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("quota-router"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting values are out of range.
pub fn load_config() -> Result<RouterConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// A missing file is not an error; defaults and environment are used.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the
/// resulting values are out of range.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RouterConfig, ConfigError> {
    let mut config = RouterConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RouterToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

fn apply_toml_config(config: &mut RouterConfig, toml: &RouterToml) {
    if let Some(ref sources) = toml.catalog.sources {
        config.catalog_sources.clone_from(sources);
    }
    if let Some(free_only) = toml.catalog.free_only {
        config.free_only = free_only;
    }
    if let Some(strict) = toml.catalog.strict {
        config.strict_catalog = strict;
    }

    if toml.counters.state_path.is_some() {
        config.counter_state.clone_from(&toml.counters.state_path);
    }

    if toml.bandit.state_path.is_some() {
        config.bandit_state.clone_from(&toml.bandit.state_path);
    }
    if let Some(epsilon) = toml.bandit.epsilon {
        config.bandit.epsilon = epsilon;
    }
    if let Some(weight) = toml.bandit.similarity_weight {
        config.bandit.similarity_weight = weight;
    }
    if let Some(secs) = toml.bandit.cooldown_secs {
        config.bandit.cooldown = Duration::from_secs(secs);
    }
    if let Some(ref role) = toml.bandit.fallback_role {
        config.bandit.fallback_role.clone_from(role);
    }
    if toml.bandit.seed.is_some() {
        config.bandit.seed = toml.bandit.seed;
    }
}

fn apply_env_config(config: &mut RouterConfig) {
    if let Ok(sources) = std::env::var("QUOTA_CATALOG") {
        config.catalog_sources = sources
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        config.source = ConfigSource::Env;
    }
    if let Ok(free_only) = std::env::var("QUOTA_FREE_ONLY") {
        config.free_only = free_only != "0" && free_only.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
    if let Ok(path) = std::env::var("QUOTA_COUNTER_STATE") {
        config.counter_state = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
    if let Ok(path) = std::env::var("QUOTA_BANDIT_STATE") {
        config.bandit_state = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
    if let Ok(epsilon) = std::env::var("QUOTA_BANDIT_EPSILON") {
        if let Ok(e) = epsilon.parse::<f64>() {
            config.bandit.epsilon = e;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(cooldown) = std::env::var("QUOTA_BANDIT_COOLDOWN_SECS") {
        if let Ok(secs) = cooldown.parse::<u64>() {
            config.bandit.cooldown = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(seed) = std::env::var("QUOTA_BANDIT_SEED") {
        if let Ok(s) = seed.parse::<u64>() {
            config.bandit.seed = Some(s);
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Catalog files override (replaces the configured list)
    pub catalog_sources: Option<Vec<PathBuf>>,

    /// Free-only override
    pub free_only: Option<bool>,

    /// Counter state path override
    pub counter_state: Option<PathBuf>,

    /// Bandit state path override
    pub bandit_state: Option<PathBuf>,

    /// Epsilon override
    pub epsilon: Option<f64>,

    /// Seed override
    pub seed: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set catalog sources override
    #[must_use]
    pub fn with_catalog_sources(mut self, sources: Vec<PathBuf>) -> Self {
        self.catalog_sources = Some(sources);
        self
    }

    /// Set free-only override
    #[must_use]
    pub fn with_free_only(mut self, free_only: bool) -> Self {
        self.free_only = Some(free_only);
        self
    }

    /// Set counter state path override
    #[must_use]
    pub fn with_counter_state(mut self, path: PathBuf) -> Self {
        self.counter_state = Some(path);
        self
    }

    /// Set bandit state path override
    #[must_use]
    pub fn with_bandit_state(mut self, path: PathBuf) -> Self {
        self.bandit_state = Some(path);
        self
    }

    /// Set epsilon override
    #[must_use]
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }

    /// Set seed override
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn is_empty(&self) -> bool {
        self.catalog_sources.is_none()
            && self.free_only.is_none()
            && self.counter_state.is_none()
            && self.bandit_state.is_none()
            && self.epsilon.is_none()
            && self.seed.is_none()
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override is out of range.
    pub fn apply(&self, config: &mut RouterConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        config.source = ConfigSource::Cli;

        if let Some(ref sources) = self.catalog_sources {
            config.catalog_sources.clone_from(sources);
        }
        if let Some(free_only) = self.free_only {
            config.free_only = free_only;
        }
        if self.counter_state.is_some() {
            config.counter_state.clone_from(&self.counter_state);
        }
        if self.bandit_state.is_some() {
            config.bandit_state.clone_from(&self.bandit_state);
        }
        if let Some(epsilon) = self.epsilon {
            config.bandit.epsilon = epsilon;
        }
        if self.seed.is_some() {
            config.bandit.seed = self.seed;
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Serializes tests that read or write the process environment.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    fn clear_config_env_vars() {
        for var in [
            "QUOTA_CATALOG",
            "QUOTA_FREE_ONLY",
            "QUOTA_COUNTER_STATE",
            "QUOTA_BANDIT_STATE",
            "QUOTA_BANDIT_EPSILON",
            "QUOTA_BANDIT_COOLDOWN_SECS",
            "QUOTA_BANDIT_SEED",
        ] {
            std::env::remove_var(var);
        }
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = RouterConfig::default();

        assert!(config.catalog_sources.is_empty());
        assert!(!config.free_only);
        assert!(!config.strict_catalog);
        assert_eq!(config.bandit.epsilon, 0.4);
        assert_eq!(config.bandit.cooldown, Duration::from_secs(30));
        assert_eq!(config.bandit.fallback_role, "default");
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("quota-router"));
            assert!(p.to_string_lossy().ends_with("router.toml"));
        }
    }

    #[test]
    fn test_parse_valid_toml() {
        let _env = ENV_LOCK.lock();
        clear_config_env_vars();

        let file = write_toml(
            r#"
[catalog]
sources = ["/models/google.json", "/models/openrouter.json"]
free_only = true
strict = true

[counters]
state_path = "/tmp/counters.json"

[bandit]
state_path = "/tmp/bandit.json"
epsilon = 0.25
similarity_weight = 0.75
cooldown_secs = 10
fallback_role = "generalist"
seed = 42
"#,
        );

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(
            config.catalog_sources,
            vec![
                PathBuf::from("/models/google.json"),
                PathBuf::from("/models/openrouter.json")
            ]
        );
        assert!(config.free_only);
        assert!(config.strict_catalog);
        assert_eq!(config.counter_state, Some(PathBuf::from("/tmp/counters.json")));
        assert_eq!(config.bandit_state, Some(PathBuf::from("/tmp/bandit.json")));
        assert_eq!(config.bandit.epsilon, 0.25);
        assert_eq!(config.bandit.similarity_weight, 0.75);
        assert_eq!(config.bandit.cooldown, Duration::from_secs(10));
        assert_eq!(config.bandit.fallback_role, "generalist");
        assert_eq!(config.bandit.seed, Some(42));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.catalog_sources().len(), 2);
    }

    #[test]
    fn test_parse_partial_toml() {
        let _env = ENV_LOCK.lock();
        clear_config_env_vars();

        let file = write_toml("[bandit]\nepsilon = 0.1\n");
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.bandit.epsilon, 0.1);
        assert_eq!(config.bandit.similarity_weight, 0.5);
        assert!(config.catalog_sources.is_empty());
    }

    #[test]
    fn test_missing_file_graceful() {
        let _env = ENV_LOCK.lock();
        clear_config_env_vars();

        let config =
            load_config_from_path(Some(PathBuf::from("/nonexistent/quota-router/router.toml")))
                .unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let _env = ENV_LOCK.lock();
        clear_config_env_vars();

        let file = write_toml("[catalog\nsources = 3");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_out_of_range_epsilon_rejected() {
        let _env = ENV_LOCK.lock();
        clear_config_env_vars();

        let file = write_toml("[bandit]\nepsilon = 1.5\n");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let _env = ENV_LOCK.lock();
        clear_config_env_vars();

        let file = write_toml("[catalog]\nsources = [\"/from/file.json\"]\n[bandit]\nseed = 1\n");
        std::env::set_var("QUOTA_CATALOG", "/a.json, /b.json");
        std::env::set_var("QUOTA_FREE_ONLY", "true");
        std::env::set_var("QUOTA_BANDIT_SEED", "99");

        let config = load_config_from_path(Some(file.path().to_path_buf()));
        clear_config_env_vars();
        let config = config.unwrap();

        assert_eq!(
            config.catalog_sources,
            vec![PathBuf::from("/a.json"), PathBuf::from("/b.json")]
        );
        assert!(config.free_only);
        assert_eq!(config.bandit.seed, Some(99));
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_cli_overrides_env() {
        let _env = ENV_LOCK.lock();
        clear_config_env_vars();

        std::env::set_var("QUOTA_BANDIT_EPSILON", "0.3");
        let config = load_config_from_path(None);
        clear_config_env_vars();
        let mut config = config.unwrap();
        assert_eq!(config.bandit.epsilon, 0.3);

        ConfigOverrides::new()
            .with_epsilon(0.0)
            .with_counter_state(PathBuf::from("/cli/counters.json"))
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.bandit.epsilon, 0.0);
        assert_eq!(config.counter_state, Some(PathBuf::from("/cli/counters.json")));
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = RouterConfig::default();
        ConfigOverrides::new().apply(&mut config).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = RouterConfig::default();
        let result = ConfigOverrides::new().with_epsilon(-0.1).apply(&mut config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
