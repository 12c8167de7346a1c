//! Quota Router CLI
//!
//! Command-line front end for the quota-aware model router. Every invocation
//! loads the catalog, opens the persisted counter and bandit state, runs one
//! command and prints JSON to stdout.
//!
//! # Usage
//!
//! ```bash
//! # Least-used asset across the catalog
//! quota-router --catalog google.json --catalog openrouter.json select
//!
//! # A specific model, rerouted if it is soft-fail and over its limits
//! quota-router select --model gemini-1.0-pro
//!
//! # Remaining quota per asset
//! quota-router status
//!
//! # Bandit arms for a role
//! quota-router bandit select --role coder --context '{"task_size": 3}'
//! quota-router bandit update --role coder --arm coder-route-0 --reward 1.0
//!
//! # With verbose logging
//! RUST_LOG=debug quota-router status
//! ```
//!
//! # Environment Variables
//!
//! - `QUOTA_ROUTER_CONFIG`: Config file path (default: `~/.config/quota-router/router.toml`)
//! - `QUOTA_CATALOG`: Comma-separated catalog files
//! - `QUOTA_FREE_ONLY`: Restrict least-used selection to zero-cost assets
//! - `QUOTA_COUNTER_STATE` / `QUOTA_BANDIT_STATE`: State file paths
//! - `QUOTA_BANDIT_EPSILON`, `QUOTA_BANDIT_COOLDOWN_SECS`, `QUOTA_BANDIT_SEED`
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! Logs go to stderr so stdout stays machine-readable.
//!
//! # Exit Status
//!
//! `0` on success, `1` on any error, `2` when the request was refused by a
//! quota limit (the error JSON includes `retry_after_secs` when known).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use quota_router::{
    load_config_from_path, ArmSeed, BanditConfig, CatalogLoader, ConfigOverrides,
    ExplorationBandit, FileCounterStore, JsonFileRepository, MemoryCounterStore,
    MemoryRepository, Meta, RouterConfig, SelectionCriteria, SelectionEngine, SelectionError,
    SharedClock, SharedCounterStore, StateRepository, SystemClock,
};

// ============================================================================
// Arguments
// ============================================================================

/// Quota Router - quota-aware model selection and exploration
#[derive(Parser, Debug)]
#[command(name = "quota-router")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, env = "QUOTA_ROUTER_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Catalog file; repeat for several (replaces configured sources)
    #[arg(long = "catalog", value_name = "FILE", global = true)]
    catalogs: Vec<PathBuf>,

    /// Only pick zero-cost assets when no model is requested
    #[arg(long, global = true)]
    free_only: bool,

    /// Counter state file
    #[arg(long, value_name = "PATH", global = true)]
    counter_state: Option<PathBuf>,

    /// Bandit state file
    #[arg(long, value_name = "PATH", global = true)]
    bandit_state: Option<PathBuf>,

    /// Keep counters and bandit state in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Bandit exploration probability
    #[arg(long, global = true)]
    epsilon: Option<f64>,

    /// Bandit RNG seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Select an asset and record the call against its quota
    Select {
        /// Requested model id; least-used when absent
        #[arg(long)]
        model: Option<String>,
    },
    /// Show usage and remaining quota for every asset
    Status,
    /// Exploration bandit operations
    #[command(subcommand)]
    Bandit(BanditCommand),
}

#[derive(Debug, Subcommand)]
enum BanditCommand {
    /// Pick an arm for a role
    Select {
        #[command(flatten)]
        role: RoleArg,
        /// Request context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },
    /// Record a reward for an arm
    Update {
        #[command(flatten)]
        role: RoleArg,
        /// Arm id
        #[arg(long)]
        arm: String,
        /// Reward in [0, 1]; 0.5 and above counts as a win
        #[arg(long)]
        reward: f64,
    },
    /// List arms, for one role or all roles
    List {
        /// Role name
        #[arg(long)]
        role: Option<String>,
    },
    /// Add an arm to a role
    Add {
        #[command(flatten)]
        role: RoleArg,
        /// Arm id; generated when absent
        #[arg(long)]
        id: Option<String>,
        /// Backend the arm routes to
        #[arg(long)]
        backend: Option<String>,
    },
}

#[derive(Debug, Args)]
struct RoleArg {
    /// Role name
    #[arg(long)]
    role: String,
}

// ============================================================================
// Entry
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<SelectionError>() {
            Some(refused @ (SelectionError::RateLimit(_) | SelectionError::HardStop(_))) => {
                print_json(&Refusal::from(refused)).ok();
                ExitCode::from(2)
            }
            _ => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quota_router=info".parse()?)
                .add_directive("quota_router_cli=info".parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli)?;
    info!(source = %config.source(), catalogs = config.catalog_sources.len(), "Configuration loaded");

    match cli.command {
        Command::Select { model } => {
            let engine = open_engine(&config, cli.ephemeral).await?;
            let criteria = model.map_or_else(SelectionCriteria::any, SelectionCriteria::model);
            let outcome = engine.select(&criteria).await?;
            print_json(&outcome)
        }
        Command::Status => {
            let engine = open_engine(&config, cli.ephemeral).await?;
            print_json(&engine.quota_report().await?)
        }
        Command::Bandit(command) => {
            let bandit = open_bandit(&config, cli.ephemeral).await;
            run_bandit(&bandit, command).await
        }
    }
}

fn resolve_config(cli: &Cli) -> anyhow::Result<RouterConfig> {
    let path = cli.config.clone().or_else(quota_router::default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if !cli.catalogs.is_empty() {
        overrides = overrides.with_catalog_sources(cli.catalogs.clone());
    }
    if cli.free_only {
        overrides = overrides.with_free_only(true);
    }
    if let Some(path) = &cli.counter_state {
        overrides = overrides.with_counter_state(path.clone());
    }
    if let Some(path) = &cli.bandit_state {
        overrides = overrides.with_bandit_state(path.clone());
    }
    if let Some(epsilon) = cli.epsilon {
        overrides = overrides.with_epsilon(epsilon);
    }
    if let Some(seed) = cli.seed {
        overrides = overrides.with_seed(seed);
    }
    overrides
        .apply(&mut config)
        .context("Invalid command-line options")?;

    Ok(config)
}

// ============================================================================
// Wiring
// ============================================================================

async fn open_engine(config: &RouterConfig, ephemeral: bool) -> anyhow::Result<SelectionEngine> {
    let sources = config.catalog_sources();
    if sources.is_empty() {
        anyhow::bail!("No catalog sources configured; pass --catalog or set QUOTA_CATALOG");
    }

    let catalog = if config.strict_catalog {
        CatalogLoader::load_strict(&sources)
            .await
            .context("Catalog load failed")?
    } else {
        let load = CatalogLoader::load(&sources).await;
        for failure in &load.failures {
            warn!(error = %failure, "Catalog source skipped");
        }
        load.catalog
    };

    let store: SharedCounterStore = match config.counter_state.as_ref().filter(|_| !ephemeral) {
        Some(path) => Arc::new(FileCounterStore::open(path.clone()).await),
        None => Arc::new(MemoryCounterStore::new()),
    };
    let clock: SharedClock = Arc::new(SystemClock);

    Ok(SelectionEngine::new(catalog, store, clock).with_free_only(config.free_only))
}

async fn open_bandit(config: &RouterConfig, ephemeral: bool) -> ExplorationBandit {
    let repository: Arc<dyn StateRepository> =
        match config.bandit_state.as_ref().filter(|_| !ephemeral) {
            Some(path) => Arc::new(JsonFileRepository::new(path.clone())),
            None => Arc::new(MemoryRepository::new()),
        };
    let bandit_config: BanditConfig = config.bandit.clone();
    ExplorationBandit::open(bandit_config, repository, Arc::new(SystemClock)).await
}

async fn run_bandit(bandit: &ExplorationBandit, command: BanditCommand) -> anyhow::Result<()> {
    match command {
        BanditCommand::Select { role, context } => {
            let context: Option<Meta> = context
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("--context must be a JSON object of scalars or lists")?;
            let arm = bandit.select_arm(&role.role, context.as_ref()).await;
            print_json(&arm)
        }
        BanditCommand::Update { role, arm, reward } => {
            if !(0.0..=1.0).contains(&reward) {
                anyhow::bail!("--reward must be within [0, 1], got {reward}");
            }
            let arm = bandit.update_arm(&role.role, &arm, reward).await;
            print_json(&arm)
        }
        BanditCommand::List { role: Some(role) } => print_json(&bandit.list_arms(&role).await),
        BanditCommand::List { role: None } => print_json(&bandit.all_arms().await),
        BanditCommand::Add { role, id, backend } => {
            let mut seed = ArmSeed::default();
            seed.id = id;
            if let Some(backend) = backend {
                seed = seed.with_backend(backend);
            }
            let arm = bandit.add_arm(&role.role, seed).await;
            print_json(&arm)
        }
    }
}

// ============================================================================
// Output
// ============================================================================

#[derive(Serialize)]
struct Refusal {
    error: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl From<&SelectionError> for Refusal {
    fn from(err: &SelectionError) -> Self {
        Self {
            error: err.to_string(),
            retryable: err.is_retryable(),
            retry_after_secs: err.retry_after().map(|d| d.as_secs()),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    println!("{body}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "quota-router",
            "select",
            "--model",
            "gemini-1.0-pro",
            "--catalog",
            "a.json",
            "--catalog",
            "b.json",
            "--ephemeral",
        ])
        .unwrap();
        assert_eq!(cli.catalogs.len(), 2);
        assert!(cli.ephemeral);
        assert!(matches!(cli.command, Command::Select { model: Some(ref m) } if m == "gemini-1.0-pro"));
    }

    #[test]
    fn test_bandit_update_parses() {
        let cli = Cli::try_parse_from([
            "quota-router",
            "bandit",
            "update",
            "--role",
            "coder",
            "--arm",
            "coder-route-0",
            "--reward",
            "0.75",
        ])
        .unwrap();
        match cli.command {
            Command::Bandit(BanditCommand::Update { role, arm, reward }) => {
                assert_eq!(role.role, "coder");
                assert_eq!(arm, "coder-route-0");
                assert!((reward - 0.75).abs() < f64::EPSILON);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_select_against_temp_catalog() {
        let dir = tempfile::TempDir::new().unwrap();
        let catalog = dir.path().join("models.json");
        std::fs::write(
            &catalog,
            r#"[{"id": "m1", "provider": "google", "cost": 0,
                 "simulation": {"onLimitExceeded": "HARD_STOP", "rateLimits": {"freeTier": {"RPM": 1}}}}]"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "quota-router",
            "--config",
            dir.path().join("absent.toml").to_str().unwrap(),
            "--catalog",
            catalog.to_str().unwrap(),
            "--ephemeral",
            "select",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();
        let engine = open_engine(&config, cli.ephemeral).await.unwrap();

        let first = engine.select(&SelectionCriteria::any()).await.unwrap();
        assert_eq!(first.asset.id, "m1");
        let refused = engine
            .select(&SelectionCriteria::model("m1"))
            .await
            .unwrap_err();
        let refusal = Refusal::from(&refused);
        assert!(refusal.retryable);
        assert!(refusal.retry_after_secs.is_some_and(|s| (59..=60).contains(&s)));
    }

    #[tokio::test]
    async fn test_status_reports_usage_persisted_by_earlier_runs() {
        let dir = tempfile::TempDir::new().unwrap();
        let catalog = dir.path().join("models.json");
        std::fs::write(
            &catalog,
            r#"[{"id": "m1", "provider": "google", "cost": 0,
                 "simulation": {"onLimitExceeded": "HARD_STOP", "rateLimits": {"freeTier": {"RPD": 5}}}}]"#,
        )
        .unwrap();
        let counters = dir.path().join("counters.json");

        let cli = Cli::try_parse_from([
            "quota-router",
            "--config",
            dir.path().join("absent.toml").to_str().unwrap(),
            "--catalog",
            catalog.to_str().unwrap(),
            "--counter-state",
            counters.to_str().unwrap(),
            "status",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();

        let earlier = open_engine(&config, false).await.unwrap();
        earlier.select(&SelectionCriteria::model("m1")).await.unwrap();
        drop(earlier);

        let engine = open_engine(&config, false).await.unwrap();
        let report = serde_json::to_value(engine.quota_report().await.unwrap()).unwrap();
        assert!(report.is_array());
        assert_eq!(report[0]["asset_id"], "m1");
        assert_eq!(report[0]["usage"], 1);
        assert_eq!(report[0]["windows"][0]["remaining"], 4);
    }
}
