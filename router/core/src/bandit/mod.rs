//! Exploration Bandit
//!
//! Role-scoped epsilon-greedy arm selection with reward tracking and a
//! cross-arm backend cooldown. Independent of quota state: callers that want
//! both pick with the bandit and admit with the selection engine.
//!
//! # Selection
//!
//! 1. Prune cooldown entries older than the cooldown window.
//! 2. Candidates are the role's arms whose backend is not cooling down; if
//!    every arm is cooling down, all of the role's arms.
//! 3. With probability `epsilon`, pick a candidate uniformly at random.
//!    Otherwise pick the highest `win_rate * (1 + similarity_weight * sim)`,
//!    ties going to the earliest arm.
//! 4. Put the picked arm's backend into cooldown.
//!
//! The default epsilon is 0.4, well above the usual 0.1-0.2, to keep load
//! spread across interchangeable free backends.
//!
//! # Unknown Roles and Arms
//!
//! A role with no arms borrows the fallback role's arms. When neither has
//! any, a stub arm `<role>-route-0` is created. Rewards for an unknown arm id
//! are recorded against any role holding that id, or a new stub arm.

mod arm;
mod cooldown;
mod similarity;
mod state;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;

use crate::clock::SharedClock;

pub use arm::{default_arm_id, ArmSeed, BanditArm, WIN_THRESHOLD};
pub use cooldown::CooldownTracker;
pub use similarity::{context_similarity, Meta, MetaValue};
pub use state::{BanditState, JsonFileRepository, MemoryRepository, StateRepository, DEFAULT_EPSILON};

// ============================================================================
// Configuration
// ============================================================================

/// Tunables for the exploration bandit
#[derive(Clone, Debug, PartialEq)]
pub struct BanditConfig {
    /// Probability of a uniform random pick
    pub epsilon: f64,
    /// Weight of context similarity in the exploit score
    pub similarity_weight: f64,
    /// How long a selected backend is deprioritized
    pub cooldown: Duration,
    /// Role whose arms serve roles that have none
    pub fallback_role: String,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            similarity_weight: 0.5,
            cooldown: Duration::from_secs(30),
            fallback_role: "default".to_string(),
            seed: None,
        }
    }
}

impl BanditConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set epsilon
    #[must_use]
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Set the similarity weight
    #[must_use]
    pub fn with_similarity_weight(mut self, weight: f64) -> Self {
        self.similarity_weight = weight;
        self
    }

    /// Set the cooldown window
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set the fallback role
    #[must_use]
    pub fn with_fallback_role(mut self, role: impl Into<String>) -> Self {
        self.fallback_role = role.into();
        self
    }

    /// Seed the RNG
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

// ============================================================================
// Bandit
// ============================================================================

struct Inner {
    state: BanditState,
    cooldowns: CooldownTracker,
}

/// Role-scoped epsilon-greedy selector
pub struct ExplorationBandit {
    config: BanditConfig,
    inner: Mutex<Inner>,
    rng: SyncMutex<StdRng>,
    repository: Arc<dyn StateRepository>,
    clock: SharedClock,
}

impl std::fmt::Debug for ExplorationBandit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplorationBandit")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExplorationBandit {
    /// Load state from the repository and build the bandit
    ///
    /// Unreadable state is logged and replaced by an empty state. The
    /// configured epsilon overrides the stored one.
    pub async fn open(
        config: BanditConfig,
        repository: Arc<dyn StateRepository>,
        clock: SharedClock,
    ) -> Self {
        let mut state = match repository.load().await {
            Ok(Some(state)) => {
                tracing::info!(roles = state.roles.len(), "Loaded bandit state");
                state
            }
            Ok(None) => BanditState::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Bandit state unreadable, starting fresh");
                BanditState::default()
            }
        };
        state.epsilon = config.epsilon;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            inner: Mutex::new(Inner {
                state,
                cooldowns: CooldownTracker::new(config.cooldown),
            }),
            rng: SyncMutex::new(rng),
            config,
            repository,
            clock,
        }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &BanditConfig {
        &self.config
    }

    /// Seed a role's arms if the role has none yet; returns the role's arms
    pub async fn ensure_role_arms(&self, role: &str, seeds: Vec<ArmSeed>) -> Vec<BanditArm> {
        let mut inner = self.inner.lock().await;
        let has_arms = inner.state.roles.get(role).is_some_and(|arms| !arms.is_empty());

        if !has_arms && !seeds.is_empty() {
            let arms: Vec<BanditArm> = seeds
                .into_iter()
                .enumerate()
                .map(|(i, seed)| seed.into_arm(role, i))
                .collect();
            tracing::info!(role, arms = arms.len(), "Seeded role arms");
            inner.state.roles.insert(role.to_string(), arms);
            self.persist(&inner.state).await;
        }

        inner.state.roles.get(role).cloned().unwrap_or_default()
    }

    /// Pick an arm for a role
    ///
    /// Never fails: an empty role falls back to the fallback role, then to a
    /// freshly created stub arm.
    pub async fn select_arm(&self, role: &str, context: Option<&Meta>) -> BanditArm {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();

        let source_role = self.resolve_role(&inner.state, role);
        let Some(source_role) = source_role else {
            let arm = ArmSeed::default().into_arm(role, 0);
            tracing::info!(role, arm = %arm.id, "No arms for role, created stub");
            inner.state.roles.insert(role.to_string(), vec![arm.clone()]);
            self.persist(&inner.state).await;
            return arm;
        };

        inner.cooldowns.prune(now);
        let Inner { state, cooldowns } = &mut *inner;
        let arms = state.roles.get(&source_role).map_or(&[][..], Vec::as_slice);

        let cooling = cooldowns.active();
        let mut candidates: Vec<&BanditArm> = arms
            .iter()
            .filter(|a| !a.backend_ref.as_deref().is_some_and(|b| cooling.contains(b)))
            .collect();
        if candidates.is_empty() {
            tracing::debug!(role, "Every backend cooling down, ignoring cooldown");
            candidates = arms.iter().collect();
        }

        let (explore, pick) = {
            let mut rng = self.rng.lock();
            let explore = rng.gen::<f64>() < self.config.epsilon;
            let pick = rng.gen_range(0..candidates.len());
            (explore, pick)
        };

        let chosen = if explore {
            candidates[pick]
        } else {
            self.best(&candidates, context)
        };
        let chosen = chosen.clone();

        drop(cooling);
        if let Some(backend) = chosen.backend_ref.as_deref() {
            cooldowns.record(backend, now);
        }

        tracing::debug!(
            role,
            from_role = %source_role,
            arm = %chosen.id,
            explore,
            "Bandit arm selected"
        );
        chosen
    }

    fn resolve_role(&self, state: &BanditState, role: &str) -> Option<String> {
        [role, self.config.fallback_role.as_str()]
            .into_iter()
            .find(|r| state.roles.get(*r).is_some_and(|arms| !arms.is_empty()))
            .map(str::to_string)
    }

    fn best<'a>(&self, candidates: &[&'a BanditArm], context: Option<&Meta>) -> &'a BanditArm {
        let mut best = candidates[0];
        let mut best_score = f64::NEG_INFINITY;
        for &arm in candidates {
            let similarity = context_similarity(&arm.meta, context);
            let score = arm.win_rate() * (1.0 + self.config.similarity_weight * similarity);
            if score > best_score {
                best = arm;
                best_score = score;
            }
        }
        best
    }

    /// Record a reward for an arm and return its updated statistics
    ///
    /// `plays` always increments; `wins` increments when `reward >= 0.5`.
    pub async fn update_arm(&self, role: &str, arm_id: &str, reward: f64) -> BanditArm {
        let mut inner = self.inner.lock().await;
        let state = &mut inner.state;

        let in_role = state
            .roles
            .get(role)
            .and_then(|arms| arms.iter().position(|a| a.id == arm_id));
        let existing = match in_role {
            Some(index) => state.roles.get_mut(role).and_then(|arms| arms.get_mut(index)),
            None => state.find_arm_mut(arm_id),
        };

        let updated = if let Some(arm) = existing {
            arm.record(reward);
            arm.clone()
        } else {
            let mut arm = BanditArm::stub(arm_id);
            arm.record(reward);
            tracing::info!(role, arm = arm_id, "Reward for unknown arm, created stub");
            state.roles.entry(role.to_string()).or_default().push(arm.clone());
            arm
        };

        self.persist(&inner.state).await;
        updated
    }

    /// Add an arm to a role
    ///
    /// An arm whose id already exists in the role is returned unchanged.
    pub async fn add_arm(&self, role: &str, seed: ArmSeed) -> BanditArm {
        let mut inner = self.inner.lock().await;
        let arms = inner.state.roles.entry(role.to_string()).or_default();

        if let Some(existing) = seed
            .id
            .as_deref()
            .and_then(|id| arms.iter().find(|a| a.id == id))
        {
            tracing::debug!(role, arm = %existing.id, "Arm already present");
            return existing.clone();
        }

        let arm = seed.into_arm(role, arms.len());
        arms.push(arm.clone());
        self.persist(&inner.state).await;
        arm
    }

    /// Arms of one role, empty for an unknown role
    pub async fn list_arms(&self, role: &str) -> Vec<BanditArm> {
        self.inner
            .lock()
            .await
            .state
            .roles
            .get(role)
            .cloned()
            .unwrap_or_default()
    }

    /// Arms of every role
    pub async fn all_arms(&self) -> BTreeMap<String, Vec<BanditArm>> {
        self.inner.lock().await.state.roles.clone()
    }

    /// Copy of the full state
    pub async fn state(&self) -> BanditState {
        self.inner.lock().await.state.clone()
    }

    async fn persist(&self, state: &BanditState) {
        if let Err(e) = self.repository.save(state).await {
            tracing::warn!(error = %e, "Failed to persist bandit state; continuing in memory");
        }
    }
}
