//! Persisted bandit state and the repositories that store it.
//!
//! The document is rewritten whole on every mutation:
//!
//! ```json
//! { "roles": { "coder": [ { "id": "...", "backendRef": "...", "wins": 3, "plays": 5 } ] },
//!   "epsilon": 0.4 }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::arm::BanditArm;
use crate::error::PersistError;
use crate::persist::StateFile;

/// Default exploration probability
pub const DEFAULT_EPSILON: f64 = 0.4;

fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

/// Arms per role plus the exploration rate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BanditState {
    /// Arms keyed by role, in first-seen order within each role
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<BanditArm>>,
    /// Exploration probability in effect when the state was written
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

impl Default for BanditState {
    fn default() -> Self {
        Self {
            roles: BTreeMap::new(),
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl BanditState {
    /// Find an arm by id in any role (role order, then arm order)
    pub fn find_arm_mut(&mut self, arm_id: &str) -> Option<&mut BanditArm> {
        self.roles
            .values_mut()
            .flat_map(|arms| arms.iter_mut())
            .find(|a| a.id == arm_id)
    }
}

/// Load/save boundary for bandit state
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Read the stored state; `Ok(None)` when nothing was stored yet
    async fn load(&self) -> Result<Option<BanditState>, PersistError>;

    /// Replace the stored state
    async fn save(&self, state: &BanditState) -> Result<(), PersistError>;
}

/// JSON file repository
#[derive(Debug)]
pub struct JsonFileRepository {
    file: StateFile<BanditState>,
}

impl JsonFileRepository {
    /// Repository at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: StateFile::new(path),
        }
    }
}

#[async_trait]
impl StateRepository for JsonFileRepository {
    async fn load(&self) -> Result<Option<BanditState>, PersistError> {
        self.file.load().await
    }

    async fn save(&self, state: &BanditState) -> Result<(), PersistError> {
        self.file.save(state).await
    }
}

/// In-memory repository for tests and ephemeral use
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<Option<BanditState>>,
    saves: AtomicUsize,
}

impl MemoryRepository {
    /// Empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-loaded with a state
    #[must_use]
    pub fn with_state(state: BanditState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Last saved state
    #[must_use]
    pub fn stored(&self) -> Option<BanditState> {
        self.state.lock().clone()
    }

    /// Number of saves so far
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StateRepository for MemoryRepository {
    async fn load(&self) -> Result<Option<BanditState>, PersistError> {
        Ok(self.stored())
    }

    async fn save(&self, state: &BanditState) -> Result<(), PersistError> {
        *self.state.lock() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
