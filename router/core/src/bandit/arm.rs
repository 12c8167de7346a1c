//! Bandit arms and the seeds they are created from.

use serde::{Deserialize, Serialize};

use super::similarity::{Meta, MetaValue};

/// Reward at or above which a play counts as a win
pub const WIN_THRESHOLD: f64 = 0.5;

/// A candidate tracked by the exploration bandit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditArm {
    /// Arm id, unique within its role
    pub id: String,
    /// Backend this arm routes to; arms sharing one share a cooldown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_ref: Option<String>,
    /// Plays that earned a winning reward
    #[serde(default)]
    pub wins: u64,
    /// Total plays
    #[serde(default)]
    pub plays: u64,
    /// Features compared against the selection context
    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub meta: Meta,
}

impl BanditArm {
    /// Fresh arm with no history and no backend
    pub fn stub(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backend_ref: None,
            wins: 0,
            plays: 0,
            meta: Meta::new(),
        }
    }

    /// `wins / plays`, zero before the first play
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn win_rate(&self) -> f64 {
        if self.plays == 0 {
            0.0
        } else {
            self.wins as f64 / self.plays as f64
        }
    }

    /// Count one play with the observed reward
    pub fn record(&mut self, reward: f64) {
        self.plays += 1;
        if reward >= WIN_THRESHOLD {
            self.wins += 1;
        }
    }
}

/// Caller-provided template for a new arm
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArmSeed {
    /// Arm id; generated from the role when absent
    pub id: Option<String>,
    /// Backend for cooldown tracking
    pub backend_ref: Option<String>,
    /// Context features
    pub meta: Meta,
}

impl ArmSeed {
    /// Seed with an explicit id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Set the backend
    #[must_use]
    pub fn with_backend(mut self, backend_ref: impl Into<String>) -> Self {
        self.backend_ref = Some(backend_ref.into());
        self
    }

    /// Add one metadata field
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Build the arm; unnamed seeds become `<role>-route-<index>`
    #[must_use]
    pub fn into_arm(self, role: &str, index: usize) -> BanditArm {
        BanditArm {
            id: self.id.unwrap_or_else(|| default_arm_id(role, index)),
            backend_ref: self.backend_ref,
            wins: 0,
            plays: 0,
            meta: self.meta,
        }
    }
}

/// Generated id for the `index`th arm of a role
#[must_use]
pub fn default_arm_id(role: &str, index: usize) -> String {
    format!("{role}-route-{index}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_threshold() {
        let mut arm = BanditArm::stub("a");
        arm.record(0.5);
        arm.record(0.49);
        arm.record(1.0);
        assert_eq!((arm.wins, arm.plays), (2, 3));
        assert!((arm.win_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unplayed_rate_is_zero() {
        assert_eq!(BanditArm::stub("a").win_rate(), 0.0);
    }

    #[test]
    fn test_seed_defaults_id() {
        let arm = ArmSeed::default().with_backend("openrouter").into_arm("coder", 2);
        assert_eq!(arm.id, "coder-route-2");
        assert_eq!(arm.backend_ref.as_deref(), Some("openrouter"));
    }

    #[test]
    fn test_wire_shape() {
        let arm = ArmSeed::new("x").with_backend("google").into_arm("r", 0);
        let json = serde_json::to_value(&arm).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "id": "x", "backendRef": "google", "wins": 0, "plays": 0 })
        );
    }
}
