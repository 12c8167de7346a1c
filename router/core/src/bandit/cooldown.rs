//! Backend cooldown tracking.
//!
//! In-memory only; losing it on restart just loosens short-term diversity.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Recently selected backends, pruned lazily by age
#[derive(Clone, Debug)]
pub struct CooldownTracker {
    window: Duration,
    entries: VecDeque<(String, DateTime<Utc>)>,
}

impl CooldownTracker {
    /// Track with the given cooldown window
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: VecDeque::new(),
        }
    }

    /// Drop entries at least one window old
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let Ok(window) = chrono::Duration::from_std(self.window) else {
            return;
        };
        self.entries
            .retain(|(_, at)| now.signed_duration_since(*at) < window);
    }

    /// Backends currently cooling down
    #[must_use]
    pub fn active(&self) -> HashSet<&str> {
        self.entries.iter().map(|(b, _)| b.as_str()).collect()
    }

    /// Note a selection of `backend` at `now`
    pub fn record(&mut self, backend: &str, now: DateTime<Utc>) {
        self.entries.push_back((backend.to_string(), now));
    }
}
