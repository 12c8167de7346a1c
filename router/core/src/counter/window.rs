//! Fixed Time Windows
//!
//! A window bucket starts at the first call recorded into it and lasts a
//! fixed length. Buckets are never swept: a read that observes an elapsed
//! bucket reports zero, and the next increment opens a fresh bucket.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of rate window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// 60-second bucket (RPM)
    Minute,
    /// 24-hour bucket (RPD)
    Day,
}

impl WindowKind {
    /// Both window kinds, in evaluation order (day first)
    pub const EVALUATION_ORDER: [WindowKind; 2] = [WindowKind::Day, WindowKind::Minute];

    /// Length of the window
    #[must_use]
    pub fn length(self) -> Duration {
        match self {
            Self::Minute => Duration::from_secs(60),
            Self::Day => Duration::from_secs(24 * 60 * 60),
        }
    }

    fn length_chrono(self) -> chrono::Duration {
        match self {
            Self::Minute => chrono::Duration::seconds(60),
            Self::Day => chrono::Duration::hours(24),
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minute => write!(f, "minute"),
            Self::Day => write!(f, "day"),
        }
    }
}

/// A counter value plus the instant its window opened
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBucket {
    /// Calls recorded in this window
    pub count: u64,
    /// When the window opened
    pub window_start: DateTime<Utc>,
}

impl WindowBucket {
    /// Open a new bucket at `now`
    #[must_use]
    pub fn open(count: u64, now: DateTime<Utc>) -> Self {
        Self {
            count,
            window_start: now,
        }
    }

    /// Whether the window has fully elapsed at `now`
    #[must_use]
    pub fn is_stale(&self, kind: WindowKind, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.window_start) >= kind.length_chrono()
    }

    /// When this bucket's window closes
    #[must_use]
    pub fn resets_at(&self, kind: WindowKind) -> DateTime<Utc> {
        self.window_start + kind.length_chrono()
    }

    /// Time remaining until the window closes (zero once stale)
    #[must_use]
    pub fn time_until_reset(&self, kind: WindowKind, now: DateTime<Utc>) -> Duration {
        self.resets_at(kind)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Count observed for decision purposes
///
/// Absent buckets and buckets whose window has elapsed both count as zero.
#[must_use]
pub fn effective_count(bucket: Option<&WindowBucket>, kind: WindowKind, now: DateTime<Utc>) -> u64 {
    match bucket {
        Some(b) if !b.is_stale(kind, now) => b.count,
        _ => 0,
    }
}
