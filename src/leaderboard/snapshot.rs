use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock};

use super::LeaderboardEntry;

/// Immutable view of the latest published leaderboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrendSnapshot {
    pub entries: Vec<LeaderboardEntry>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// In-process holder of the latest [`TrendSnapshot`].
///
/// Publishing swaps the whole snapshot, so readers see either the previous
/// list or the new one, never a mix.
#[derive(Debug, Default)]
pub struct TrendBoard {
    current: RwLock<Arc<TrendSnapshot>>,
}

impl TrendBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest snapshot.
    pub fn current(&self) -> Arc<TrendSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the snapshot with `entries` stamped `updated_at`.
    pub fn publish(&self, entries: Vec<LeaderboardEntry>, updated_at: DateTime<Utc>) {
        let next = Arc::new(TrendSnapshot {
            entries,
            updated_at: Some(updated_at),
        });
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}
