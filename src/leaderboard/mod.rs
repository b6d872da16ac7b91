//! Ranked leaderboards stored in the shared cache.
//!
//! Each rank of a leaderboard lives in its own hash key
//! (`leaderboard:<name>:<rank>`) with its own expiry. A refresh writes every
//! rank with one shared `updated_at`, and rank 1's timestamp stands for the
//! whole batch when checking freshness.

mod refresher;
mod snapshot;

pub use refresher::{LeaderboardRefresher, PopularList, RefreshOutcome, RefresherSettings};
pub use snapshot::{TrendBoard, TrendSnapshot};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::SharedCache;
use crate::error::CacheResult;

const FIELD_ITEM_ID: &str = "itemId";
const FIELD_TITLE: &str = "title";
const FIELD_THUMBNAIL_URL: &str = "thumbnailUrl";
const FIELD_UPDATED_AT: &str = "updatedAt";

/// One ranked leaderboard record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub item_id: String,
    pub title: String,
    pub thumbnail_url: String,
    pub updated_at: DateTime<Utc>,
}

/// Item written at a rank; the rank is its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedItem {
    pub item_id: String,
    pub title: String,
    pub thumbnail_url: String,
}

impl LeaderboardEntry {
    fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            (FIELD_ITEM_ID.to_string(), self.item_id.clone()),
            (FIELD_TITLE.to_string(), self.title.clone()),
            (FIELD_THUMBNAIL_URL.to_string(), self.thumbnail_url.clone()),
            (FIELD_UPDATED_AT.to_string(), self.updated_at.to_rfc3339()),
        ]
    }

    fn from_fields(rank: u32, fields: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            rank,
            item_id: fields.get(FIELD_ITEM_ID)?.clone(),
            title: fields.get(FIELD_TITLE).cloned().unwrap_or_default(),
            thumbnail_url: fields.get(FIELD_THUMBNAIL_URL).cloned().unwrap_or_default(),
            updated_at: parse_timestamp(fields.get(FIELD_UPDATED_AT)?)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Named, ranked, TTL-bounded leaderboards on a [`SharedCache`].
#[derive(Clone)]
pub struct RankedCache {
    cache: Arc<dyn SharedCache>,
    max_rank: u32,
}

impl RankedCache {
    /// Default highest rank cleared when a shorter batch replaces a longer one.
    pub const DEFAULT_MAX_RANK: u32 = 50;

    /// Create a ranked cache on `cache`.
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self {
            cache,
            max_rank: Self::DEFAULT_MAX_RANK,
        }
    }

    /// Override the highest rank this cache manages.
    pub fn with_max_rank(mut self, max_rank: u32) -> Self {
        self.max_rank = max_rank.max(1);
        self
    }

    /// Highest rank written or read.
    pub fn max_rank(&self) -> usize {
        self.max_rank as usize
    }

    fn rank_key(name: &str, rank: u32) -> String {
        format!("leaderboard:{}:{}", name, rank)
    }

    /// Write `items` at ranks 1..=len, all stamped with `updated_at`.
    ///
    /// Ranks above the new batch length are cleared so a shorter batch fully
    /// replaces a longer one. Readers may observe a mix of old and new ranks
    /// while the writes are in flight.
    pub async fn write_batch(
        &self,
        name: &str,
        items: &[RankedItem],
        updated_at: DateTime<Utc>,
        ttl: Duration,
    ) -> CacheResult<Vec<LeaderboardEntry>> {
        if items.len() > self.max_rank as usize {
            warn!(
                leaderboard = name,
                count = items.len(),
                max_rank = self.max_rank,
                "Batch longer than managed ranks, extra items dropped"
            );
        }
        let mut written = Vec::with_capacity(items.len());

        for (rank, item) in (1u32..).zip(items.iter().take(self.max_rank as usize)) {
            let entry = LeaderboardEntry {
                rank,
                item_id: item.item_id.clone(),
                title: item.title.clone(),
                thumbnail_url: item.thumbnail_url.clone(),
                updated_at,
            };
            self.cache
                .hash_put_all(&Self::rank_key(name, rank), &entry.to_fields(), ttl)
                .await?;
            written.push(entry);
        }

        let first_stale = written.len() as u32 + 1;
        for rank in first_stale..=self.max_rank {
            self.cache.delete(&Self::rank_key(name, rank)).await?;
        }

        debug!(leaderboard = name, count = written.len(), "Leaderboard batch written");
        Ok(written)
    }

    /// Read ranks 1..=n in one round-trip, skipping missing or unreadable ranks.
    pub async fn read_range(&self, name: &str, n: usize) -> CacheResult<Vec<LeaderboardEntry>> {
        let n = n.min(self.max_rank as usize) as u32;
        if n == 0 {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = (1..=n).map(|rank| Self::rank_key(name, rank)).collect();
        let maps = self.cache.hash_get_all_many(&keys).await?;

        let entries = (1..=n)
            .zip(maps.iter())
            .filter(|(_, fields)| !fields.is_empty())
            .filter_map(|(rank, fields)| {
                let entry = LeaderboardEntry::from_fields(rank, fields);
                if entry.is_none() {
                    warn!(leaderboard = name, rank, "Skipping unreadable leaderboard entry");
                }
                entry
            })
            .collect();

        Ok(entries)
    }

    /// The `updated_at` stored at `rank`, if present and parseable.
    pub async fn read_updated_at(&self, name: &str, rank: u32) -> CacheResult<Option<DateTime<Utc>>> {
        let raw = self
            .cache
            .hash_get(&Self::rank_key(name, rank), FIELD_UPDATED_AT)
            .await?;
        Ok(raw.as_deref().and_then(parse_timestamp))
    }

    /// Whether rank 1 was written no more than `max_age` before `now`.
    pub async fn is_fresh(
        &self,
        name: &str,
        max_age: chrono::Duration,
        now: DateTime<Utc>,
    ) -> CacheResult<bool> {
        Ok(self
            .read_updated_at(name, 1)
            .await?
            .is_some_and(|updated_at| now - updated_at <= max_age))
    }
}
