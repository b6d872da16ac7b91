use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{LeaderboardEntry, RankedCache, RankedItem, TrendBoard};
use crate::config::Config;
use crate::discovery::{approve_candidates, DiscoveredItem, DiscoverySource, SearchCriteria, TitleClassifier};
use crate::error::AppResult;

/// Static settings for a [`LeaderboardRefresher`].
#[derive(Debug, Clone)]
pub struct RefresherSettings {
    pub leaderboard_name: String,
    pub ttl: Duration,
    pub query: String,
    pub region: String,
    /// Minimum number of candidates requested from discovery before filtering.
    pub candidate_pool: usize,
    /// `{id}` is replaced by the item id.
    pub thumbnail_fallback_template: String,
    /// Oldest in-process snapshot the read path serves without touching the cache.
    pub snapshot_max_age: Duration,
}

impl RefresherSettings {
    /// Build settings from the cache, discovery and scheduler sections.
    pub fn from_config(config: &Config) -> Self {
        Self {
            leaderboard_name: config.cache.leaderboard_name.clone(),
            ttl: Duration::from_secs(config.cache.leaderboard_ttl_secs),
            query: config.discovery.query.clone(),
            region: config.discovery.region.clone(),
            candidate_pool: 50,
            thumbnail_fallback_template: config.discovery.thumbnail_fallback_template.clone(),
            snapshot_max_age: Duration::from_secs(
                config.scheduler.freshness_max_age_secs.max(0) as u64,
            ),
        }
    }

    fn fallback_thumbnail(&self, item_id: &str) -> String {
        self.thumbnail_fallback_template.replace("{id}", item_id)
    }
}

impl Default for RefresherSettings {
    fn default() -> Self {
        Self {
            leaderboard_name: "popular".to_string(),
            ttl: Duration::from_secs(70 * 60),
            query: "news".to_string(),
            region: "KR".to_string(),
            candidate_pool: 50,
            thumbnail_fallback_template: "https://i.ytimg.com/vi/{id}/hqdefault.jpg".to_string(),
            snapshot_max_age: Duration::from_secs(65 * 60),
        }
    }
}

/// What a refresh did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new batch was written.
    Refreshed {
        count: usize,
        updated_at: DateTime<Utc>,
    },
    /// Discovery produced no approved candidates; the leaderboard was left as-is.
    Empty,
    /// An upstream or cache failure left the leaderboard stale.
    Failed { message: String },
}

/// Leaderboard contents returned to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularList {
    pub entries: Vec<LeaderboardEntry>,
    pub updated_at: DateTime<Utc>,
}

/// Keeps a named leaderboard filled from the discovery source.
pub struct LeaderboardRefresher {
    ranked: RankedCache,
    board: Arc<TrendBoard>,
    discovery: Arc<dyn DiscoverySource>,
    classifier: Option<Arc<dyn TitleClassifier>>,
    settings: RefresherSettings,
}

impl LeaderboardRefresher {
    /// Create a refresher writing into `ranked` and publishing to `board`.
    pub fn new(
        ranked: RankedCache,
        board: Arc<TrendBoard>,
        discovery: Arc<dyn DiscoverySource>,
        settings: RefresherSettings,
    ) -> Self {
        Self {
            ranked,
            board,
            discovery,
            classifier: None,
            settings,
        }
    }

    /// Filter candidates through `classifier` before ranking.
    pub fn with_classifier(mut self, classifier: Arc<dyn TitleClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// The leaderboard this refresher maintains.
    pub fn leaderboard_name(&self) -> &str {
        &self.settings.leaderboard_name
    }

    /// The ranked cache this refresher writes to.
    pub fn ranked_cache(&self) -> &RankedCache {
        &self.ranked
    }

    /// `size` limited to the ranks the cache manages.
    fn capped(&self, size: usize) -> usize {
        let max_rank = self.ranked.max_rank();
        if size > max_rank {
            warn!(
                leaderboard = %self.settings.leaderboard_name,
                requested = size,
                max_rank,
                "Requested size exceeds managed ranks, clamping"
            );
        }
        size.min(max_rank)
    }

    /// Pull up to `size` approved candidates and write them as one batch.
    ///
    /// Never returns an error: failures are logged and reported as
    /// [`RefreshOutcome::Failed`], leaving the previous leaderboard in place.
    pub async fn refresh(&self, size: usize) -> RefreshOutcome {
        let name = &self.settings.leaderboard_name;
        let size = self.capped(size);
        let criteria = SearchCriteria {
            query: self.settings.query.clone(),
            region: self.settings.region.clone(),
            max_results: size.max(self.settings.candidate_pool),
        };

        let candidates = match self.discovery.search(&criteria).await {
            Ok(c) => c,
            Err(e) => {
                error!(leaderboard = %name, error = %e, "Discovery failed, leaderboard left stale");
                return RefreshOutcome::Failed {
                    message: e.to_string(),
                };
            }
        };
        let discovered = candidates.len();

        let approved = approve_candidates(self.classifier.as_ref(), candidates).await;
        if approved.is_empty() {
            warn!(leaderboard = %name, discovered, "No approved candidates, leaderboard left as-is");
            return RefreshOutcome::Empty;
        }

        let items: Vec<RankedItem> = approved
            .into_iter()
            .take(size)
            .map(|c| self.to_ranked_item(c))
            .collect();

        let updated_at = Utc::now();
        match self
            .ranked
            .write_batch(name, &items, updated_at, self.settings.ttl)
            .await
        {
            Ok(written) => {
                let count = written.len();
                self.board.publish(written, updated_at);
                info!(
                    leaderboard = %name,
                    discovered,
                    count,
                    updated_at = %updated_at,
                    "Leaderboard refreshed"
                );
                RefreshOutcome::Refreshed { count, updated_at }
            }
            Err(e) => {
                error!(leaderboard = %name, error = %e, "Leaderboard write failed");
                RefreshOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    fn to_ranked_item(&self, candidate: DiscoveredItem) -> RankedItem {
        let thumbnail_url = match candidate.thumbnail_url {
            Some(url) if !url.trim().is_empty() => url,
            _ => self.settings.fallback_thumbnail(&candidate.id),
        };
        RankedItem {
            item_id: candidate.id,
            title: candidate.title,
            thumbnail_url,
        }
    }

    /// The latest batch published by this process, if it is recent enough
    /// and holds at least `size` entries.
    fn from_snapshot(&self, size: usize) -> Option<PopularList> {
        let snapshot = self.board.current();
        let updated_at = snapshot.updated_at?;
        let fresh = (Utc::now() - updated_at)
            .to_std()
            .map_or(true, |age| age <= self.settings.snapshot_max_age);
        if !fresh || snapshot.entries.len() < size {
            return None;
        }
        Some(PopularList {
            entries: snapshot.entries[..size].to_vec(),
            updated_at,
        })
    }

    /// Read the leaderboard, refilling it once if it is short or unstamped.
    ///
    /// A fresh in-process snapshot is served directly; otherwise the shared
    /// cache is read. `size` is limited to the ranks the cache manages.
    pub async fn get_popular_list(&self, size: usize) -> AppResult<PopularList> {
        let name = &self.settings.leaderboard_name;
        let size = self.capped(size);

        if let Some(list) = self.from_snapshot(size) {
            debug!(leaderboard = %name, count = list.entries.len(), "Serving leaderboard from snapshot");
            return Ok(list);
        }

        let mut entries = self.ranked.read_range(name, size).await?;
        let mut updated_at = self.ranked.read_updated_at(name, 1).await?;

        if entries.len() < size || updated_at.is_none() {
            debug!(
                leaderboard = %name,
                present = entries.len(),
                requested = size,
                "Leaderboard short or unstamped, refreshing synchronously"
            );
            self.refresh(size).await;
            entries = self.ranked.read_range(name, size).await?;
            updated_at = self.ranked.read_updated_at(name, 1).await?;
        }

        let updated_at = updated_at
            .or_else(|| entries.first().map(|e| e.updated_at))
            .unwrap_or_else(Utc::now);

        Ok(PopularList {
            entries,
            updated_at,
        })
    }

    /// Item ids at ranks 1..=n, in rank order.
    pub async fn top_item_ids(&self, n: usize) -> AppResult<Vec<String>> {
        Ok(self
            .ranked
            .read_range(&self.settings.leaderboard_name, n)
            .await?
            .into_iter()
            .map(|e| e.item_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::discovery::{MockDiscoverySource, MockTitleClassifier};
    use crate::error::DiscoveryError;

    fn candidates(n: usize) -> Vec<DiscoveredItem> {
        (1..=n)
            .map(|i| {
                DiscoveredItem::new(format!("vid{}", i), format!("Title {}", i))
                    .with_thumbnail(format!("https://img/vid{}.jpg", i))
            })
            .collect()
    }

    fn refresher(discovery: MockDiscoverySource) -> (LeaderboardRefresher, Arc<TrendBoard>) {
        refresher_on(Arc::new(MemoryCache::new()), discovery)
    }

    fn refresher_on(
        backend: Arc<MemoryCache>,
        discovery: MockDiscoverySource,
    ) -> (LeaderboardRefresher, Arc<TrendBoard>) {
        let board = Arc::new(TrendBoard::new());
        let ranked = RankedCache::new(backend);
        let refresher = LeaderboardRefresher::new(
            ranked,
            Arc::clone(&board),
            Arc::new(discovery),
            RefresherSettings::default(),
        );
        (refresher, board)
    }

    #[tokio::test]
    async fn test_refresh_writes_ranks_with_one_timestamp() {
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().returning(|_| Ok(candidates(5)));
        let (refresher, board) = refresher(discovery);

        let outcome = refresher.refresh(3).await;
        let RefreshOutcome::Refreshed { count, updated_at } = outcome else {
            panic!("expected refresh, got {:?}", outcome);
        };
        assert_eq!(count, 3);

        let entries = refresher.ranked_cache().read_range("popular", 10).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.updated_at == updated_at));
        assert_eq!(board.current().entries.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_thumbnail_uses_fallback() {
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().returning(|_| {
            Ok(vec![
                DiscoveredItem::new("abc", "No thumb"),
                DiscoveredItem::new("def", "Blank thumb").with_thumbnail("  "),
            ])
        });
        let (refresher, _) = refresher(discovery);

        refresher.refresh(2).await;

        let entries = refresher.ranked_cache().read_range("popular", 2).await.unwrap();
        assert_eq!(entries[0].thumbnail_url, "https://i.ytimg.com/vi/abc/hqdefault.jpg");
        assert_eq!(entries[1].thumbnail_url, "https://i.ytimg.com/vi/def/hqdefault.jpg");
    }

    #[tokio::test]
    async fn test_discovery_failure_leaves_leaderboard_stale() {
        let mut discovery = MockDiscoverySource::new();
        let mut calls = 0;
        discovery.expect_search().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(candidates(2))
            } else {
                Err(DiscoveryError::Api {
                    status: 503,
                    message: "quota".to_string(),
                })
            }
        });
        let (refresher, _) = refresher(discovery);

        assert!(matches!(refresher.refresh(2).await, RefreshOutcome::Refreshed { .. }));
        assert!(matches!(refresher.refresh(2).await, RefreshOutcome::Failed { .. }));

        let entries = refresher.ranked_cache().read_range("popular", 2).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_classifier_rejection_keeps_previous_batch() {
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().returning(|_| Ok(candidates(3)));
        let mut classifier = MockTitleClassifier::new();
        let mut calls = 0;
        classifier.expect_classify_batch().returning(move |titles| {
            calls += 1;
            if calls == 1 {
                Ok(vec![true; titles.len()])
            } else {
                Err(DiscoveryError::InvalidResponse {
                    message: "bad".to_string(),
                })
            }
        });
        let (refresher, _) = refresher(discovery);
        let refresher = refresher.with_classifier(Arc::new(classifier));

        assert!(matches!(refresher.refresh(3).await, RefreshOutcome::Refreshed { count: 3, .. }));
        assert_eq!(refresher.refresh(3).await, RefreshOutcome::Empty);
        assert_eq!(refresher.top_item_ids(3).await.unwrap(), vec!["vid1", "vid2", "vid3"]);
    }

    #[tokio::test]
    async fn test_get_popular_list_refreshes_once_when_short() {
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().times(1).returning(|_| Ok(candidates(2)));
        let (refresher, _) = refresher(discovery);

        let list = refresher.get_popular_list(5).await.unwrap();

        assert_eq!(list.entries.len(), 2);
        assert_eq!(list.updated_at, list.entries[0].updated_at);
    }

    #[tokio::test]
    async fn test_get_popular_list_skips_refresh_when_full() {
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().times(1).returning(|_| Ok(candidates(5)));
        let (refresher, _) = refresher(discovery);

        refresher.refresh(5).await;
        let list = refresher.get_popular_list(5).await.unwrap();

        assert_eq!(list.entries.len(), 5);
    }

    #[tokio::test]
    async fn test_get_popular_list_on_empty_cache_falls_back_to_now() {
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().returning(|_| {
            Err(DiscoveryError::InvalidResponse {
                message: "down".to_string(),
            })
        });
        let (refresher, _) = refresher(discovery);

        let before = Utc::now();
        let list = refresher.get_popular_list(3).await.unwrap();

        assert!(list.entries.is_empty());
        assert!(list.updated_at >= before);
    }

    #[tokio::test]
    async fn test_size_beyond_max_rank_is_clamped() {
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().times(1).returning(|_| Ok(candidates(80)));
        let (refresher, _) = refresher(discovery);

        let outcome = refresher.refresh(60).await;
        assert!(matches!(outcome, RefreshOutcome::Refreshed { count: 50, .. }));

        for _ in 0..3 {
            let list = refresher.get_popular_list(60).await.unwrap();
            assert_eq!(list.entries.len(), 50);
        }
    }

    #[tokio::test]
    async fn test_clamped_read_from_cache_does_not_refresh() {
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().times(1).returning(|_| Ok(candidates(80)));
        let (refresher, board) = refresher(discovery);

        refresher.refresh(50).await;
        let stale = Utc::now() - chrono::Duration::hours(2);
        board.publish(board.current().entries.clone(), stale);

        let list = refresher.get_popular_list(60).await.unwrap();

        assert_eq!(list.entries.len(), 50);
        assert_ne!(list.updated_at, stale);
    }

    #[tokio::test]
    async fn test_fresh_snapshot_is_served_without_cache() {
        use crate::cache::SharedCache;

        let backend = Arc::new(MemoryCache::new());
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().times(1).returning(|_| Ok(candidates(5)));
        let (refresher, _) = refresher_on(Arc::clone(&backend), discovery);

        let RefreshOutcome::Refreshed { updated_at, .. } = refresher.refresh(5).await else {
            panic!("expected refresh");
        };
        for rank in 1..=5 {
            backend
                .delete(&format!("leaderboard:popular:{}", rank))
                .await
                .unwrap();
        }

        let list = refresher.get_popular_list(3).await.unwrap();

        assert_eq!(list.updated_at, updated_at);
        let ids: Vec<_> = list.entries.iter().map(|e| e.item_id.as_str()).collect();
        assert_eq!(ids, vec!["vid1", "vid2", "vid3"]);
    }

    #[tokio::test]
    async fn test_stale_snapshot_falls_back_to_cache() {
        use crate::cache::SharedCache;

        let backend = Arc::new(MemoryCache::new());
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().times(2).returning(|_| Ok(candidates(5)));
        let (refresher, board) = refresher_on(Arc::clone(&backend), discovery);

        refresher.refresh(5).await;
        let stale = Utc::now() - chrono::Duration::hours(2);
        board.publish(board.current().entries.clone(), stale);
        for rank in 1..=5 {
            backend
                .delete(&format!("leaderboard:popular:{}", rank))
                .await
                .unwrap();
        }

        let list = refresher.get_popular_list(5).await.unwrap();

        assert_eq!(list.entries.len(), 5);
        assert!(list.updated_at > stale);
    }
}
