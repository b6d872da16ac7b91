//! Timed jobs: hourly leaderboard refresh, daily analysis dispatch, daily
//! failed-analysis sweep and the monthly scoring batch.
//!
//! Every job is gated by the [`DistributedLock`] on a tag derived from its
//! scheduled time, so instances sharing a cache run each window once.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::analysis::{AnalysisDispatcher, DispatchSummary};
use crate::cache::{time_bucket_tag, DistributedLock};
use crate::config::SchedulerConfig;
use crate::leaderboard::{LeaderboardRefresher, RefreshOutcome};
use crate::scoring::{BatchSummary, MultiProviderAggregator};

/// Result of one daily dispatch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchRun {
    /// Another instance owns this window.
    LockHeld,
    /// The leaderboard had no ids.
    NothingToDispatch,
    Dispatched(DispatchSummary),
    /// Lock or cache failure; nothing was dispatched.
    Aborted { message: String },
}

/// Next local occurrence of `hour:minute` strictly after `now`.
///
/// Days where that wall-clock time does not exist are skipped.
pub fn next_daily_run<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    for _ in 0..3 {
        let candidate = date
            .and_hms_opt(hour, minute, 0)
            .and_then(|naive| tz.from_local_datetime(&naive).earliest());
        if let Some(at) = candidate {
            if at > *now {
                return Some(at);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// Next occurrence of `day` of the month at `hour:00` strictly after `now`.
///
/// Months too short for `day` are skipped.
pub fn next_monthly_run<Tz: TimeZone>(now: &DateTime<Tz>, day: u32, hour: u32) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let (mut year, mut month) = (now.year(), now.month());
    for _ in 0..14 {
        let candidate = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .and_then(|naive| tz.from_local_datetime(&naive).earliest());
        if let Some(at) = candidate {
            if at > *now {
                return Some(at);
            }
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    None
}

/// Start of the `interval`-aligned bucket containing `now`.
pub fn interval_bucket(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let secs = interval.as_secs().max(1) as i64;
    let start = now.timestamp().div_euclid(secs) * secs;
    DateTime::from_timestamp(start, 0).unwrap_or(now)
}

/// Owns the timed jobs and the token that stops them.
pub struct Scheduler {
    refresher: Arc<LeaderboardRefresher>,
    dispatcher: AnalysisDispatcher,
    aggregator: Arc<MultiProviderAggregator>,
    lock: DistributedLock,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        refresher: Arc<LeaderboardRefresher>,
        dispatcher: AnalysisDispatcher,
        aggregator: Arc<MultiProviderAggregator>,
        lock: DistributedLock,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            refresher,
            dispatcher,
            aggregator,
            lock,
            config,
            cancel,
        }
    }

    /// Token cancelling every job loop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Take the lock for `job` in the window starting at `at`.
    async fn acquire<Tz: TimeZone>(&self, job: &str, at: &DateTime<Tz>) -> Result<bool, String>
    where
        Tz::Offset: std::fmt::Display,
    {
        let tag = format!("{}:{}", job, time_bucket_tag(at));
        let ttl = Duration::from_secs(self.config.lock_ttl_secs);
        self.lock.try_acquire(&tag, ttl).await.map_err(|e| {
            error!(job, error = %e, "Lock check failed");
            e.to_string()
        })
    }

    /// Hourly refresh for the bucket containing `now`.
    pub async fn run_refresh(&self, now: DateTime<Utc>) -> Option<RefreshOutcome> {
        let bucket = interval_bucket(now, Duration::from_secs(self.config.refresh_interval_secs));
        match self.acquire("refresh", &bucket).await {
            Ok(true) => Some(self.refresher.refresh(self.config.refresh_size).await),
            Ok(false) | Err(_) => None,
        }
    }

    /// Daily dispatch of the current top-N for the window at `scheduled`.
    pub async fn run_daily_dispatch<Tz: TimeZone>(&self, scheduled: &DateTime<Tz>) -> DispatchRun
    where
        Tz::Offset: std::fmt::Display,
    {
        match self.acquire("dispatch", scheduled).await {
            Ok(true) => {}
            Ok(false) => return DispatchRun::LockHeld,
            Err(message) => return DispatchRun::Aborted { message },
        }

        let ranked = self.refresher.ranked_cache();
        let max_age = ChronoDuration::seconds(self.config.freshness_max_age_secs);
        match ranked.is_fresh(self.refresher.leaderboard_name(), max_age, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Leaderboard stale before dispatch, refreshing");
                self.refresher.refresh(self.config.refresh_size).await;
            }
            Err(e) => return DispatchRun::Aborted { message: e.to_string() },
        }

        let ids = match self.refresher.top_item_ids(self.config.dispatch_top_n).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to read leaderboard ids");
                return DispatchRun::Aborted { message: e.to_string() };
            }
        };

        if ids.is_empty() {
            info!("Leaderboard empty, nothing to dispatch");
            return DispatchRun::NothingToDispatch;
        }

        DispatchRun::Dispatched(self.dispatcher.dispatch_batch(&ids).await)
    }

    /// Daily sweep of failed composite analyses.
    pub async fn run_retry_sweep<Tz: TimeZone>(&self, scheduled: &DateTime<Tz>) -> Option<BatchSummary>
    where
        Tz::Offset: std::fmt::Display,
    {
        match self.acquire("retry-sweep", scheduled).await {
            Ok(true) => Some(self.aggregator.retry_failed_analyses().await),
            _ => None,
        }
    }

    /// Monthly scoring batch dated `scheduled`.
    pub async fn run_monthly_batch<Tz: TimeZone>(&self, scheduled: &DateTime<Tz>) -> Option<BatchSummary>
    where
        Tz::Offset: std::fmt::Display,
    {
        match self.acquire("monthly-batch", scheduled).await {
            Ok(true) => Some(
                self.aggregator
                    .analyze_all_subjects(scheduled.date_naive(), &self.cancel)
                    .await,
            ),
            _ => None,
        }
    }

    /// Spawn every job loop. They stop when the token is cancelled.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(&self).refresh_loop()),
            tokio::spawn(Arc::clone(&self).daily_loop(
                "dispatch",
                self.config.dispatch_hour,
                self.config.dispatch_minute,
            )),
            tokio::spawn(Arc::clone(&self).daily_loop("retry-sweep", self.config.retry_sweep_hour, 0)),
            tokio::spawn(Arc::clone(&self).monthly_loop()),
        ]
    }

    async fn refresh_loop(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.refresh_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(outcome) = self.run_refresh(Utc::now()).await {
                        info!(?outcome, "Scheduled refresh finished");
                    }
                }
            }
        }
        info!("Refresh loop stopped");
    }

    async fn daily_loop(self: Arc<Self>, job: &'static str, hour: u32, minute: u32) {
        loop {
            let Some(next) = next_daily_run(&Local::now(), hour, minute) else {
                error!(job, hour, minute, "No valid next run time");
                break;
            };
            info!(job, next = %next, "Next daily run scheduled");

            if !self.sleep_until(next).await {
                break;
            }

            match job {
                "dispatch" => {
                    let run = self.run_daily_dispatch(&next).await;
                    info!(job, ?run, "Daily job finished");
                }
                _ => {
                    let summary = self.run_retry_sweep(&next).await;
                    info!(job, ?summary, "Daily job finished");
                }
            }
        }
        info!(job, "Daily loop stopped");
    }

    async fn monthly_loop(self: Arc<Self>) {
        loop {
            let Some(next) =
                next_monthly_run(&Local::now(), self.config.monthly_day, self.config.monthly_hour)
            else {
                error!(day = self.config.monthly_day, "No valid next monthly run");
                break;
            };
            info!(next = %next, "Next monthly batch scheduled");

            if !self.sleep_until(next).await {
                break;
            }

            let summary = self.run_monthly_batch(&next).await;
            info!(?summary, "Monthly batch finished");
        }
        info!("Monthly loop stopped");
    }

    /// Sleep until `at`. Returns `false` if cancelled first.
    async fn sleep_until(&self, at: DateTime<Local>) -> bool {
        let wait = (at - Local::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = self.cancel.cancelled() => {
                warn!("Scheduler wait cancelled");
                false
            }
            _ = tokio::time::sleep(wait) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisReply, DispatcherSettings, MockAnalysisService};
    use crate::cache::MemoryCache;
    use crate::discovery::{DiscoveredItem, MockDiscoverySource};
    use crate::leaderboard::{RankedCache, RefresherSettings, TrendBoard};
    use crate::pool::WorkerPool;
    use crate::retry::RetryPolicy;
    use crate::scoring::AggregatorSettings;
    use crate::storage::SqliteStorage;
    use chrono::{FixedOffset, Timelike};
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_next_daily_run_later_today() {
        let next = next_daily_run(&at(2026, 5, 10, 4, 30), 6, 0).unwrap();
        assert_eq!(next, at(2026, 5, 10, 6, 0));
    }

    #[test]
    fn test_next_daily_run_rolls_to_tomorrow() {
        assert_eq!(next_daily_run(&at(2026, 5, 10, 6, 0), 6, 0).unwrap(), at(2026, 5, 11, 6, 0));
        assert_eq!(next_daily_run(&at(2026, 12, 31, 23, 0), 6, 0).unwrap(), at(2027, 1, 1, 6, 0));
    }

    #[test]
    fn test_next_daily_run_keeps_offset() {
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 5, 10, 7, 0, 0).unwrap();
        let next = next_daily_run(&now, 6, 0).unwrap();
        assert_eq!(next.day(), 11);
        assert_eq!(next.hour(), 6);
        assert_eq!(next.offset(), now.offset());
    }

    #[test]
    fn test_next_monthly_run() {
        assert_eq!(next_monthly_run(&at(2026, 5, 1, 1, 0), 1, 2).unwrap(), at(2026, 5, 1, 2, 0));
        assert_eq!(next_monthly_run(&at(2026, 5, 1, 2, 0), 1, 2).unwrap(), at(2026, 6, 1, 2, 0));
        assert_eq!(next_monthly_run(&at(2026, 12, 15, 0, 0), 1, 2).unwrap(), at(2027, 1, 1, 2, 0));
    }

    #[test]
    fn test_next_monthly_run_skips_short_months() {
        assert_eq!(next_monthly_run(&at(2026, 1, 31, 12, 0), 31, 2).unwrap(), at(2026, 3, 31, 2, 0));
        assert!(next_monthly_run(&at(2026, 1, 1, 0, 0), 32, 2).is_none());
    }

    #[test]
    fn test_interval_bucket_aligns() {
        let bucket = interval_bucket(at(2026, 5, 10, 4, 37), Duration::from_secs(3600));
        assert_eq!(bucket, at(2026, 5, 10, 4, 0));
    }

    fn discovered(n: usize) -> Vec<DiscoveredItem> {
        (1..=n)
            .map(|i| DiscoveredItem::new(format!("vid{}", i), format!("Title {}", i)))
            .collect()
    }

    async fn scheduler(
        discovery: MockDiscoverySource,
        service: MockAnalysisService,
        cache: Arc<MemoryCache>,
    ) -> Scheduler {
        let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let refresher = Arc::new(LeaderboardRefresher::new(
            RankedCache::new(cache.clone()),
            Arc::new(TrendBoard::new()),
            Arc::new(discovery),
            RefresherSettings::default(),
        ));
        let cancel = CancellationToken::new();
        let dispatcher = AnalysisDispatcher::new(
            storage.clone(),
            Arc::new(service),
            WorkerPool::new("dispatch", 3, 100),
            DispatcherSettings {
                subject_url_prefix: "https://videos.example/".to_string(),
                retry: RetryPolicy::new(3, Duration::from_millis(1)),
            },
            cancel.clone(),
        );
        let aggregator = Arc::new(MultiProviderAggregator::new(
            storage,
            Vec::new(),
            WorkerPool::new("providers", 1, 1),
            AggregatorSettings::default(),
        ));
        Scheduler::new(
            refresher,
            dispatcher,
            aggregator,
            DistributedLock::new(cache, "scheduler"),
            SchedulerConfig {
                dispatch_top_n: 3,
                ..SchedulerConfig::default()
            },
            cancel,
        )
    }

    #[tokio::test]
    async fn test_daily_dispatch_runs_once_per_window() {
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().returning(|_| Ok(discovered(5)));
        let mut service = MockAnalysisService::new();
        service.expect_analyze().times(3).returning(|id, _| {
            let body = json!({"subjectId": id, "compositeScore": 70});
            Ok(AnalysisReply {
                raw: body.to_string(),
                body,
            })
        });

        let cache = Arc::new(MemoryCache::new());
        let scheduler = scheduler(discovery, service, cache).await;
        let window = at(2026, 5, 10, 6, 0);

        let first = scheduler.run_daily_dispatch(&window).await;
        assert_eq!(
            first,
            DispatchRun::Dispatched(DispatchSummary { completed: 3, failed: 0 })
        );

        let second = scheduler.run_daily_dispatch(&window).await;
        assert_eq!(second, DispatchRun::LockHeld);
    }

    #[tokio::test]
    async fn test_daily_dispatch_with_empty_leaderboard() {
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().returning(|_| Ok(Vec::new()));
        let mut service = MockAnalysisService::new();
        service.expect_analyze().never();

        let scheduler = scheduler(discovery, service, Arc::new(MemoryCache::new())).await;
        let run = scheduler.run_daily_dispatch(&at(2026, 5, 10, 6, 0)).await;

        assert_eq!(run, DispatchRun::NothingToDispatch);
    }

    #[tokio::test]
    async fn test_refresh_gated_per_bucket() {
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().times(2).returning(|_| Ok(discovered(2)));
        let mut service = MockAnalysisService::new();
        service.expect_analyze().never();

        let scheduler = scheduler(discovery, service, Arc::new(MemoryCache::new())).await;

        assert!(scheduler.run_refresh(at(2026, 5, 10, 4, 5)).await.is_some());
        assert!(scheduler.run_refresh(at(2026, 5, 10, 4, 55)).await.is_none());
        assert!(scheduler.run_refresh(at(2026, 5, 10, 5, 1)).await.is_some());
    }

    #[tokio::test]
    async fn test_spawned_loops_stop_on_cancel() {
        let mut discovery = MockDiscoverySource::new();
        discovery.expect_search().returning(|_| Ok(discovered(1)));
        let mut service = MockAnalysisService::new();
        service.expect_analyze().never();

        let scheduler = Arc::new(scheduler(discovery, service, Arc::new(MemoryCache::new())).await);
        let token = scheduler.cancellation_token();
        let handles = Arc::clone(&scheduler).spawn();

        token.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
