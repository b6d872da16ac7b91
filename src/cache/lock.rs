use chrono::{DateTime, TimeZone};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::SharedCache;
use crate::error::CacheResult;

/// Minute-resolution tag scoping a lock to one scheduled run window.
pub fn time_bucket_tag<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%Y%m%d%H%M").to_string()
}

/// Cache-backed lock that lets one instance win each time bucket.
///
/// There is no release: the key lives until its TTL runs out, so a holder that
/// finishes early still blocks other instances for the rest of the window and a
/// crashed holder cannot block later windows.
#[derive(Clone)]
pub struct DistributedLock {
    cache: Arc<dyn SharedCache>,
    prefix: String,
    holder: String,
}

impl DistributedLock {
    /// Create a lock namespace on `cache`. Keys are `lock:<prefix>:<tag>`.
    pub fn new(cache: Arc<dyn SharedCache>, prefix: impl Into<String>) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
            holder: Uuid::new_v4().to_string(),
        }
    }

    /// Try to take the lock for `tag`. Returns `true` iff this call created it.
    pub async fn try_acquire(&self, tag: &str, ttl: Duration) -> CacheResult<bool> {
        let key = format!("lock:{}:{}", self.prefix, tag);
        let acquired = self.cache.set_if_absent(&key, &self.holder, ttl).await?;
        if acquired {
            info!(lock = %key, holder = %self.holder, ttl_secs = ttl.as_secs(), "Lock acquired");
        } else {
            info!(lock = %key, "Lock held by another instance, skipping");
        }
        Ok(acquired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use chrono::Utc;

    #[test]
    fn test_time_bucket_tag_is_minute_resolution() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 6, 0, 59).unwrap();
        assert_eq!(time_bucket_tag(&at), "202603090600");
    }

    #[tokio::test]
    async fn test_second_acquire_within_ttl_fails() {
        let cache: Arc<dyn SharedCache> = Arc::new(MemoryCache::new());
        let a = DistributedLock::new(Arc::clone(&cache), "daily");
        let b = DistributedLock::new(cache, "daily");

        assert!(a.try_acquire("202603090600", Duration::from_secs(60)).await.unwrap());
        assert!(!b.try_acquire("202603090600", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_after_expiry() {
        let cache: Arc<dyn SharedCache> = Arc::new(MemoryCache::new());
        let lock = DistributedLock::new(cache, "daily");
        let ttl = Duration::from_secs(30);

        assert!(lock.try_acquire("tag", ttl).await.unwrap());
        assert!(!lock.try_acquire("tag", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(lock.try_acquire("tag", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_different_tags_do_not_contend() {
        let cache: Arc<dyn SharedCache> = Arc::new(MemoryCache::new());
        let lock = DistributedLock::new(cache, "daily");
        let ttl = Duration::from_secs(60);

        assert!(lock.try_acquire("202603090600", ttl).await.unwrap());
        assert!(lock.try_acquire("202603100600", ttl).await.unwrap());
    }
}
