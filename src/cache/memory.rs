use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::SharedCache;
use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Plain(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Process-local [`SharedCache`].
///
/// Expiry is tracked with `tokio::time::Instant`, so tests running on a paused
/// clock can advance past a TTL.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.expires_at > now).count()
    }

    /// Whether no live keys remain.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    async fn stored(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Drop every expired key. Writes call this so keys that are never read
/// again do not accumulate.
fn sweep(entries: &mut HashMap<String, Entry>) {
    let now = Instant::now();
    entries.retain(|_, e| e.expires_at > now);
}

fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| e.expires_at <= now) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn hash_put_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut entries = self.entries.lock().await;
        sweep(&mut entries);
        if fields.is_empty() {
            entries.remove(key);
            return Ok(());
        }

        let map = fields.iter().cloned().collect();
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Hash(map),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => Ok(map.get(field).cloned()),
            Some(_) => Err(CacheError::Malformed {
                key: key.to_string(),
                message: "expected a hash".to_string(),
            }),
            None => Ok(None),
        }
    }

    async fn hash_get_all_many(&self, keys: &[String]) -> CacheResult<Vec<HashMap<String, String>>> {
        let mut entries = self.entries.lock().await;
        let mut maps = Vec::with_capacity(keys.len());
        for key in keys {
            let map = match live(&mut entries, key) {
                Some(Entry {
                    value: Value::Hash(map),
                    ..
                }) => map.clone(),
                Some(_) => {
                    return Err(CacheError::Malformed {
                        key: key.clone(),
                        message: "expected a hash".to_string(),
                    })
                }
                None => HashMap::new(),
            };
            maps.push(map);
        }
        Ok(maps)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut entries = self.entries.lock().await;
        sweep(&mut entries);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Plain(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_hash_put_and_get() {
        let cache = MemoryCache::new();
        cache
            .hash_put_all("k", &fields(&[("a", "1"), ("b", "2")]), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.hash_get("k", "a").await.unwrap(), Some("1".to_string()));
        assert_eq!(cache.hash_get("k", "z").await.unwrap(), None);
        assert_eq!(cache.hash_get("missing", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hash_put_replaces_wholesale() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.hash_put_all("k", &fields(&[("a", "1"), ("b", "2")]), ttl).await.unwrap();
        cache.hash_put_all("k", &fields(&[("a", "3")]), ttl).await.unwrap();

        assert_eq!(cache.hash_get("k", "a").await.unwrap(), Some("3".to_string()));
        assert_eq!(cache.hash_get("k", "b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_all_many_preserves_order_and_gaps() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.hash_put_all("one", &fields(&[("v", "1")]), ttl).await.unwrap();
        cache.hash_put_all("three", &fields(&[("v", "3")]), ttl).await.unwrap();

        let keys = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let maps = cache.hash_get_all_many(&keys).await.unwrap();

        assert_eq!(maps.len(), 3);
        assert_eq!(maps[0].get("v").map(String::as_str), Some("1"));
        assert!(maps[1].is_empty());
        assert_eq!(maps[2].get("v").map(String::as_str), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        cache
            .hash_put_all("k", &fields(&[("a", "1")]), Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(cache.hash_get("k", "a").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_expired_keys() {
        let cache = MemoryCache::new();
        for i in 0..5 {
            cache
                .set_if_absent(&format!("lock:{}", i), "a", Duration::from_secs(10))
                .await
                .unwrap();
        }
        cache
            .hash_put_all("rank:1", &fields(&[("a", "1")]), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(cache.stored().await, 6);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache
            .set_if_absent("lock:next", "b", Duration::from_secs(10))
            .await
            .unwrap());
        assert_eq!(cache.stored().await, 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        cache
            .hash_put_all("rank:2", &fields(&[("a", "2")]), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(cache.stored().await, 1);
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        assert!(cache.set_if_absent("lock", "a", ttl).await.unwrap());
        assert!(!cache.set_if_absent("lock", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_get_on_plain_value_is_malformed() {
        let cache = MemoryCache::new();
        cache
            .set_if_absent("lock", "a", Duration::from_secs(60))
            .await
            .unwrap();
        let result = cache.hash_get("lock", "field").await;
        assert!(matches!(result, Err(CacheError::Malformed { .. })));
    }
}
