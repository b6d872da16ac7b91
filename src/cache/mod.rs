//! Shared key-value cache used for leaderboards and scheduler locks.
//!
//! The [`SharedCache`] trait exposes the small set of hash-style operations the
//! rest of the crate needs. [`RedisCache`] is the production backend shared by
//! every running instance; [`MemoryCache`] is a process-local stand-in for
//! single-instance runs and tests.

mod lock;
mod memory;
mod redis_cache;

pub use lock::{time_bucket_tag, DistributedLock};
pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::CacheResult;

/// Hash-style cache operations with per-key expiry.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Replace the hash stored at `key` with `fields` and set its expiry.
    async fn hash_put_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> CacheResult<()>;

    /// Read one field of the hash stored at `key`.
    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<String>>;

    /// Read several hashes in a single round-trip.
    ///
    /// The result has one map per requested key, in request order. Missing or
    /// expired keys yield an empty map.
    async fn hash_get_all_many(&self, keys: &[String]) -> CacheResult<Vec<HashMap<String, String>>>;

    /// Store `value` at `key` only if the key does not exist.
    ///
    /// Returns `true` iff this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    /// Remove `key` if present.
    async fn delete(&self, key: &str) -> CacheResult<()>;
}
