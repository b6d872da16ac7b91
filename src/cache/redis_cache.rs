use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use super::SharedCache;
use crate::error::{CacheError, CacheResult};

/// Redis-backed [`SharedCache`] shared by every running instance.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisCache {
    /// Connect to Redis at `redis_url`.
    pub async fn new(redis_url: &str) -> CacheResult<Self> {
        info!(url = %redis_url, "Connecting to Redis cache");

        let client = redis::Client::open(redis_url).map_err(|e| CacheError::Connection {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        info!("Connected to Redis cache");

        Ok(Self { conn })
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn hash_put_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> CacheResult<()> {
        debug!(key, fields = fields.len(), ttl_ms = ttl.as_millis(), "Cache HSET");

        if fields.is_empty() {
            return self.delete(key).await;
        }

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(key)
            .ignore()
            .cmd("HSET")
            .arg(key)
            .arg(fields)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(key, field).await?;
        debug!(key, field, hit = value.is_some(), "Cache HGET");
        Ok(value)
    }

    async fn hash_get_all_many(&self, keys: &[String]) -> CacheResult<Vec<HashMap<String, String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("HGETALL").arg(key);
        }

        let mut conn = self.conn.clone();
        let maps: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        if maps.len() != keys.len() {
            return Err(CacheError::Command {
                message: format!(
                    "Pipelined HGETALL returned {} replies for {} keys",
                    maps.len(),
                    keys.len()
                ),
            });
        }

        debug!(keys = keys.len(), "Cache pipelined HGETALL");
        Ok(maps)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        let acquired = reply.is_some();
        debug!(key, acquired, "Cache SET NX");
        Ok(acquired)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        debug!(key, "Cache DEL");
        Ok(())
    }
}
