use std::time::Duration;

use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime, Timeouts};
use redis::AsyncCommands;

use crate::config::Settings;
use crate::utils::{AppError, Result};

const SCAN_BATCH: usize = 500;

/// Redis connection pool wrapper
#[derive(Clone)]
pub struct RedisPool {
    pool: Pool,
}

impl RedisPool {
    /// Create a new Redis connection pool.
    ///
    /// Connections are opened lazily; call [`RedisPool::ping`] to probe.
    pub fn new(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_millis(settings.cache.connect_timeout_ms);

        let mut pool_config = PoolConfig::new(settings.redis.pool_size);
        pool_config.timeouts = Timeouts {
            wait: Some(timeout),
            create: Some(timeout),
            recycle: Some(timeout),
        };

        let mut cfg = Config::from_url(settings.redis_url());
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| AppError::CacheDegraded(format!("Failed to create Redis pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Get a connection from the pool
    pub async fn get_connection(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| AppError::CacheDegraded(format!("Failed to get Redis connection: {}", e)))
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::CacheDegraded(format!("Redis ping failed: {}", e)))?;
        Ok(())
    }

    /// Get a value from Redis
    pub async fn get<T: redis::FromRedisValue>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get_connection().await?;
        conn.get(key)
            .await
            .map_err(|e| AppError::CacheDegraded(format!("Failed to get key '{}': {}", key, e)))
    }

    /// Set a value with expiration
    pub async fn setex(&self, key: &str, value: &str, seconds: u64) -> Result<()> {
        let mut conn = self.get_connection().await?;
        conn.set_ex(key, value, seconds)
            .await
            .map_err(|e| AppError::CacheDegraded(format!("Failed to setex key '{}': {}", key, e)))
    }

    /// Delete a key, returning how many keys were removed
    pub async fn del(&self, key: &str) -> Result<u64> {
        let mut conn = self.get_connection().await?;
        conn.del(key)
            .await
            .map_err(|e| AppError::CacheDegraded(format!("Failed to delete key '{}': {}", key, e)))
    }

    /// Delete a batch of keys
    pub async fn del_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_connection().await?;
        conn.del(keys).await.map_err(|e| {
            AppError::CacheDegraded(format!("Failed to delete {} keys: {}", keys.len(), e))
        })
    }

    /// Collect every key matching a glob pattern.
    ///
    /// Uses incremental SCAN so a large keyspace never blocks the server the
    /// way KEYS does.
    pub async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    AppError::CacheDegraded(format!(
                        "Failed to scan keys with pattern '{}': {}",
                        pattern, e
                    ))
                })?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    /// Server INFO section
    pub async fn info(&self, section: &str) -> Result<redis::InfoDict> {
        let mut conn = self.get_connection().await?;
        redis::cmd("INFO")
            .arg(section)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::CacheDegraded(format!("Failed to read INFO {}: {}", section, e)))
    }
}

/// Escape glob metacharacters so a literal prefix can be used in MATCH
pub fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("usage_data:"), "usage_data:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    #[test]
    fn test_pool_creation_is_lazy() {
        // No server needed: connections are only opened on first use
        let settings = crate::config::test_settings();
        assert!(RedisPool::new(&settings).is_ok());
    }
}
