//! Cache adapter
//!
//! Two interchangeable backends sit behind [`CacheBackend`]: a Redis-backed
//! cache and an in-process map used when Redis cannot be reached. The
//! backend is picked once, when [`Cache::connect`] probes Redis, and kept for
//! the lifetime of the cache. No cache operation ever returns an error; a
//! degraded cache behaves like an empty one.

pub mod memory;
pub mod redis_cache;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::redis::RedisPool;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Redis,
    Memory,
}

/// Point-in-time cache status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    #[serde(rename = "type")]
    pub kind: CacheKind,
    /// True only while the networked cache is answering
    pub enabled: bool,
    pub keys: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Key/value cache with per-entry TTL.
///
/// Implementations swallow their own failures: `get` degrades to a miss,
/// `set`/`delete` report `false`, and prefix deletion reports 0.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn kind(&self) -> CacheKind;

    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool;

    async fn delete(&self, key: &str) -> bool;

    /// Remove every key starting with `prefix`; an empty prefix clears all
    async fn delete_by_prefix(&self, prefix: &str) -> u64;

    async fn stats(&self) -> CacheStats;
}

/// Cache handle shared by the store
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Fresh in-process cache
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }

    /// Probe Redis once and fall back to the in-process cache on failure
    pub async fn connect(settings: &Settings) -> Self {
        let connect_timeout = Duration::from_millis(settings.cache.connect_timeout_ms);

        let probe = async {
            let pool = RedisPool::new(settings)?;
            pool.ping().await?;
            Ok::<_, crate::utils::AppError>(pool)
        };

        match tokio::time::timeout(connect_timeout, probe).await {
            Ok(Ok(pool)) => {
                info!("✅ Redis cache enabled");
                Self::new(Arc::new(RedisCache::new(
                    pool,
                    &settings.cache.key_namespace,
                    Duration::from_millis(settings.cache.op_timeout_ms),
                )))
            }
            Ok(Err(e)) => {
                warn!("⚠️  Redis unavailable, using in-memory cache: {}", e);
                Self::memory()
            }
            Err(_) => {
                warn!(
                    "⚠️  Redis probe timed out after {:?}, using in-memory cache",
                    connect_timeout
                );
                Self::memory()
            }
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.backend.kind()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.backend.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        self.backend.set(key, value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.backend.delete(key).await
    }

    pub async fn delete_by_prefix(&self, prefix: &str) -> u64 {
        self.backend.delete_by_prefix(prefix).await
    }

    pub async fn stats(&self) -> CacheStats {
        self.backend.stats().await
    }

    /// Get and decode a JSON payload; undecodable payloads count as misses
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.backend.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!("Cache hit: {}", key);
                Some(value)
            }
            Err(e) => {
                warn!("Discarding undecodable cache entry '{}': {}", key, e);
                self.backend.delete(key).await;
                None
            }
        }
    }

    /// Encode and store a JSON payload
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        match serde_json::to_string(value) {
            Ok(raw) => self.backend.set(key, &raw, ttl).await,
            Err(e) => {
                warn!("Failed to encode cache entry '{}': {}", key, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_falls_back_to_memory() {
        let mut settings = crate::config::test_settings();
        // Nothing listens on port 1
        settings.redis.port = 1;
        settings.cache.connect_timeout_ms = 300;

        let cache = Cache::connect(&settings).await;
        assert_eq!(cache.kind(), CacheKind::Memory);

        let stats = cache.stats().await;
        assert!(!stats.enabled);
    }

    #[tokio::test]
    async fn test_json_round_trip_and_bad_payload() {
        let cache = Cache::memory();
        let ttl = Duration::from_secs(60);

        assert!(cache.set_json("stats:a", &vec![1u32, 2, 3], ttl).await);
        let value: Option<Vec<u32>> = cache.get_json("stats:a").await;
        assert_eq!(value, Some(vec![1, 2, 3]));

        cache.set("stats:b", "not json", ttl).await;
        let value: Option<Vec<u32>> = cache.get_json("stats:b").await;
        assert_eq!(value, None);
        assert_eq!(cache.get("stats:b").await, None);
    }
}
