use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::{CacheBackend, CacheKind, CacheStats};
use crate::redis::{escape_glob, RedisPool};
use crate::utils::Result;

/// Prefix scans walk the keyspace and get a larger budget than point ops
const BULK_TIMEOUT_FACTOR: u32 = 10;

/// Redis-backed cache.
///
/// Every key is stored under `<namespace>:` so clearing the cache never
/// touches keys owned by other applications sharing the database.
pub struct RedisCache {
    pool: RedisPool,
    namespace: String,
    op_timeout: Duration,
    healthy: AtomicBool,
}

impl RedisCache {
    pub fn new(pool: RedisPool, namespace: &str, op_timeout: Duration) -> Self {
        Self {
            pool,
            namespace: namespace.trim_end_matches(':').to_string(),
            op_timeout,
            healthy: AtomicBool::new(true),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Run a cache operation under a deadline; any failure yields `None`
    async fn bounded<T, F>(&self, what: &str, budget: Duration, op: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(budget, op).await {
            Ok(Ok(value)) => {
                self.healthy.store(true, Ordering::Relaxed);
                Some(value)
            }
            Ok(Err(e)) => {
                self.healthy.store(false, Ordering::Relaxed);
                warn!("Redis cache {} failed: {}", what, e);
                None
            }
            Err(_) => {
                self.healthy.store(false, Ordering::Relaxed);
                warn!("Redis cache {} timed out after {:?}", what, budget);
                None
            }
        }
    }

    async fn delete_matching(&self, full_prefix: &str) -> Result<u64> {
        let pattern = format!("{}*", escape_glob(full_prefix));
        let keys = self.pool.scan_match(&pattern).await?;

        let mut removed = 0;
        for chunk in keys.chunks(500) {
            removed += self.pool.del_many(chunk).await?;
        }
        Ok(removed)
    }

    async fn collect_stats(&self) -> Result<CacheStats> {
        let pattern = format!("{}:*", escape_glob(&self.namespace));
        let keys = self.pool.scan_match(&pattern).await?.len() as u64;
        let memory = self.pool.info("memory").await?;
        let clients = self.pool.info("clients").await?;

        Ok(CacheStats {
            kind: CacheKind::Redis,
            enabled: true,
            keys,
            memory: memory.get::<String>("used_memory_human"),
            connections: clients.get::<u64>("connected_clients"),
            error: None,
        })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn kind(&self) -> CacheKind {
        CacheKind::Redis
    }

    async fn get(&self, key: &str) -> Option<String> {
        let full = self.full_key(key);
        let value = self
            .bounded("get", self.op_timeout, self.pool.get::<String>(&full))
            .await
            .flatten();
        if value.is_none() {
            debug!("Cache miss: {}", key);
        }
        value
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let full = self.full_key(key);
        let seconds = ttl.as_secs().max(1);
        self.bounded("set", self.op_timeout, self.pool.setex(&full, value, seconds))
            .await
            .is_some()
    }

    async fn delete(&self, key: &str) -> bool {
        let full = self.full_key(key);
        self.bounded("delete", self.op_timeout, self.pool.del(&full))
            .await
            .is_some()
    }

    async fn delete_by_prefix(&self, prefix: &str) -> u64 {
        let full_prefix = self.full_key(prefix);
        let budget = self.op_timeout * BULK_TIMEOUT_FACTOR;
        self.bounded("prefix delete", budget, self.delete_matching(&full_prefix))
            .await
            .unwrap_or(0)
    }

    async fn stats(&self) -> CacheStats {
        let budget = self.op_timeout * BULK_TIMEOUT_FACTOR;
        match tokio::time::timeout(budget, self.collect_stats()).await {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => self.degraded_stats(e.to_string()),
            Err(_) => self.degraded_stats("timed out reading stats".to_string()),
        }
    }
}

impl RedisCache {
    fn degraded_stats(&self, error: String) -> CacheStats {
        self.healthy.store(false, Ordering::Relaxed);
        CacheStats {
            kind: CacheKind::Redis,
            enabled: false,
            keys: 0,
            memory: None,
            connections: None,
            error: Some(error),
        }
    }

    /// Whether the last operation reached Redis
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}
