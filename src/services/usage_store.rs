use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheKind, CacheStats};
use crate::config::CacheSettings;
use crate::models::{AggregateStats, ModelCatalog, UsagePage, UsageQuery, UsageRecord};
use crate::storage::{HealthReport, UsageBackend};
use crate::utils::{
    models_key, normalize, Clock, Result, SystemClock, STATS_PREFIX, USAGE_DATA_PREFIX,
};

/// Time-to-live per cached payload category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    pub usage_data: Duration,
    pub stats: Duration,
    pub models: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            usage_data: Duration::from_secs(300),
            stats: Duration::from_secs(60),
            models: Duration::from_secs(3600),
        }
    }
}

impl CacheTtl {
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            usage_data: Duration::from_secs(settings.usage_data_ttl),
            stats: Duration::from_secs(settings.stats_ttl),
            models: Duration::from_secs(settings.models_ttl),
        }
    }
}

/// Combined backend and cache status
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub status: &'static str,
    pub database: HealthReport,
    pub cache: CacheStats,
    pub timestamp: DateTime<Utc>,
}

impl StoreHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Read-through cached access to usage records.
///
/// Reads normalize the query, serve a cached payload when one exists and
/// otherwise load from the backend and populate the cache. Writes go to the
/// backend first and only then invalidate the record and stats entries.
/// Cache problems never fail a read or a write.
pub struct UsageDataStore {
    backend: Arc<dyn UsageBackend>,
    cache: Cache,
    ttl: CacheTtl,
    clock: Arc<dyn Clock>,
}

impl UsageDataStore {
    pub fn new(backend: Arc<dyn UsageBackend>, cache: Cache, ttl: CacheTtl) -> Self {
        Self {
            backend,
            cache,
            ttl,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the source of "today" used to resolve time ranges
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn backend(&self) -> &Arc<dyn UsageBackend> {
        &self.backend
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Page of matching records, newest first
    pub async fn read_usage(&self, query: &UsageQuery) -> Result<UsagePage> {
        let filter = normalize(query, self.clock.today())?;
        let key = filter.usage_key();

        self.read_through(&key, self.ttl.usage_data, || self.backend.query(&filter))
            .await
    }

    /// Aggregates over every matching record
    pub async fn read_stats(&self, query: &UsageQuery) -> Result<AggregateStats> {
        let filter = normalize(query, self.clock.today())?;
        let key = filter.stats_key();

        self.read_through(&key, self.ttl.stats, || self.backend.aggregate(&filter))
            .await
    }

    /// Known models grouped by billing class
    pub async fn read_models(&self) -> Result<ModelCatalog> {
        let key = models_key();

        self.read_through(&key, self.ttl.models, || async {
            let models = self.backend.models().await?;
            Ok(ModelCatalog::from_models(&models))
        })
        .await
    }

    /// Persist a record and drop the cached views it may affect
    pub async fn write_usage(&self, record: UsageRecord) -> Result<i64> {
        record.validate()?;
        let id = self.backend.insert(&record).await?;

        for prefix in [USAGE_DATA_PREFIX, STATS_PREFIX] {
            let removed = self.cache.delete_by_prefix(&format!("{}:", prefix)).await;
            debug!("Invalidated {} '{}' cache entries after insert {}", removed, prefix, id);
        }

        Ok(id)
    }

    /// Clear every cached entry
    pub async fn invalidate_all(&self) -> u64 {
        let removed = self.cache.delete_by_prefix("").await;
        info!("🧹 Cleared {} cache entries", removed);
        removed
    }

    /// `degraded` means a Redis cache stopped answering. A memory cache
    /// chosen at startup is a working configuration and reports `healthy`.
    pub async fn health(&self) -> StoreHealth {
        let database = self.backend.health_check().await;
        let cache = self.cache.stats().await;

        let status = if !database.reachable {
            "unhealthy"
        } else if cache.kind == CacheKind::Redis && !cache.enabled {
            "degraded"
        } else {
            "healthy"
        };

        StoreHealth {
            status,
            database,
            cache,
            timestamp: Utc::now(),
        }
    }

    async fn read_through<T, F, Fut>(&self, key: &str, ttl: Duration, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.cache.get_json::<T>(key).await {
            return Ok(hit);
        }

        // A failed load returns before anything is cached
        let value = load().await?;

        if !self.cache.set_json(key, &value, ttl).await {
            warn!("Failed to populate cache entry '{}'", key);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_settings;

    #[test]
    fn test_default_ttls() {
        let ttl = CacheTtl::default();
        assert_eq!(ttl.usage_data, Duration::from_secs(300));
        assert_eq!(ttl.stats, Duration::from_secs(60));
        assert_eq!(ttl.models, Duration::from_secs(3600));
    }

    #[test]
    fn test_ttls_from_settings() {
        let mut settings = test_settings();
        settings.cache.stats_ttl = 15;

        let ttl = CacheTtl::from_settings(&settings.cache);
        assert_eq!(ttl.stats, Duration::from_secs(15));
        assert_eq!(ttl.usage_data, Duration::from_secs(settings.cache.usage_data_ttl));
    }
}
