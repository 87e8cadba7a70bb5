//! Durable backend adapter
//!
//! Two interchangeable stores sit behind [`UsageBackend`]: an embedded
//! SQLite file and a pooled PostgreSQL server. Both keep the same table
//! layout and indexes and return identical shapes for identical data.

pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::config::{BackendKind, Settings};
use crate::models::{AggregateStats, ModelInfo, UsagePage, UsageRecord};
use crate::utils::{AppError, FilterSet, Result};

pub use postgres::{ConnectionLease, PostgresBackend};
pub use sqlite::SqliteBackend;

pub const USAGE_TABLE: &str = "token_usage";

/// Result of a trivial round-trip against the backend
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthReport {
    pub backend: &'static str,
    pub reachable: bool,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_idle: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn unreachable(backend: &'static str, error: impl ToString) -> Self {
        Self {
            backend,
            reachable: false,
            latency_ms: 0.0,
            pool_size: None,
            pool_idle: None,
            error: Some(error.to_string()),
        }
    }
}

/// Durable store of usage records.
///
/// Reads are all-or-nothing: a failure never yields a partial page.
#[async_trait]
pub trait UsageBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Persist one record and return its assigned id
    async fn insert(&self, record: &UsageRecord) -> Result<i64>;

    /// Matching records newest first, paginated, with the unpaginated count
    async fn query(&self, filter: &FilterSet) -> Result<UsagePage>;

    /// Totals over every matching record, ignoring pagination
    async fn aggregate(&self, filter: &FilterSet) -> Result<AggregateStats>;

    /// Distinct (model, class, provider) triples
    async fn models(&self) -> Result<Vec<ModelInfo>>;

    /// Never fails; problems are reported through `reachable = false`
    async fn health_check(&self) -> HealthReport;

    async fn shutdown(&self);
}

/// Open the backend named in settings
pub async fn connect(settings: &Settings) -> Result<Arc<dyn UsageBackend>> {
    let kind = settings.backend_kind().map_err(AppError::ConfigError)?;

    let backend: Arc<dyn UsageBackend> = match kind {
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(&settings.database.sqlite_path).await?),
        BackendKind::Postgres => Arc::new(PostgresBackend::connect(settings).await?),
    };

    info!("✅ Storage backend ready: {}", backend.kind());
    Ok(backend)
}
