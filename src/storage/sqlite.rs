//! Embedded SQLite backend
//!
//! One writer connection guarded by a mutex serializes inserts. The file runs
//! in WAL mode, so read-only connections taken from a small free list see a
//! consistent snapshot while a write is in flight. All SQLite calls happen on
//! the blocking thread pool.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OpenFlags, Row, ToSql};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{HealthReport, UsageBackend, USAGE_TABLE};
use crate::models::{
    round_cost, AggregateStats, AggregateTotals, ModelClass, ModelInfo, UsagePage, UsageRecord,
    UsageStatus,
};
use crate::utils::{AppError, FilterSet, Predicate, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_IDLE_READERS: usize = 4;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS token_usage (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp     TEXT    NOT NULL,
    model_name    TEXT    NOT NULL,
    model_type    TEXT    NOT NULL CHECK (model_type IN ('paid', 'free')),
    tokens_used   INTEGER NOT NULL CHECK (tokens_used >= 0),
    cost          REAL    NOT NULL CHECK (cost >= 0),
    response_time INTEGER,
    status        TEXT    NOT NULL DEFAULT 'success'
                          CHECK (status IN ('success', 'error', 'timeout')),
    api_provider  TEXT    NOT NULL,
    request_type  TEXT,
    user_id       TEXT    NOT NULL DEFAULT 'default',
    session_id    TEXT,
    agent_name    TEXT,
    category      TEXT
);
CREATE INDEX IF NOT EXISTS idx_token_usage_timestamp ON token_usage (timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_token_usage_model_type ON token_usage (model_type);
CREATE INDEX IF NOT EXISTS idx_token_usage_time_type ON token_usage (timestamp DESC, model_type);
CREATE INDEX IF NOT EXISTS idx_token_usage_provider_model ON token_usage (api_provider, model_name);
CREATE INDEX IF NOT EXISTS idx_token_usage_user_session ON token_usage (user_id, session_id);
"#;

const SELECT_COLUMNS: &str = "id, timestamp, model_name, model_type, tokens_used, cost, \
     response_time, status, api_provider, request_type, user_id, session_id, agent_name, category";

/// SQLite's built-in lower() folds ASCII only. Filters compare against
/// needles lowercased in Rust, so the column side uses the same folding.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|v| v.to_lowercase()))
        },
    )
}

/// Fixed-width UTC text so lexical order matches time order
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<UsageRecord> {
    let timestamp: String = row.get(1)?;
    let model_class: String = row.get(3)?;
    let tokens_used: i64 = row.get(4)?;
    let status: String = row.get(7)?;

    Ok(UsageRecord {
        id: Some(row.get(0)?),
        timestamp: Some(parse_timestamp(1, &timestamp)?),
        model_name: row.get(2)?,
        model_class: model_class
            .parse::<ModelClass>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
        tokens_used: tokens_used.max(0) as u64,
        cost: row.get(5)?,
        response_time_ms: row.get(6)?,
        status: status
            .parse::<UsageStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
        provider: row.get(8)?,
        request_type: row.get(9)?,
        user_id: row.get(10)?,
        session_id: row.get(11)?,
        agent_name: row.get(12)?,
        category: row.get(13)?,
    })
}

/// Render the filter as a WHERE clause with positional parameters
fn where_clause(filter: &FilterSet) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clauses = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    for predicate in filter.predicates() {
        match predicate {
            Predicate::TimestampFrom(ts) => {
                clauses.push("timestamp >= ?");
                params.push(Box::new(format_timestamp(ts)));
            }
            Predicate::TimestampBefore(ts) => {
                clauses.push("timestamp < ?");
                params.push(Box::new(format_timestamp(ts)));
            }
            Predicate::ModelClassIs(class) => {
                clauses.push("model_type = ?");
                params.push(Box::new(class.as_str()));
            }
            Predicate::ModelNameContains(needle) => {
                clauses.push("instr(unicode_lower(model_name), ?) > 0");
                params.push(Box::new(needle));
            }
            Predicate::ProviderIs(provider) => {
                clauses.push("unicode_lower(api_provider) = ?");
                params.push(Box::new(provider));
            }
        }
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (sql, params)
}

fn as_refs(params: &[Box<dyn ToSql>]) -> Vec<&dyn ToSql> {
    params.iter().map(|p| p.as_ref()).collect()
}

fn distribution(
    conn: &Connection,
    column: &str,
    clause: &str,
    params: &[&dyn ToSql],
) -> rusqlite::Result<BTreeMap<String, u64>> {
    let sql = format!(
        "SELECT {col}, COUNT(*) FROM {table}{clause} GROUP BY {col}",
        col = column,
        table = USAGE_TABLE,
        clause = clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
    })?;
    rows.collect()
}

struct Inner {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
}

impl Inner {
    fn open_reader(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        register_functions(&conn)?;
        Ok(conn)
    }
}

/// SQLite-backed usage store
#[derive(Clone)]
pub struct SqliteBackend {
    inner: Arc<Inner>,
}

impl SqliteBackend {
    /// Open (or create) the database file and ensure the schema exists
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || Self::open_blocking(path)).await?
    }

    fn open_blocking(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::StorageError(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let writer = Connection::open(&path)?;
        writer.busy_timeout(BUSY_TIMEOUT)?;
        register_functions(&writer)?;
        let mode: String = writer.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!("SQLite journal mode is '{}', concurrent reads may block", mode);
        }
        writer.execute_batch("PRAGMA synchronous = NORMAL;")?;
        writer.execute_batch(SCHEMA_SQL)?;

        info!("📂 SQLite store opened at {}", path.display());

        Ok(Self {
            inner: Arc::new(Inner {
                path,
                writer: Mutex::new(writer),
                readers: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Run `op` on the single writer connection
    async fn with_writer<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = inner.writer.lock();
            op(&mut conn)
        })
        .await?
    }

    /// Run `op` on a pooled read-only connection
    async fn with_reader<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let pooled = inner.readers.lock().pop();
            let mut conn = match pooled {
                Some(conn) => conn,
                None => inner.open_reader()?,
            };

            let result = op(&mut conn);

            // A connection that just failed is not reused
            if result.is_ok() {
                let mut idle = inner.readers.lock();
                if idle.len() < MAX_IDLE_READERS {
                    idle.push(conn);
                }
            }
            result
        })
        .await?
    }
}

#[async_trait]
impl UsageBackend for SqliteBackend {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    async fn insert(&self, record: &UsageRecord) -> Result<i64> {
        record.validate()?;
        let record = record.clone();
        self.with_writer(move |conn| {
            let timestamp = record.timestamp.unwrap_or_else(Utc::now);
            conn.execute(
                "INSERT INTO token_usage (
                    timestamp, model_name, model_type, tokens_used, cost, response_time,
                    status, api_provider, request_type, user_id, session_id, agent_name, category
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    format_timestamp(timestamp),
                    record.model_name,
                    record.model_class.as_str(),
                    record.tokens_used as i64,
                    round_cost(record.cost),
                    record.response_time_ms,
                    record.status.as_str(),
                    record.provider,
                    record.request_type,
                    record.user_id,
                    record.session_id,
                    record.agent_name,
                    record.category,
                ],
            )?;
            let id = conn.last_insert_rowid();
            debug!("Inserted usage record {}", id);
            Ok(id)
        })
        .await
    }

    async fn query(&self, filter: &FilterSet) -> Result<UsagePage> {
        let filter = filter.clone();
        self.with_reader(move |conn| {
            let (clause, mut params) = where_clause(&filter);
            // Count and page read the same snapshot
            let tx = conn.transaction()?;

            let total: i64 = tx.query_row(
                &format!("SELECT COUNT(*) FROM {}{}", USAGE_TABLE, clause),
                as_refs(&params).as_slice(),
                |row| row.get(0),
            )?;

            params.push(Box::new(filter.limit));
            params.push(Box::new(filter.offset));
            let records = {
                let sql = format!(
                    "SELECT {} FROM {}{} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
                    SELECT_COLUMNS, USAGE_TABLE, clause
                );
                let mut stmt = tx.prepare(&sql)?;
                let rows = stmt.query_map(as_refs(&params).as_slice(), record_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            tx.commit()?;

            Ok(UsagePage::new(records, total.max(0) as u64, filter.offset))
        })
        .await
    }

    async fn aggregate(&self, filter: &FilterSet) -> Result<AggregateStats> {
        let filter = filter.clone();
        self.with_reader(move |conn| {
            let (clause, params) = where_clause(&filter);
            let refs = as_refs(&params);
            let tx = conn.transaction()?;

            let sql = format!(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(tokens_used), 0),
                    COALESCE(SUM(cost), 0.0),
                    COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0),
                    AVG(response_time),
                    COALESCE(SUM(CASE WHEN model_type = 'paid' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN model_type = 'free' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN model_type = 'paid' THEN tokens_used ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN model_type = 'free' THEN tokens_used ELSE 0 END), 0),
                    MIN(timestamp),
                    MAX(timestamp)
                 FROM {}{}",
                USAGE_TABLE, clause
            );

            let totals = tx.query_row(&sql, refs.as_slice(), |row| {
                let count = |idx: usize| -> rusqlite::Result<u64> {
                    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
                };
                let first: Option<String> = row.get(9)?;
                let last: Option<String> = row.get(10)?;

                Ok(AggregateTotals {
                    total_requests: count(0)?,
                    total_tokens: count(1)?,
                    total_cost: row.get(2)?,
                    success_count: count(3)?,
                    avg_response_time_ms: row.get(4)?,
                    paid_requests: count(5)?,
                    free_requests: count(6)?,
                    paid_tokens: count(7)?,
                    free_tokens: count(8)?,
                    first_seen: first.as_deref().map(|s| parse_timestamp(9, s)).transpose()?,
                    last_seen: last.as_deref().map(|s| parse_timestamp(10, s)).transpose()?,
                })
            })?;

            let models = distribution(&tx, "model_name", &clause, &refs)?;
            let providers = distribution(&tx, "api_provider", &clause, &refs)?;
            tx.commit()?;

            Ok(totals.finish(models, providers))
        })
        .await
    }

    async fn models(&self) -> Result<Vec<ModelInfo>> {
        self.with_reader(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT model_name, model_type, api_provider FROM token_usage")?;
            let rows = stmt.query_map([], |row| {
                let class: String = row.get(1)?;
                Ok(ModelInfo {
                    name: row.get(0)?,
                    model_class: class.parse::<ModelClass>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                    })?,
                    provider: row.get(2)?,
                })
            })?;
            let mut models = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            // Byte order, independent of database collation
            models.sort();
            Ok(models)
        })
        .await
    }

    async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let probe = self
            .with_reader(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
            .await;

        match probe {
            Ok(_) => HealthReport {
                backend: self.kind(),
                reachable: true,
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                pool_size: None,
                pool_idle: Some(self.inner.readers.lock().len() as u32),
                error: None,
            },
            Err(e) => HealthReport::unreachable(self.kind(), e),
        }
    }

    async fn shutdown(&self) {
        self.inner.readers.lock().clear();
        let checkpoint = self
            .with_writer(|conn| {
                conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
                Ok(())
            })
            .await;
        match checkpoint {
            Ok(()) => info!("SQLite store closed"),
            Err(e) => warn!("SQLite checkpoint on shutdown failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UsageQuery;
    use crate::utils::normalize;
    use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone};
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteBackend) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let backend = SqliteBackend::open(dir.path().join("usage.db"))
            .await
            .expect("Failed to open SQLite store");
        (dir, backend)
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn filter(query: UsageQuery) -> FilterSet {
        normalize(&query, today()).unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let (_dir, backend) = open_temp().await;
        let r = UsageRecord::new("gemini-2.5-flash", ModelClass::Free, 100, 0.001, "google");

        let a = backend.insert(&r).await.unwrap();
        let b = backend.insert(&r).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_query_is_newest_first_and_paginated() {
        let (_dir, backend) = open_temp().await;
        for h in 0..5 {
            let r = UsageRecord::new("gpt-4o", ModelClass::Paid, 10 * (h as u64 + 1), 0.01, "openai")
                .with_timestamp(at(2026, 10, 19, h));
            backend.insert(&r).await.unwrap();
        }

        let page = backend
            .query(&filter(UsageQuery::default().with_page(2, 1)))
            .await
            .unwrap();

        assert_eq!(page.total, 5);
        assert!(page.has_more);
        let hours: Vec<_> = page
            .records
            .iter()
            .map(|r| r.timestamp.unwrap())
            .collect();
        assert_eq!(hours, vec![at(2026, 10, 19, 3), at(2026, 10, 19, 2)]);
    }

    #[tokio::test]
    async fn test_record_fields_survive_storage() {
        let (_dir, backend) = open_temp().await;
        let mut r = UsageRecord::new("claude-sonnet", ModelClass::Paid, 1234, 0.0123456789, "anthropic")
            .with_status(UsageStatus::Timeout)
            .with_timestamp(at(2026, 10, 19, 9))
            .with_response_time(870)
            .with_session("alice", "s-1");
        r.agent_name = Some("planner".to_string());

        let id = backend.insert(&r).await.unwrap();
        let page = backend.query(&FilterSet::unbounded()).await.unwrap();
        let stored = &page.records[0];

        assert_eq!(stored.id, Some(id));
        assert_eq!(stored.cost, 0.012346);
        assert_eq!(stored.status, UsageStatus::Timeout);
        assert_eq!(stored.response_time_ms, Some(870));
        assert_eq!(stored.session_id.as_deref(), Some("s-1"));
        assert_eq!(stored.agent_name.as_deref(), Some("planner"));
        assert_eq!(stored.category, None);
        assert_eq!(stored.request_type, None);
    }

    #[tokio::test]
    async fn test_filters_by_class_name_and_provider() {
        let (_dir, backend) = open_temp().await;
        let ts = at(2026, 10, 19, 8);
        for (model, class, provider) in [
            ("Gemini-2.5-Flash", ModelClass::Free, "Google"),
            ("gemini-3-pro", ModelClass::Paid, "google"),
            ("gpt-4o", ModelClass::Paid, "openai"),
        ] {
            let r = UsageRecord::new(model, class, 10, 0.0, provider).with_timestamp(ts);
            backend.insert(&r).await.unwrap();
        }

        let paid = backend
            .query(&filter(UsageQuery::default().with_model_type("paid")))
            .await
            .unwrap();
        assert_eq!(paid.total, 2);

        let flash = backend
            .query(&filter(UsageQuery::default().with_specific_model("FLASH")))
            .await
            .unwrap();
        assert_eq!(flash.total, 1);
        assert_eq!(flash.records[0].model_name, "Gemini-2.5-Flash");

        let google = backend
            .query(&filter(UsageQuery::default().with_provider("GOOGLE")))
            .await
            .unwrap();
        assert_eq!(google.total, 2);
    }

    #[tokio::test]
    async fn test_name_and_provider_filters_fold_non_ascii_case() {
        let (_dir, backend) = open_temp().await;
        let ts = at(2026, 10, 19, 8);
        for (model, provider) in [("Über-Model", "Ärzte"), ("uber-model", "aerzte")] {
            let r = UsageRecord::new(model, ModelClass::Paid, 10, 0.0, provider).with_timestamp(ts);
            backend.insert(&r).await.unwrap();
        }

        let uber = backend
            .query(&filter(UsageQuery::default().with_specific_model("über")))
            .await
            .unwrap();
        assert_eq!(uber.total, 1);
        assert_eq!(uber.records[0].model_name, "Über-Model");

        let aerzte = backend
            .query(&filter(UsageQuery::default().with_provider("ÄRZTE")))
            .await
            .unwrap();
        assert_eq!(aerzte.total, 1);
        assert_eq!(aerzte.records[0].provider, "Ärzte");

        let stats = backend
            .aggregate(&filter(UsageQuery::default().with_provider("ärzte")))
            .await
            .unwrap();
        assert_eq!(stats.total_requests, 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_records_before_writing() {
        let (_dir, backend) = open_temp().await;

        let negative = UsageRecord::new("gpt-4o", ModelClass::Paid, 10, -1.0, "openai");
        let err = backend.insert(&negative).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        let mut preset = UsageRecord::new("gpt-4o", ModelClass::Paid, 10, 0.5, "openai");
        preset.id = Some(42);
        let err = backend.insert(&preset).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        let page = backend.query(&FilterSet::unbounded()).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_day_range_excludes_neighbouring_days() {
        let (_dir, backend) = open_temp().await;
        let midnight = at(2026, 10, 19, 0);
        for ts in [
            midnight - ChronoDuration::microseconds(1),
            midnight,
            midnight + ChronoDuration::hours(24) - ChronoDuration::microseconds(1),
            midnight + ChronoDuration::hours(24),
        ] {
            let r = UsageRecord::new("m", ModelClass::Free, 1, 0.0, "p").with_timestamp(ts);
            backend.insert(&r).await.unwrap();
        }

        let page = backend
            .query(&filter(UsageQuery::default().with_time_range("day")))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn test_aggregate_totals() {
        let (_dir, backend) = open_temp().await;
        let a = UsageRecord::new("gemini-2.5-flash", ModelClass::Free, 500, 0.01, "google")
            .with_timestamp(at(2026, 10, 18, 12))
            .with_response_time(100);
        let b = UsageRecord::new("gemini-3-pro", ModelClass::Paid, 2000, 0.10, "google")
            .with_status(UsageStatus::Error)
            .with_timestamp(at(2026, 10, 19, 12))
            .with_response_time(300);
        backend.insert(&a).await.unwrap();
        backend.insert(&b).await.unwrap();

        let stats = backend.aggregate(&FilterSet::unbounded()).await.unwrap();
        assert_eq!(stats.total_tokens, 2500);
        assert_eq!(stats.total_cost, 0.11);
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.success_rate, 50.0);
        assert_eq!(stats.avg_response_time_ms, 200.0);
        assert_eq!((stats.paid_requests, stats.free_requests), (1, 1));
        assert_eq!((stats.paid_tokens, stats.free_tokens), (2000, 500));
        assert_eq!(stats.model_distribution.get("gemini-3-pro"), Some(&1));
        assert_eq!(stats.provider_distribution.get("google"), Some(&2));
        assert_eq!(stats.date_range, "2026-10-18 to 2026-10-19");
    }

    #[tokio::test]
    async fn test_aggregate_ignores_pagination_and_handles_empty() {
        let (_dir, backend) = open_temp().await;
        let empty = backend.aggregate(&FilterSet::unbounded()).await.unwrap();
        assert_eq!(empty, AggregateStats::empty());

        for _ in 0..3 {
            let r = UsageRecord::new("m", ModelClass::Free, 10, 0.0, "p");
            backend.insert(&r).await.unwrap();
        }
        let mut one_per_page = FilterSet::unbounded();
        one_per_page.limit = 1;
        let stats = backend.aggregate(&one_per_page).await.unwrap();
        assert_eq!(stats.total_requests, 3);
    }

    #[tokio::test]
    async fn test_models_are_distinct() {
        let (_dir, backend) = open_temp().await;
        for _ in 0..2 {
            let r = UsageRecord::new("gpt-4o", ModelClass::Paid, 1, 0.0, "openai");
            backend.insert(&r).await.unwrap();
        }
        let r = UsageRecord::new("gemini-2.5-flash", ModelClass::Free, 1, 0.0, "google");
        backend.insert(&r).await.unwrap();

        let models = backend.models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "gemini-2.5-flash");
    }

    #[tokio::test]
    async fn test_concurrent_writers_are_serialized() {
        let (_dir, backend) = open_temp().await;
        let mut handles = Vec::new();
        for i in 0..8 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let r = UsageRecord::new(format!("model-{}", i), ModelClass::Free, 1, 0.0, "p");
                    backend.insert(&r).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stats = backend.aggregate(&FilterSet::unbounded()).await.unwrap();
        assert_eq!(stats.total_requests, 80);
    }

    #[tokio::test]
    async fn test_health_check_and_reopen() {
        let (dir, backend) = open_temp().await;
        let r = UsageRecord::new("m", ModelClass::Free, 1, 0.0, "p");
        backend.insert(&r).await.unwrap();

        let report = backend.health_check().await;
        assert!(report.reachable);
        assert_eq!(report.backend, "sqlite");

        backend.shutdown().await;
        drop(backend);

        let reopened = SqliteBackend::open(dir.path().join("usage.db")).await.unwrap();
        let page = reopened.query(&FilterSet::unbounded()).await.unwrap();
        assert_eq!(page.total, 1);
    }
}
