//! Pooled PostgreSQL backend
//!
//! Every operation leases exactly one pooled connection and hands it back on
//! drop. When the pool is drained, callers wait up to the acquire timeout and
//! then fail with `PoolExhausted`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{HealthReport, UsageBackend, USAGE_TABLE};
use crate::config::{DatabaseSettings, Settings};
use crate::models::{
    round_cost, AggregateStats, AggregateTotals, ModelClass, ModelInfo, UsagePage, UsageRecord,
    UsageStatus,
};
use crate::utils::{AppError, FilterSet, Predicate, Result};

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS token_usage (
        id            BIGSERIAL PRIMARY KEY,
        timestamp     TIMESTAMPTZ    NOT NULL DEFAULT now(),
        model_name    TEXT           NOT NULL,
        model_type    TEXT           NOT NULL CHECK (model_type IN ('paid', 'free')),
        tokens_used   BIGINT         NOT NULL CHECK (tokens_used >= 0),
        cost          NUMERIC(14, 6) NOT NULL CHECK (cost >= 0),
        response_time INTEGER,
        status        TEXT           NOT NULL DEFAULT 'success'
                                     CHECK (status IN ('success', 'error', 'timeout')),
        api_provider  TEXT           NOT NULL,
        request_type  TEXT,
        user_id       TEXT           NOT NULL DEFAULT 'default',
        session_id    TEXT,
        agent_name    TEXT,
        category      TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_token_usage_timestamp ON token_usage (timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_token_usage_model_type ON token_usage (model_type)",
    "CREATE INDEX IF NOT EXISTS idx_token_usage_time_type ON token_usage (timestamp DESC, model_type)",
    "CREATE INDEX IF NOT EXISTS idx_token_usage_provider_model ON token_usage (api_provider, model_name)",
    "CREATE INDEX IF NOT EXISTS idx_token_usage_user_session ON token_usage (user_id, session_id)",
];

const SELECT_COLUMNS: &str = "id, timestamp, model_name, model_type, tokens_used, \
     cost::float8 AS cost, response_time, status, api_provider, request_type, user_id, \
     session_id, agent_name, category";

/// A pooled connection held for the duration of one operation.
///
/// Dropping the lease returns the connection to the pool; it is never closed
/// by the caller.
pub struct ConnectionLease {
    conn: PoolConnection<Postgres>,
}

impl Deref for ConnectionLease {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        &self.conn
    }
}

impl DerefMut for ConnectionLease {
    fn deref_mut(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

fn record_from_row(row: &PgRow) -> Result<UsageRecord> {
    let model_class: String = row.try_get("model_type")?;
    let status: String = row.try_get("status")?;
    let tokens_used: i64 = row.try_get("tokens_used")?;
    let response_time: Option<i32> = row.try_get("response_time")?;

    Ok(UsageRecord {
        id: Some(row.try_get("id")?),
        timestamp: Some(row.try_get::<DateTime<Utc>, _>("timestamp")?),
        model_name: row.try_get("model_name")?,
        model_class: model_class.parse::<ModelClass>()?,
        tokens_used: tokens_used.max(0) as u64,
        cost: row.try_get("cost")?,
        response_time_ms: response_time.map(|ms| ms.max(0) as u32),
        status: status.parse::<UsageStatus>()?,
        provider: row.try_get("api_provider")?,
        request_type: row.try_get("request_type")?,
        user_id: row.try_get("user_id")?,
        session_id: row.try_get("session_id")?,
        agent_name: row.try_get("agent_name")?,
        category: row.try_get("category")?,
    })
}

/// Append the filter as a WHERE clause with bound parameters
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &FilterSet) {
    for (i, predicate) in filter.predicates().into_iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        match predicate {
            Predicate::TimestampFrom(ts) => {
                qb.push("timestamp >= ").push_bind(ts);
            }
            Predicate::TimestampBefore(ts) => {
                qb.push("timestamp < ").push_bind(ts);
            }
            Predicate::ModelClassIs(class) => {
                qb.push("model_type = ").push_bind(class.as_str());
            }
            Predicate::ModelNameContains(needle) => {
                qb.push("strpos(lower(model_name), ")
                    .push_bind(needle)
                    .push(") > 0");
            }
            Predicate::ProviderIs(provider) => {
                qb.push("lower(api_provider) = ").push_bind(provider);
            }
        }
    }
}

async fn distribution(
    conn: &mut PgConnection,
    column: &str,
    filter: &FilterSet,
) -> Result<BTreeMap<String, u64>> {
    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT {col} AS label, COUNT(*) AS n FROM {table}",
        col = column,
        table = USAGE_TABLE
    ));
    push_filter(&mut qb, filter);
    qb.push(" GROUP BY ").push(column);

    let rows = qb.build().fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| {
            let label: String = row.try_get("label")?;
            let n: i64 = row.try_get("n")?;
            Ok((label, n.max(0) as u64))
        })
        .collect()
}

/// PostgreSQL-backed usage store
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(settings: &Settings) -> Result<Self> {
        Self::connect_url(&settings.database_url(), &settings.database).await
    }

    /// Connect with an explicit URL and the pool settings from `db`
    pub async fn connect_url(url: &str, db: &DatabaseSettings) -> Result<Self> {
        let statement_timeout = db.command_timeout_secs.saturating_mul(1000).to_string();
        let options = PgConnectOptions::from_str(url)?
            .options([("statement_timeout", statement_timeout.as_str())]);

        let pool = PgPoolOptions::new()
            .min_connections(db.pool_min_size)
            .max_connections(db.pool_max_size)
            .acquire_timeout(Duration::from_secs(db.acquire_timeout_secs))
            .connect_with(options)
            .await?;

        let backend = Self { pool };
        backend.ensure_schema().await?;

        info!(
            "🐘 PostgreSQL pool ready (min={}, max={})",
            db.pool_min_size, db.pool_max_size
        );
        Ok(backend)
    }

    async fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.lease().await?;
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&mut *conn).await?;
        }
        Ok(())
    }

    /// Lease one connection, waiting up to the acquire timeout
    pub async fn lease(&self) -> Result<ConnectionLease> {
        let conn = self.pool.acquire().await?;
        Ok(ConnectionLease { conn })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UsageBackend for PostgresBackend {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, record: &UsageRecord) -> Result<i64> {
        record.validate()?;
        let mut conn = self.lease().await?;
        let timestamp = record.timestamp.unwrap_or_else(Utc::now);
        let response_time = record
            .response_time_ms
            .map(|ms| i32::try_from(ms).unwrap_or(i32::MAX));

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO token_usage (
                timestamp, model_name, model_type, tokens_used, cost, response_time,
                status, api_provider, request_type, user_id, session_id, agent_name, category
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id",
        )
        .bind(timestamp)
        .bind(&record.model_name)
        .bind(record.model_class.as_str())
        .bind(record.tokens_used as i64)
        .bind(round_cost(record.cost))
        .bind(response_time)
        .bind(record.status.as_str())
        .bind(&record.provider)
        .bind(&record.request_type)
        .bind(&record.user_id)
        .bind(&record.session_id)
        .bind(&record.agent_name)
        .bind(&record.category)
        .fetch_one(&mut *conn)
        .await?;

        debug!("Inserted usage record {}", id);
        Ok(id)
    }

    async fn query(&self, filter: &FilterSet) -> Result<UsagePage> {
        let mut conn = self.lease().await?;
        let mut tx = conn.begin().await?;
        // Count and page read the same snapshot
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let mut count = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {}", USAGE_TABLE));
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&mut *tx).await?;

        let mut page = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {}",
            SELECT_COLUMNS, USAGE_TABLE
        ));
        push_filter(&mut page, filter);
        page.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(filter.limit as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset as i64);
        let rows = page.build().fetch_all(&mut *tx).await?;

        tx.commit().await?;

        let records = rows.iter().map(record_from_row).collect::<Result<Vec<_>>>()?;
        Ok(UsagePage::new(records, total.max(0) as u64, filter.offset))
    }

    async fn aggregate(&self, filter: &FilterSet) -> Result<AggregateStats> {
        let mut conn = self.lease().await?;
        let mut tx = conn.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT
                COUNT(*) AS total_requests,
                COALESCE(SUM(tokens_used), 0)::BIGINT AS total_tokens,
                COALESCE(SUM(cost), 0)::float8 AS total_cost,
                COUNT(*) FILTER (WHERE status = 'success') AS success_count,
                AVG(response_time)::float8 AS avg_response_time,
                COUNT(*) FILTER (WHERE model_type = 'paid') AS paid_requests,
                COUNT(*) FILTER (WHERE model_type = 'free') AS free_requests,
                COALESCE(SUM(tokens_used) FILTER (WHERE model_type = 'paid'), 0)::BIGINT AS paid_tokens,
                COALESCE(SUM(tokens_used) FILTER (WHERE model_type = 'free'), 0)::BIGINT AS free_tokens,
                MIN(timestamp) AS first_seen,
                MAX(timestamp) AS last_seen
             FROM {}",
            USAGE_TABLE
        ));
        push_filter(&mut qb, filter);
        let row = qb.build().fetch_one(&mut *tx).await?;

        let count = |column: &str| -> Result<u64> {
            let n: i64 = row.try_get(column)?;
            Ok(n.max(0) as u64)
        };
        let totals = AggregateTotals {
            total_requests: count("total_requests")?,
            total_tokens: count("total_tokens")?,
            total_cost: row.try_get("total_cost")?,
            success_count: count("success_count")?,
            avg_response_time_ms: row.try_get("avg_response_time")?,
            paid_requests: count("paid_requests")?,
            free_requests: count("free_requests")?,
            paid_tokens: count("paid_tokens")?,
            free_tokens: count("free_tokens")?,
            first_seen: row.try_get("first_seen")?,
            last_seen: row.try_get("last_seen")?,
        };

        let models = distribution(&mut tx, "model_name", filter).await?;
        let providers = distribution(&mut tx, "api_provider", filter).await?;
        tx.commit().await?;

        Ok(totals.finish(models, providers))
    }

    async fn models(&self) -> Result<Vec<ModelInfo>> {
        let mut conn = self.lease().await?;
        let rows =
            sqlx::query("SELECT DISTINCT model_name, model_type, api_provider FROM token_usage")
                .fetch_all(&mut *conn)
                .await?;

        let mut models = rows
            .iter()
            .map(|row| {
                let class: String = row.try_get("model_type")?;
                Ok(ModelInfo {
                    name: row.try_get("model_name")?,
                    model_class: class.parse()?,
                    provider: row.try_get("api_provider")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        // Byte order, independent of database collation
        models.sort();
        Ok(models)
    }

    async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let probe = async {
            let mut conn = self.lease().await?;
            sqlx::query_scalar::<_, i32>("SELECT 1")
                .fetch_one(&mut *conn)
                .await?;
            Ok::<_, AppError>(())
        };

        match probe.await {
            Ok(()) => HealthReport {
                backend: self.kind(),
                reachable: true,
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                pool_size: Some(self.pool.size()),
                pool_idle: Some(self.pool.num_idle() as u32),
                error: None,
            },
            Err(e) => HealthReport {
                pool_size: Some(self.pool.size()),
                pool_idle: Some(self.pool.num_idle() as u32),
                ..HealthReport::unreachable(self.kind(), e)
            },
        }
    }

    async fn shutdown(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}
