use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::env;

/// Upper bound for database and cache timeouts
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;
/// Upper bound for cache entry lifetimes
pub const MAX_CACHE_TTL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub redis: RedisSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u8,
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub backend: String, // "sqlite" or "postgres"
    pub sqlite_path: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: Option<String>,
    pub pool_min_size: u32,
    pub pool_max_size: u32,
    pub acquire_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    pub usage_data_ttl: u64, // seconds
    pub stats_ttl: u64,
    pub models_ttl: u64,
    pub op_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub key_namespace: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String, // "json" or "pretty"
}

/// Durable backend selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Postgres,
}

/// Environment variable -> config key overrides
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("TM_SERVER__HOST", "server.host"),
    ("TM_SERVER__PORT", "server.port"),
    ("TM_REDIS__HOST", "redis.host"),
    ("TM_REDIS__PORT", "redis.port"),
    ("TM_REDIS__PASSWORD", "redis.password"),
    ("TM_REDIS__DB", "redis.db"),
    ("TM_REDIS__POOL_SIZE", "redis.pool_size"),
    ("TM_DATABASE__BACKEND", "database.backend"),
    ("TM_DATABASE__SQLITE_PATH", "database.sqlite_path"),
    ("TM_DATABASE__HOST", "database.host"),
    ("TM_DATABASE__PORT", "database.port"),
    ("TM_DATABASE__NAME", "database.name"),
    ("TM_DATABASE__USERNAME", "database.username"),
    ("TM_DATABASE__PASSWORD", "database.password"),
    ("TM_DATABASE__POOL_MIN_SIZE", "database.pool_min_size"),
    ("TM_DATABASE__POOL_MAX_SIZE", "database.pool_max_size"),
    ("TM_DATABASE__ACQUIRE_TIMEOUT_SECS", "database.acquire_timeout_secs"),
    ("TM_DATABASE__COMMAND_TIMEOUT_SECS", "database.command_timeout_secs"),
    ("TM_CACHE__USAGE_DATA_TTL", "cache.usage_data_ttl"),
    ("TM_CACHE__STATS_TTL", "cache.stats_ttl"),
    ("TM_CACHE__MODELS_TTL", "cache.models_ttl"),
    ("TM_CACHE__OP_TIMEOUT_MS", "cache.op_timeout_ms"),
    ("TM_CACHE__CONNECT_TIMEOUT_MS", "cache.connect_timeout_ms"),
    ("TM_CACHE__KEY_NAMESPACE", "cache.key_namespace"),
    ("TM_LOGGING__LEVEL", "logging.level"),
    ("TM_LOGGING__FORMAT", "logging.format"),
];

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("redis.host", "localhost")?
            .set_default("redis.port", 6379)?
            .set_default("redis.db", 0)?
            .set_default("redis.pool_size", 10)?
            .set_default("database.backend", "sqlite")?
            .set_default("database.sqlite_path", "data/token_usage.db")?
            .set_default("database.host", "localhost")?
            .set_default("database.port", 5432)?
            .set_default("database.name", "token_monitor")?
            .set_default("database.username", "postgres")?
            .set_default("database.pool_min_size", 5)?
            .set_default("database.pool_max_size", 20)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.command_timeout_secs", 60)?
            .set_default("cache.usage_data_ttl", 300)? // 5 minutes
            .set_default("cache.stats_ttl", 60)?
            .set_default("cache.models_ttl", 3600)?
            .set_default("cache.op_timeout_ms", 500)?
            .set_default("cache.connect_timeout_ms", 2000)?
            .set_default("cache.key_namespace", "token_monitor")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load config file if exists
            .add_source(File::with_name("config/config").required(false))
            .add_source(File::with_name(&format!("config/config.{}", run_mode)).required(false));

        // Explicit overrides instead of config::Environment, which lowercases keys
        for (var, key) in ENV_OVERRIDES {
            if let Ok(val) = env::var(var) {
                builder = builder.set_override(*key, val)?;
            }
        }

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.backend_kind()?;

        if self.database.pool_max_size == 0 {
            return Err("Database pool max size must be greater than 0".to_string());
        }
        if self.database.pool_min_size > self.database.pool_max_size {
            return Err(format!(
                "Database pool min size ({}) exceeds max size ({})",
                self.database.pool_min_size, self.database.pool_max_size
            ));
        }
        if self.database.acquire_timeout_secs == 0 {
            return Err("Database acquire timeout must be greater than 0".to_string());
        }
        if self.database.acquire_timeout_secs > MAX_TIMEOUT_SECS
            || self.database.command_timeout_secs > MAX_TIMEOUT_SECS
        {
            return Err(format!(
                "Database timeouts must not exceed {} seconds",
                MAX_TIMEOUT_SECS
            ));
        }

        if self.redis.pool_size == 0 {
            return Err("Redis pool size must be greater than 0".to_string());
        }

        if self.cache.usage_data_ttl == 0 || self.cache.stats_ttl == 0 || self.cache.models_ttl == 0
        {
            return Err("Cache TTLs must be greater than 0".to_string());
        }
        if [self.cache.usage_data_ttl, self.cache.stats_ttl, self.cache.models_ttl]
            .iter()
            .any(|&ttl| ttl > MAX_CACHE_TTL_SECS)
        {
            return Err(format!(
                "Cache TTLs must not exceed {} seconds",
                MAX_CACHE_TTL_SECS
            ));
        }
        if self.cache.op_timeout_ms == 0 || self.cache.connect_timeout_ms == 0 {
            return Err("Cache timeouts must be greater than 0".to_string());
        }
        if self.cache.op_timeout_ms > MAX_TIMEOUT_SECS * 1000
            || self.cache.connect_timeout_ms > MAX_TIMEOUT_SECS * 1000
        {
            return Err(format!(
                "Cache timeouts must not exceed {} seconds",
                MAX_TIMEOUT_SECS
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid logging level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        Ok(())
    }

    /// Parse the configured durable backend
    pub fn backend_kind(&self) -> Result<BackendKind, String> {
        match self.database.backend.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(BackendKind::Sqlite),
            "postgres" | "postgresql" => Ok(BackendKind::Postgres),
            other => Err(format!(
                "Invalid database backend '{}'. Must be one of: sqlite, postgres",
                other
            )),
        }
    }

    /// Get Redis connection string
    pub fn redis_url(&self) -> String {
        match &self.redis.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                urlencoding::encode(password),
                self.redis.host,
                self.redis.port,
                self.redis.db
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }

    /// Get PostgreSQL connection string. Never log the result.
    pub fn database_url(&self) -> String {
        let db = &self.database;
        match &db.password {
            Some(password) => format!(
                "postgres://{}:{}@{}:{}/{}",
                urlencoding::encode(&db.username),
                urlencoding::encode(password),
                db.host,
                db.port,
                db.name
            ),
            None => format!(
                "postgres://{}@{}:{}/{}",
                urlencoding::encode(&db.username),
                db.host,
                db.port,
                db.name
            ),
        }
    }

    /// Get server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        redis: RedisSettings {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            pool_size: 10,
        },
        database: DatabaseSettings {
            backend: "sqlite".to_string(),
            sqlite_path: "data/token_usage.db".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            name: "token_monitor".to_string(),
            username: "postgres".to_string(),
            password: None,
            pool_min_size: 5,
            pool_max_size: 20,
            acquire_timeout_secs: 30,
            command_timeout_secs: 60,
        },
        cache: CacheSettings {
            usage_data_ttl: 300,
            stats_ttl: 60,
            models_ttl: 3600,
            op_timeout_ms: 500,
            connect_timeout_ms: 2000,
            key_namespace: "token_monitor".to_string(),
        },
        logging: LoggingSettings {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}
