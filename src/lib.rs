pub mod cache;
pub mod config;
pub mod models;
pub mod redis;
pub mod routes;
pub mod services;
pub mod storage;
pub mod utils;

pub use crate::cache::Cache;
pub use crate::config::Settings;
pub use crate::redis::RedisPool;
pub use crate::services::UsageDataStore;
