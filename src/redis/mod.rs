pub mod pool;

pub use pool::{escape_glob, RedisPool};
