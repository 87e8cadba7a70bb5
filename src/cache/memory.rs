//! In-process fallback cache
//!
//! Entries expire lazily: an expired entry is dropped when `get` sees it,
//! and nothing sweeps in the background. Keys that are never read again
//! stay resident until a prefix delete removes them, so this backend is
//! meant for development and single-node setups with a bounded key space.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{CacheBackend, CacheKind, CacheStats};

/// Upper bound on a single entry's lifetime
const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Concurrent map of key -> (value, expiry)
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resident entries, including expired ones not yet observed
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn approx_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.key().len() + e.value().value.len())
            .sum()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn kind(&self) -> CacheKind {
        CacheKind::Memory
    }

    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        // Re-check under the shard write lock so a concurrent fresh `set` survives
        self.entries.remove_if(key, |_, e| e.is_expired(now));
        None
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now);
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        true
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.remove(key);
        true
    }

    async fn delete_by_prefix(&self, prefix: &str) -> u64 {
        let mut removed = 0u64;
        self.entries.retain(|k, _| {
            let keep = !k.starts_with(prefix);
            if !keep {
                removed += 1;
            }
            keep
        });
        debug!("Memory cache removed {} keys under '{}'", removed, prefix);
        removed
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            kind: CacheKind::Memory,
            enabled: false,
            keys: self.entries.len() as u64,
            memory: Some(format!("{}B", self.approx_bytes())),
            connections: None,
            error: None,
        }
    }
}
