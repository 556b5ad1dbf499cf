//! Key/value store client contract
//!
//! The networked session backend talks to its store only through
//! [`KvClient`]. [`LocalKv`] is an in-process implementation with per-entry
//! TTL (moka), used for single-process runs and tests; `RedisKv` (feature
//! `redis-session`) talks to a Redis server.

use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default maximum number of keys held by [`LocalKv`]
const DEFAULT_MAX_CAPACITY: u64 = 100_000;

/// Generic key/value store with per-key TTL
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Set a value, replacing any previous value and TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Get a value; `Ok(None)` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete a key; absent keys are a no-op
    async fn del(&self, key: &str) -> Result<()>;

    /// List every live key starting with `prefix` (literal, not a pattern)
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Clone)]
struct Entry {
    value: Arc<String>,
    ttl: Duration,
}

/// Expire each entry after its own TTL
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process key/value store
pub struct LocalKv {
    cache: Cache<String, Entry>,
}

impl std::fmt::Debug for LocalKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKv")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl LocalKv {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_CAPACITY)
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }
}

impl Default for LocalKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvClient for LocalKv {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value: Arc::new(value.to_string()),
            ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cache.get(key).await.map(|e| e.value.as_ref().clone()))
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .cache
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.as_ref().clone())
            .collect())
    }
}
