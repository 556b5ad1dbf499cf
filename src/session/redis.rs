//! Redis key/value client
//!
//! Backs the networked session storage with a Redis server.
//!
//! # Features
//! - Per-key TTL via PSETEX (millisecond precision)
//! - Prefix listing via SCAN + MATCH (production-safe, not KEYS)
//! - Multiplexed connection shared across request tasks

use super::KvClient;
use crate::config::RedisConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// Number of keys to scan per iteration in `keys`
const SCAN_COUNT: usize = 100;

/// Redis-backed [`KvClient`]
pub struct RedisKv {
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKv").finish_non_exhaustive()
    }
}

impl RedisKv {
    /// Connect using host, port, password and database index
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established within the
    /// configured timeout.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let url = connection_url(config);
        let timeout = Duration::from_millis(config.timeout_ms);
        let kv = tokio::time::timeout(timeout, Self::open(&url))
            .await
            .with_context(|| format!("Timed out connecting to Redis at {}:{}", config.host, config.port))??;
        tracing::info!("Connected to Redis at {}:{} (db {})", config.host, config.port, config.db);
        Ok(kv)
    }

    /// Connect using a `redis://` URL
    pub async fn open(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        Ok(Self { connection })
    }
}

/// Build a `redis://` URL, percent-encoding the password
fn connection_url(config: &RedisConfig) -> String {
    match config.password.as_deref() {
        Some(password) if !password.is_empty() => format!(
            "redis://:{}@{}:{}/{}",
            urlencoding::encode(password),
            config.host,
            config.port,
            config.db
        ),
        _ => format!("redis://{}:{}/{}", config.host, config.port, config.db),
    }
}

/// Escape glob metacharacters so a literal prefix can be used with MATCH
fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl KvClient for RedisKv {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        let _: () = conn
            .pset_ex(key, value, ttl_ms)
            .await
            .context("Failed to set value in Redis")?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .context("Failed to get value from Redis")?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(key)
            .await
            .context("Failed to delete key from Redis")?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", escape_glob(prefix));

        let mut found = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .context("Failed to scan keys in Redis")?;

            found.extend(keys);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once
        found.sort_unstable();
        found.dedup();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{new_id, KvStorage, Session, SessionError, SessionStorage};
    use serde_json::json;

    /// Helper to get Redis URL from environment or use default
    fn get_redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[test]
    fn test_connection_url() {
        let mut config = RedisConfig::default();
        assert_eq!(connection_url(&config), "redis://127.0.0.1:6379/0");

        config.password = Some("p@ss:word".to_string());
        config.db = 3;
        assert_eq!(connection_url(&config), "redis://:p%40ss%3Aword@127.0.0.1:6379/3");
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("com.session.object.app.x."), "com.session.object.app.x.");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_set_get_keys() {
        let kv = RedisKv::open(&get_redis_url()).await.unwrap();
        let prefix = format!("test:{}.", new_id());

        kv.set(&format!("{prefix}a"), "1", Duration::from_secs(60)).await.unwrap();
        kv.set(&format!("{prefix}b"), "2", Duration::from_secs(60)).await.unwrap();

        assert_eq!(kv.get(&format!("{prefix}a")).await.unwrap(), Some("1".to_string()));
        assert_eq!(kv.keys(&prefix).await.unwrap().len(), 2);

        kv.del(&format!("{prefix}a")).await.unwrap();
        kv.del(&format!("{prefix}b")).await.unwrap();
        assert!(kv.keys(&prefix).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_ttl_expiration() {
        let kv = RedisKv::open(&get_redis_url()).await.unwrap();
        let key = format!("test:ttl:{}", new_id());

        kv.set(&key, "value", Duration::from_millis(300)).await.unwrap();
        assert!(kv.get(&key).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(kv.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_session_storage_roundtrip() {
        let kv = RedisKv::open(&get_redis_url()).await.unwrap();
        let storage = KvStorage::new(kv, "inkpot_test").unwrap();
        let session = Session::new(new_id(), Duration::from_secs(60)).unwrap();

        storage.add(&session).await.unwrap();
        assert_eq!(storage.get(session.id()).await.unwrap().id(), session.id());

        storage.set_content(&session, "cart", json!("3-items")).await.unwrap();
        assert_eq!(storage.get_content(&session, "cart").await.unwrap(), json!("3-items"));

        storage.delete(session.id()).await.unwrap();
        assert!(matches!(storage.get(session.id()).await, Err(SessionError::NotFound)));
        assert!(matches!(
            storage.get_content(&session, "cart").await,
            Err(SessionError::NotFound)
        ));
    }
}
