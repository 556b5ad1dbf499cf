//! Networked session storage
//!
//! Stores sessions in a shared key/value store with TTL expiry, suitable for
//! multi-process deployments. Key layout:
//!
//! ```text
//! com.session.object.<name>.<id>          -> "value.null" (existence sentinel)
//! com.session.create.<name>.<id>          -> creation time, Unix seconds
//! com.session.expire.<name>.<id>          -> expiration time, Unix seconds
//! com.session.object.<name>.<id>.<key>    -> content value, JSON
//! ```
//!
//! `<name>` partitions independent applications sharing one store. External
//! tooling reads these keys directly, so the layout must not change.
//!
//! The layout has no room for a session's lifetime. Sessions read back carry
//! the lifetime the storage was configured with, which stays fixed however
//! often a session is refreshed.
//!
//! # Consistency
//! - Single-key operations inherit the store's atomicity. `add`, `delete` and
//!   `refresh` touch several keys in sequence and can be observed half done.
//! - A crash during `add` can leave a sentinel without timestamps; `get` then
//!   fails with `Corrupted` and the caller deletes and recreates.
//! - `delete` removes metadata before content. Content left behind by an
//!   interrupted delete expires on its own TTL.
//! - `refresh` is read-then-rewrite per key. Concurrent refreshes and content
//!   writes are last-write-wins per key and can leave mixed TTLs.
//! - `set_content` uses the session's `max_duration` as TTL, not the time
//!   remaining, so content keys can drift from the metadata keys until the
//!   next `refresh`.
//!
//! Every store call is bounded by the configured timeout. No retries are
//! performed; store errors surface as [`BackendError`].

use super::{
    is_valid_id, BackendError, KvClient, Session, SessionError, SessionStorage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

const OBJECT_PREFIX: &str = "com.session.object.";
const CREATE_PREFIX: &str = "com.session.create.";
const EXPIRE_PREFIX: &str = "com.session.expire.";

/// Value stored under the existence sentinel key
pub const SENTINEL_VALUE: &str = "value.null";

/// Default bound on a single store call
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default lifetime attached to sessions read back from the store
const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(3600);

/// Networked session storage over any [`KvClient`]
pub struct KvStorage<C> {
    client: C,
    session_name: String,
    timeout: Duration,
    max_duration: Duration,
}

impl<C> std::fmt::Debug for KvStorage<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStorage")
            .field("session_name", &self.session_name)
            .field("timeout", &self.timeout)
            .field("max_duration", &self.max_duration)
            .finish_non_exhaustive()
    }
}

/// Check that a session name can be embedded in the key namespace
pub fn validate_session_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() {
        anyhow::bail!("session name must not be empty");
    }
    if name.contains(['.', '*', '?', '[', ']']) {
        anyhow::bail!("session name '{}' must not contain '.', '*', '?', '[' or ']'", name);
    }
    Ok(())
}

impl<C: KvClient> KvStorage<C> {
    /// Create a storage for the `session_name` partition
    ///
    /// # Errors
    /// Returns an error if the name is empty or contains namespace separators.
    pub fn new(client: C, session_name: &str) -> anyhow::Result<Self> {
        validate_session_name(session_name)?;
        Ok(Self {
            client,
            session_name: session_name.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_duration: DEFAULT_MAX_DURATION,
        })
    }

    /// Lifetime of the sessions this storage holds
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Bound every store call by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn object_key(&self, id: &str) -> String {
        format!("{OBJECT_PREFIX}{}.{id}", self.session_name)
    }

    pub fn create_key(&self, id: &str) -> String {
        format!("{CREATE_PREFIX}{}.{id}", self.session_name)
    }

    pub fn expire_key(&self, id: &str) -> String {
        format!("{EXPIRE_PREFIX}{}.{id}", self.session_name)
    }

    /// Prefix shared by every content key of one session
    pub fn content_prefix(&self, id: &str) -> String {
        format!("{OBJECT_PREFIX}{}.{id}.", self.session_name)
    }

    pub fn content_key(&self, id: &str, key: &str) -> String {
        format!("{}{key}", self.content_prefix(id))
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, BackendError> {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result.map_err(BackendError::Store),
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        }
    }

    async fn kv_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError> {
        self.bounded(self.client.set(key, value, ttl.max(Duration::from_millis(1))))
            .await
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.bounded(self.client.get(key)).await
    }

    async fn kv_del(&self, key: &str) -> Result<(), BackendError> {
        self.bounded(self.client.del(key)).await
    }

    async fn kv_keys(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        self.bounded(self.client.keys(prefix)).await
    }

    async fn read_timestamp(&self, id: &str, key: &str, field: &'static str) -> Result<DateTime<Utc>, SessionError> {
        let corrupted = || SessionError::Corrupted {
            id: id.to_string(),
            field,
        };
        let raw = self.kv_get(key).await?.ok_or_else(corrupted)?;
        let secs: i64 = raw.trim().parse().map_err(|_| corrupted())?;
        DateTime::from_timestamp(secs, 0).ok_or_else(corrupted)
    }

    /// Rewrite one key with its current value and a new TTL
    ///
    /// Returns `false` if the key no longer exists.
    async fn reset_ttl(&self, key: &str, ttl: Duration) -> Result<bool, BackendError> {
        match self.kv_get(key).await? {
            Some(value) => {
                self.kv_set(key, &value, ttl).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn check_key(key: &str) -> Result<(), SessionError> {
    if key.is_empty() {
        Err(SessionError::EmptyKey)
    } else {
        Ok(())
    }
}

#[async_trait]
impl<C: KvClient> SessionStorage for KvStorage<C> {
    async fn add(&self, session: &Session) -> Result<(), SessionError> {
        let id = session.id();
        let ttl = session.max_duration();
        tracing::debug!("Adding session {} to '{}'", id, self.session_name);

        self.kv_set(&self.object_key(id), SENTINEL_VALUE, ttl).await?;
        self.kv_set(&self.create_key(id), &session.created_at().timestamp().to_string(), ttl)
            .await?;
        self.kv_set(&self.expire_key(id), &session.expires_at().timestamp().to_string(), ttl)
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Session, SessionError> {
        if !is_valid_id(id) {
            return Err(SessionError::NotFound);
        }
        if self.kv_get(&self.object_key(id)).await?.is_none() {
            return Err(SessionError::NotFound);
        }

        let created_at = self.read_timestamp(id, &self.create_key(id), "create").await?;
        let expires_at = self.read_timestamp(id, &self.expire_key(id), "expire").await?;
        if expires_at < created_at {
            return Err(SessionError::Corrupted {
                id: id.to_string(),
                field: "expire",
            });
        }

        Session::restore(id, created_at, expires_at, self.max_duration)
    }

    async fn delete(&self, id: &str) -> Result<(), SessionError> {
        tracing::debug!("Deleting session {} from '{}'", id, self.session_name);
        self.kv_del(&self.object_key(id)).await?;
        self.kv_del(&self.create_key(id)).await?;
        self.kv_del(&self.expire_key(id)).await?;

        for key in self.kv_keys(&self.content_prefix(id)).await? {
            self.kv_del(&key).await?;
        }
        Ok(())
    }

    async fn refresh(&self, session: &Session, duration: Duration) -> Result<Session, SessionError> {
        let id = session.id();
        let refreshed = session.refreshed(duration)?;

        if !self.reset_ttl(&self.object_key(id), duration).await? {
            return Err(SessionError::NotFound);
        }
        if !self.reset_ttl(&self.create_key(id), duration).await? {
            return Err(SessionError::NotFound);
        }
        let expire_key = self.expire_key(id);
        if self.kv_get(&expire_key).await?.is_none() {
            return Err(SessionError::NotFound);
        }
        self.kv_set(&expire_key, &refreshed.expires_at().timestamp().to_string(), duration)
            .await?;

        for key in self.kv_keys(&self.content_prefix(id)).await? {
            // a content key deleted since listing is simply skipped
            self.reset_ttl(&key, duration).await?;
        }

        tracing::debug!("Refreshed session {} until {}", id, refreshed.expires_at());
        Ok(refreshed)
    }

    async fn set_content(&self, session: &Session, key: &str, value: Value) -> Result<(), SessionError> {
        check_key(key)?;
        let json = serde_json::to_string(&value).map_err(BackendError::Serialization)?;
        self.kv_set(&self.content_key(session.id(), key), &json, session.max_duration())
            .await?;
        Ok(())
    }

    async fn get_content(&self, session: &Session, key: &str) -> Result<Value, SessionError> {
        check_key(key)?;
        let raw = self
            .kv_get(&self.content_key(session.id(), key))
            .await?
            .ok_or(SessionError::NotFound)?;
        let value = serde_json::from_str(&raw).map_err(BackendError::Serialization)?;
        Ok(value)
    }

    async fn delete_content(&self, session: &Session, key: &str) -> Result<(), SessionError> {
        check_key(key)?;
        self.kv_del(&self.content_key(session.id(), key)).await?;
        Ok(())
    }
}
