//! Session layer
//!
//! This module provides per-visitor session state for the Inkpot site.
//! It supports:
//! - In-memory storage - default, for single-instance deployment
//! - Networked key/value storage (Redis) - optional, for multi-process deployment
//!
//! The storage backend is selected based on configuration and injected as
//! an `Arc<dyn SessionStorage>`, so request handlers never branch on it.
//!
//! # Usage
//!
//! ```rust,ignore
//! use inkpot::config::SessionConfig;
//! use inkpot::session::{create_storage, Session, new_id};
//!
//! let storage = create_storage(&SessionConfig::default()).await?;
//! let session = Session::new(new_id(), Duration::from_secs(3600))?;
//! storage.add(&session).await?;
//! storage.set_content(&session, "cart", json!("3-items")).await?;
//! ```

pub mod id;
pub mod kv;
pub mod manager;
pub mod memory;
pub mod network;
#[cfg(feature = "redis-session")]
pub mod redis;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::{SessionConfig, SessionDriver};

pub use id::{is_valid_id, new_id};
pub use kv::{KvClient, LocalKv};
pub use manager::{SessionManager, WebSession};
pub use memory::MemoryStorage;
pub use network::KvStorage;
#[cfg(feature = "redis-session")]
pub use redis::RedisKv;

/// Failures of the underlying store, passed through without retries
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Network, protocol or server error reported by the store client
    #[error("session store error: {0:#}")]
    Store(#[source] anyhow::Error),

    /// The store did not answer within the configured bound
    #[error("session store timed out after {0:?}")]
    Timeout(Duration),

    /// A content value could not be encoded or decoded
    #[error("session value serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Caller supplied a blank content key
    #[error("key must not be empty")]
    EmptyKey,

    /// Content accessed before any content exists
    #[error("no session content")]
    NoSession,

    /// Key or session absent
    #[error("not found")]
    NotFound,

    /// Session metadata is missing or unreadable
    #[error("session {id} has corrupted metadata: {field}")]
    Corrupted { id: String, field: &'static str },

    /// Expiration would precede creation, or the duration is out of range
    #[error("invalid session expiry: {0}")]
    InvalidExpiry(String),

    /// Underlying store failure
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SessionError {
    /// True when the session is simply not usable (absent or half-written),
    /// as opposed to the store being unreachable.
    pub fn is_absent(&self) -> bool {
        matches!(self, SessionError::NotFound | SessionError::Corrupted { .. })
    }
}

/// Key/value content bag shared by every clone of one session
///
/// The map is allocated lazily on first write. All access goes through a
/// mutex so two requests sharing a session cannot corrupt it.
#[derive(Debug, Clone, Default)]
pub struct ContentBag {
    inner: Arc<Mutex<Option<HashMap<String, Value>>>>,
}

impl ContentBag {
    fn lock(&self) -> MutexGuard<'_, Option<HashMap<String, Value>>> {
        // A panic while holding the lock cannot leave the map half-updated:
        // every operation is a single insert/remove.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a value, overwriting any previous one
    pub fn set(&self, key: &str, value: Value) -> Result<(), SessionError> {
        if key.is_empty() {
            return Err(SessionError::EmptyKey);
        }
        self.lock()
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value);
        Ok(())
    }

    /// Read a value
    pub fn get(&self, key: &str) -> Result<Value, SessionError> {
        let guard = self.lock();
        let content = guard.as_ref().ok_or(SessionError::NoSession)?;
        if key.is_empty() {
            return Err(SessionError::EmptyKey);
        }
        content.get(key).cloned().ok_or(SessionError::NotFound)
    }

    /// Remove a value; absent keys and an unallocated map are no-ops
    pub fn delete(&self, key: &str) -> Result<(), SessionError> {
        let mut guard = self.lock();
        let Some(content) = guard.as_mut() else {
            return Ok(());
        };
        if key.is_empty() {
            return Err(SessionError::EmptyKey);
        }
        content.remove(key);
        Ok(())
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, HashMap::len)
    }

    /// Whether no keys are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One visitor's server-side session
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(skip)]
    max_duration: Duration,
    #[serde(skip)]
    content: ContentBag,
}

impl Session {
    /// Create a session that starts now and expires after `max_duration`
    ///
    /// Timestamps are kept at whole-second precision, which is what the
    /// networked backend persists.
    pub fn new(id: impl Into<String>, max_duration: Duration) -> Result<Self, SessionError> {
        let created_at = Utc::now().trunc_subsecs(0);
        let expires_at = add_duration(created_at, max_duration)?;
        Ok(Self {
            id: id.into(),
            created_at,
            expires_at,
            max_duration,
            content: ContentBag::default(),
        })
    }

    /// Rebuild a session from persisted metadata
    pub fn restore(
        id: impl Into<String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        max_duration: Duration,
    ) -> Result<Self, SessionError> {
        if expires_at < created_at {
            return Err(SessionError::InvalidExpiry(format!(
                "expires at {expires_at} before creation at {created_at}"
            )));
        }
        Ok(Self {
            id: id.into(),
            created_at,
            expires_at,
            max_duration,
            content: ContentBag::default(),
        })
    }

    /// Copy of this session expiring `duration` from now
    ///
    /// Fails rather than clamping if the new expiry would precede creation.
    pub fn refreshed(&self, duration: Duration) -> Result<Self, SessionError> {
        let expires_at = add_duration(Utc::now().trunc_subsecs(0), duration)?;
        if expires_at < self.created_at {
            return Err(SessionError::InvalidExpiry(format!(
                "refresh to {expires_at} precedes creation at {}",
                self.created_at
            )));
        }
        Ok(Self {
            expires_at,
            ..self.clone()
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// In-process content bag (used by the in-memory backend)
    pub fn content(&self) -> &ContentBag {
        &self.content
    }
}

fn add_duration(at: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>, SessionError> {
    let delta = chrono::Duration::from_std(duration)
        .map_err(|e| SessionError::InvalidExpiry(e.to_string()))?;
    at.checked_add_signed(delta)
        .map(|t| t.trunc_subsecs(0))
        .ok_or_else(|| SessionError::InvalidExpiry(format!("{duration:?} overflows")))
}

/// Session storage trait
///
/// Implementations must be shareable across request tasks. Multi-key
/// operations are not required to be atomic.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Persist a newly created session
    async fn add(&self, session: &Session) -> Result<(), SessionError>;

    /// Look up a session by id; `NotFound` when absent
    async fn get(&self, id: &str) -> Result<Session, SessionError>;

    /// Remove a session and all of its content
    async fn delete(&self, id: &str) -> Result<(), SessionError>;

    /// Extend the session to expire `duration` from now
    async fn refresh(&self, session: &Session, duration: Duration) -> Result<Session, SessionError>;

    /// Store one content value
    async fn set_content(&self, session: &Session, key: &str, value: Value) -> Result<(), SessionError>;

    /// Read one content value
    async fn get_content(&self, session: &Session, key: &str) -> Result<Value, SessionError>;

    /// Remove one content value; absent keys are not an error
    async fn delete_content(&self, session: &Session, key: &str) -> Result<(), SessionError>;
}

/// Create a session storage based on configuration
///
/// - `SessionDriver::Memory` - process-local storage, purged of expired
///   sessions every `purge_interval_seconds` (0 disables the purge task)
/// - `SessionDriver::Redis` - networked storage (requires `redis-session` feature)
///
/// # Errors
/// - Returns an error if Redis is configured but the `redis-session` feature is not enabled
/// - Returns an error if the session name is invalid or the Redis connection fails
pub async fn create_storage(config: &SessionConfig) -> AnyResult<Arc<dyn SessionStorage>> {
    match config.driver {
        SessionDriver::Memory => {
            let storage = Arc::new(MemoryStorage::new());
            if config.purge_interval_seconds > 0 {
                storage.spawn_purge(Duration::from_secs(config.purge_interval_seconds));
            }
            Ok(storage)
        }
        SessionDriver::Redis => {
            #[cfg(feature = "redis-session")]
            {
                let client = RedisKv::connect(&config.redis).await?;
                let storage = KvStorage::new(client, &config.name)?
                    .with_timeout(Duration::from_millis(config.redis.timeout_ms))
                    .with_max_duration(config.max_duration());
                Ok(Arc::new(storage))
            }

            #[cfg(not(feature = "redis-session"))]
            {
                anyhow::bail!(
                    "Redis session driver is configured but the 'redis-session' feature is not enabled. \
                     Either enable the feature with `--features redis-session` or use the 'memory' session driver."
                )
            }
        }
    }
}
