//! Session resolution for inbound requests
//!
//! [`SessionManager::resolve`] turns the token carried by a request into a
//! usable session: an existing one when the backend still has it, otherwise a
//! freshly created one. The resulting [`WebSession`] is what request handlers
//! read and write.

use super::{new_id, is_valid_id, Session, SessionError, SessionStorage};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Resolves request tokens to sessions on the configured backend
#[derive(Clone)]
pub struct SessionManager {
    storage: Arc<dyn SessionStorage>,
    max_duration: Duration,
    refresh_on_access: bool,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("max_duration", &self.max_duration)
            .field("refresh_on_access", &self.refresh_on_access)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager issuing sessions that last `max_duration`
    pub fn new(storage: Arc<dyn SessionStorage>, max_duration: Duration) -> Self {
        Self {
            storage,
            max_duration,
            refresh_on_access: true,
        }
    }

    /// Enable or disable sliding expiration on access
    pub fn with_refresh_on_access(mut self, enabled: bool) -> Self {
        self.refresh_on_access = enabled;
        self
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    /// Find the session for `token`, or create a new one
    ///
    /// Missing, expired and half-written sessions are replaced. Backend
    /// failures are returned instead of silently issuing a fresh session, so
    /// an outage is not mistaken for a new visitor.
    pub async fn resolve(&self, token: Option<&str>) -> Result<WebSession, SessionError> {
        if let Some(token) = token.filter(|t| is_valid_id(t)) {
            match self.storage.get(token).await {
                Ok(session) if session.is_expired() => {
                    tracing::debug!("Session {} expired, replacing", token);
                    self.storage.delete(token).await?;
                }
                Ok(session) => {
                    let session = self.maybe_refresh(session).await;
                    return Ok(self.handle(session, false));
                }
                Err(SessionError::Corrupted { id, field }) => {
                    tracing::warn!("Session {} has corrupted {} metadata, replacing", id, field);
                    if let Err(e) = self.storage.delete(&id).await {
                        tracing::warn!("Failed to delete corrupted session {}: {}", id, e);
                    }
                }
                Err(SessionError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        let session = self.create().await?;
        Ok(self.handle(session, true))
    }

    /// Create and persist a brand new session
    pub async fn create(&self) -> Result<Session, SessionError> {
        let session = Session::new(new_id(), self.max_duration)?;
        self.storage.add(&session).await?;
        tracing::info!("Created session {}", session.id());
        Ok(session)
    }

    /// Delete a session and its content
    pub async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        self.storage.delete(id).await?;
        tracing::info!("Deleted session {}", id);
        Ok(())
    }

    /// Sliding expiration: refresh once less than half the lifetime remains
    ///
    /// Uses the configured lifetime, not the one recovered from storage, so
    /// repeated refreshes never stretch a session beyond it.
    async fn maybe_refresh(&self, session: Session) -> Session {
        if !self.refresh_on_access || session.remaining() >= self.max_duration / 2 {
            return session;
        }
        match self.storage.refresh(&session, self.max_duration).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!("Failed to refresh session {}: {}", session.id(), e);
                session
            }
        }
    }

    fn handle(&self, session: Session, is_new: bool) -> WebSession {
        WebSession {
            storage: self.storage.clone(),
            session,
            max_duration: self.max_duration,
            is_new,
        }
    }
}

/// Session handle exposed to request handlers
///
/// All reads and writes are scoped to the resolved session.
#[derive(Clone)]
pub struct WebSession {
    storage: Arc<dyn SessionStorage>,
    session: Session,
    max_duration: Duration,
    is_new: bool,
}

impl std::fmt::Debug for WebSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSession")
            .field("session", &self.session)
            .field("is_new", &self.is_new)
            .finish_non_exhaustive()
    }
}

impl WebSession {
    pub fn id(&self) -> &str {
        self.session.id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether this session was created for the current request
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub async fn get(&self, key: &str) -> Result<Value, SessionError> {
        self.storage.get_content(&self.session, key).await
    }

    /// Read a value and decode it into `T`
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, SessionError> {
        let value = self.get(key).await?;
        serde_json::from_value(value).map_err(|e| super::BackendError::Serialization(e).into())
    }

    pub async fn set(&self, key: &str, value: impl Serialize) -> Result<(), SessionError> {
        let value = serde_json::to_value(value).map_err(super::BackendError::Serialization)?;
        self.storage.set_content(&self.session, key, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), SessionError> {
        self.storage.delete_content(&self.session, key).await
    }

    /// Lifetime granted on creation and on every refresh
    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    /// Extend this session by the configured lifetime
    pub async fn refresh(&mut self) -> Result<(), SessionError> {
        self.session = self.storage.refresh(&self.session, self.max_duration).await?;
        Ok(())
    }
}
