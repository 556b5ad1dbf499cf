//! In-memory session storage
//!
//! Holds sessions for the lifetime of the running process only; nothing is
//! shared between processes.
//!
//! This backend does NOT enforce expiration on lookup: `get` returns a
//! session even after its `expires_at` has passed. Callers check
//! [`Session::is_expired`] before trusting it (the [`SessionManager`] does).
//! [`MemoryStorage::purge_expired`] is available for periodic housekeeping.
//!
//! Content values are kept in the session's [`ContentBag`], which every
//! clone of the session shares, so a value written through one request is
//! visible to any other request holding the same session.
//!
//! [`SessionManager`]: super::SessionManager
//! [`ContentBag`]: super::ContentBag

use super::{Session, SessionError, SessionStorage};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Process-local session storage
#[derive(Default)]
pub struct MemoryStorage {
    sessions: RwLock<HashMap<String, Session>>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish_non_exhaustive()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired ones included
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove every session whose expiry has passed
    ///
    /// Returns the number of sessions removed.
    pub async fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!("Purged {} expired sessions", removed);
        }
        removed
    }

    /// Run [`MemoryStorage::purge_expired`] every `every` on the current runtime
    pub fn spawn_purge(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let storage = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                storage.purge_expired().await;
            }
        })
    }

    /// The stored copy of a session, which owns the live content bag
    async fn stored(&self, id: &str) -> Result<Session, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(SessionError::NotFound)
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn add(&self, session: &Session) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .insert(session.id().to_string(), session.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Session, SessionError> {
        self.stored(id).await
    }

    async fn delete(&self, id: &str) -> Result<(), SessionError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn refresh(&self, session: &Session, duration: Duration) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(session.id())
            .ok_or(SessionError::NotFound)?;
        let refreshed = stored.refreshed(duration)?;
        *stored = refreshed.clone();
        Ok(refreshed)
    }

    async fn set_content(&self, session: &Session, key: &str, value: Value) -> Result<(), SessionError> {
        self.stored(session.id()).await?.content().set(key, value)
    }

    async fn get_content(&self, session: &Session, key: &str) -> Result<Value, SessionError> {
        self.stored(session.id()).await?.content().get(key)
    }

    async fn delete_content(&self, session: &Session, key: &str) -> Result<(), SessionError> {
        match self.stored(session.id()).await {
            Ok(stored) => stored.content().delete(key),
            Err(SessionError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn storage_with_session(max: Duration) -> (MemoryStorage, Session) {
        let storage = MemoryStorage::new();
        let session = Session::new(super::super::new_id(), max).unwrap();
        storage.add(&session).await.unwrap();
        (storage, session)
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let (storage, session) = storage_with_session(Duration::from_secs(60)).await;
        let loaded = storage.get(session.id()).await.unwrap();
        assert_eq!(loaded.id(), session.id());
        assert_eq!(loaded.created_at(), session.created_at());
        assert_eq!(loaded.expires_at(), session.expires_at());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let storage = MemoryStorage::new();
        assert!(matches!(storage.get("missing").await, Err(SessionError::NotFound)));
    }

    #[tokio::test]
    async fn test_content_lifecycle() {
        let (storage, s1) = storage_with_session(Duration::from_secs(3600)).await;

        assert!(matches!(
            storage.get_content(&s1, "cart").await,
            Err(SessionError::NoSession)
        ));

        storage.set_content(&s1, "cart", json!("3-items")).await.unwrap();
        assert_eq!(storage.get_content(&s1, "cart").await.unwrap(), json!("3-items"));

        storage.delete_content(&s1, "cart").await.unwrap();
        assert!(matches!(
            storage.get_content(&s1, "cart").await,
            Err(SessionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_empty_key() {
        let (storage, session) = storage_with_session(Duration::from_secs(60)).await;
        assert!(matches!(
            storage.set_content(&session, "", json!(1)).await,
            Err(SessionError::EmptyKey)
        ));
        storage.set_content(&session, "a", json!(1)).await.unwrap();
        assert!(matches!(
            storage.get_content(&session, "").await,
            Err(SessionError::EmptyKey)
        ));
    }

    #[tokio::test]
    async fn test_delete_absent_key_is_noop() {
        let (storage, session) = storage_with_session(Duration::from_secs(60)).await;
        storage.delete_content(&session, "nothing").await.unwrap();
        storage.set_content(&session, "a", json!(1)).await.unwrap();
        storage.delete_content(&session, "nothing").await.unwrap();
        assert_eq!(storage.get_content(&session, "a").await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_content_scoped_to_session() {
        let storage = MemoryStorage::new();
        let a = Session::new("a", Duration::from_secs(60)).unwrap();
        let b = Session::new("b", Duration::from_secs(60)).unwrap();
        storage.add(&a).await.unwrap();
        storage.add(&b).await.unwrap();

        storage.set_content(&a, "k", json!("from-a")).await.unwrap();
        storage.set_content(&b, "other", json!(0)).await.unwrap();
        assert!(matches!(storage.get_content(&b, "k").await, Err(SessionError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_removes_session_and_content() {
        let (storage, session) = storage_with_session(Duration::from_secs(60)).await;
        storage.set_content(&session, "a", json!(1)).await.unwrap();
        storage.delete(session.id()).await.unwrap();

        assert!(matches!(storage.get(session.id()).await, Err(SessionError::NotFound)));
        assert!(matches!(
            storage.get_content(&session, "a").await,
            Err(SessionError::NotFound)
        ));
        // deleting again is fine
        storage.delete(session.id()).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_updates_stored_expiry() {
        let (storage, session) = storage_with_session(Duration::from_secs(60)).await;
        let refreshed = storage.refresh(&session, Duration::from_secs(7200)).await.unwrap();
        assert!(refreshed.expires_at() > session.expires_at());
        let loaded = storage.get(session.id()).await.unwrap();
        assert_eq!(loaded.expires_at(), refreshed.expires_at());
    }

    #[tokio::test]
    async fn test_get_does_not_enforce_expiry() {
        let (storage, session) = storage_with_session(Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let loaded = storage.get(session.id()).await.unwrap();
        assert!(loaded.is_expired());

        assert_eq!(storage.purge_expired().await, 1);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_purge_task_drops_expired_sessions() {
        let (storage, expired) = storage_with_session(Duration::ZERO).await;
        let live = Session::new("live", Duration::from_secs(60)).unwrap();
        storage.add(&live).await.unwrap();
        let storage = Arc::new(storage);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let task = storage.spawn_purge(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(200)).await;
        task.abort();

        assert!(matches!(storage.get(expired.id()).await, Err(SessionError::NotFound)));
        assert!(storage.get(live.id()).await.is_ok());
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_same_session() {
        let (storage, session) = storage_with_session(Duration::from_secs(60)).await;
        let storage = Arc::new(storage);

        let mut handles = Vec::new();
        for n in 0..2 {
            let storage = storage.clone();
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..200 {
                    storage.set_content(&session, "counter", json!(n)).await.unwrap();
                    storage
                        .set_content(&session, &format!("key-{n}"), json!(n))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let value = storage.get_content(&session, "counter").await.unwrap();
        assert!(value == json!(0) || value == json!(1));
        assert_eq!(session.content().len(), 3);
    }
}
