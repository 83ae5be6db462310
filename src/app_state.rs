use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::ModelId;
use crate::session::{ChatTurn, Session, SessionError};

pub type SharedSession = Arc<SessionHandle>;

/// Converts a TTL given in minutes, saturating instead of overflowing.
pub fn ttl_from_mins(mins: u64) -> Duration {
    Duration::from_secs(mins.saturating_mul(60))
}

/// One stored session. Questions take `asking` for their whole round trip so
/// they run in order, but the session itself is only locked on either side of
/// the backend call; readers never wait on the upstream API.
pub struct SessionHandle {
    session: Mutex<Session>,
    asking: Mutex<()>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
            asking: Mutex::new(()),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().await
    }

    pub async fn ask(
        &self,
        question: &str,
        model: Option<ModelId>,
    ) -> Result<ChatTurn, SessionError> {
        let _turn = self.asking.lock().await;
        let pending = self.session.lock().await.begin_ask(question, model)?;
        let answer = pending.send().await;
        self.session.lock().await.finish_ask(pending, answer)
    }

    fn is_idle_for(&self, ttl: Duration) -> bool {
        match (self.asking.try_lock(), self.session.try_lock()) {
            (Ok(_), Ok(session)) => session.idle_for() >= ttl,
            _ => false,
        }
    }
}

/// In-memory sessions keyed by id. Nothing here outlives the process.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SharedSession>>,
    idle_ttl: Duration,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_ttl,
        }
    }

    pub async fn insert(&self, session: Session) -> Uuid {
        self.evict_idle().await;
        let id = Uuid::new_v4();
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(SessionHandle::new(session)));
        info!(%id, "Created session");
        id
    }

    pub async fn get(&self, id: &Uuid) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops sessions idle for longer than the TTL. A session that is locked
    /// or waiting on an answer always survives.
    pub async fn evict_idle(&self) {
        let ttl = self.idle_ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_idle_for(ttl));
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::llm_interaction::{ChatBackend, ChatRequest, GroqError};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Holds every answer until released.
    #[derive(Default)]
    struct GatedBackend {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ChatBackend for GatedBackend {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, GroqError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok("done".to_string())
        }
    }

    #[test]
    fn test_ttl_from_mins_saturates() {
        assert_eq!(ttl_from_mins(120), Duration::from_secs(7200));
        assert_eq!(ttl_from_mins(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[tokio::test]
    async fn test_view_is_not_blocked_by_pending_answer() {
        let backend = Arc::new(GatedBackend::default());
        let mut session = Session::new(Some(backend.clone()));
        session.load_document(Document::from_upload("a.txt", None, b"hello").unwrap());

        let store = SessionStore::new(Duration::ZERO);
        let id = store.insert(session).await;
        let handle = store.get(&id).await.unwrap();

        let asking = tokio::spawn({
            let handle = handle.clone();
            async move { handle.ask("What does it say?", None).await }
        });
        backend.started.notified().await;

        let view = tokio::time::timeout(Duration::from_secs(1), handle.lock())
            .await
            .expect("session lock held across the backend call")
            .view();
        assert!(view.history.is_empty());

        store.evict_idle().await;
        assert!(store.get(&id).await.is_some());

        backend.release.notify_one();
        let turn = asking.await.unwrap().unwrap();
        assert_eq!(turn.answer, "done");
        assert_eq!(handle.lock().await.history().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert!(store.is_empty().await);

        let id = store.insert(Session::new(None)).await;
        assert!(store.get(&id).await.is_some());
        assert!(store.get(&Uuid::new_v4()).await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let store = SessionStore::new(Duration::ZERO);
        let first = store.insert(Session::new(None)).await;

        // Inserting sweeps the store; with a zero TTL the first session is gone.
        let second = store.insert(Session::new(None)).await;
        assert!(store.get(&first).await.is_none());
        assert!(store.get(&second).await.is_some());
    }

    #[tokio::test]
    async fn test_locked_session_survives_eviction() {
        let store = SessionStore::new(Duration::ZERO);
        let id = store.insert(Session::new(None)).await;
        let session = store.get(&id).await.unwrap();
        let _guard = session.lock().await;

        store.evict_idle().await;
        assert!(store.get(&id).await.is_some());
    }
}
