use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::VivaError;
use crate::session::{Session, SessionId};

/// Durable store for sessions, keyed by session id. The engine reads and
/// writes exclusively through this trait; swapping in a database-backed
/// implementation never touches the state machine.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: Session) -> Result<(), VivaError>;

    async fn load(&self, id: SessionId) -> Result<Session, VivaError>;

    /// Persists a mutated session. This is the single commit point of every
    /// engine operation: either the whole turn transition lands or nothing
    /// does.
    async fn save(&self, session: Session) -> Result<(), VivaError>;
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    async fn insert(&self, session: Session) -> Result<(), VivaError> {
        (**self).insert(session).await
    }

    async fn load(&self, id: SessionId) -> Result<Session, VivaError> {
        (**self).load(id).await
    }

    async fn save(&self, session: Session) -> Result<(), VivaError> {
        (**self).save(session).await
    }
}

/// In-memory store. Sessions are cheap to clone; load hands out a snapshot
/// and save replaces it wholesale.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: Session) -> Result<(), VivaError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(VivaError::Inconsistent(format!(
                "session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn load(&self, id: SessionId) -> Result<Session, VivaError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(VivaError::NotFound)
    }

    async fn save(&self, session: Session) -> Result<(), VivaError> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.id) {
            return Err(VivaError::NotFound);
        }
        sessions.insert(session.id, session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::examiner::SubjectContext;
    use crate::session::SessionKind;
    use uuid::Uuid;

    fn session() -> Session {
        Session::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            SessionKind::Practice,
            SubjectContext::default(),
        )
    }

    #[tokio::test]
    async fn load_unknown_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.load(SessionId::new()).await,
            Err(VivaError::NotFound)
        ));
    }

    #[tokio::test]
    async fn insert_then_load_round_trips() {
        let store = MemoryStore::new();
        let s = session();
        let id = s.id;
        store.insert(s).await.unwrap();
        let loaded = store.load(id).await.unwrap();
        assert_eq!(loaded.id, id);

        // Double insert of the same id is a defect.
        let mut dup = session();
        dup.id = id;
        assert!(matches!(
            store.insert(dup).await,
            Err(VivaError::Inconsistent(_))
        ));
    }

    #[tokio::test]
    async fn save_requires_existing_session() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.save(session()).await,
            Err(VivaError::NotFound)
        ));
    }
}
