use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use courier_core::{Session, SessionId};

use crate::error::StoreError;
use crate::store::SessionStore;

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
    saves: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `session`.
    pub fn with_session(session: Session) -> Self {
        let store = Self::default();
        let _ = store.sessions.lock().insert(session.id.clone(), session);
        store
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.lock().get(id).cloned()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Session, StoreError> {
        Ok(self
            .sessions
            .lock()
            .get(id)
            .cloned()
            .unwrap_or_else(|| Session::fresh(id.clone())))
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let _ = self
            .sessions
            .lock()
            .insert(session.id.clone(), session.clone());
        let _ = self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self, id: &SessionId) -> Result<(), StoreError> {
        let _ = self.sessions.lock().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn load_unknown_is_fresh() {
        let store = MemorySessionStore::new();
        let session = store.load(&SessionId::from_raw("a")).await.unwrap();
        assert!(session.creds.is_empty());
    }

    #[tokio::test]
    async fn save_load_clear() {
        let store = MemorySessionStore::new();
        let id = SessionId::from_raw("a");
        let mut session = Session::fresh(id.clone());
        let _ = session.creds.insert("registrationId".into(), json!(7));

        store.save(&session).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap(), session);
        assert_eq!(store.save_count(), 1);

        store.clear(&id).await.unwrap();
        assert!(store.get(&id).is_none());
    }
}
