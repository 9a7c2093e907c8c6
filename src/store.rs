//! Per-browser-session registry.
//!
//! ## Design
//! - SessionStore: Arc<Mutex<HashMap<String, SharedSession>>>, shared across all connections
//! - Each session sits behind its own tokio Mutex, held for a whole request,
//!   so a slow chat turn only blocks requests from the same browser
//! - Session ids are UUID v4 strings generated here and carried in the
//!   `lab_session` cookie; ids the server did not issue are ignored

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::session::SessionState;

pub type SharedSession = Arc<tokio::sync::Mutex<SessionState>>;

#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, SharedSession>>>,
}

pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, SharedSession>> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Look up a session the server issued earlier. Unknown ids are never
    /// adopted.
    pub fn get(&self, id: &str) -> Option<SharedSession> {
        self.registry().get(id).map(Arc::clone)
    }

    /// Start a session under a freshly generated id.
    pub fn create(&self) -> (String, SharedSession) {
        let id = generate_session_id();
        let session: SharedSession = Arc::new(tokio::sync::Mutex::new(SessionState::new()));
        self.registry().insert(id.clone(), Arc::clone(&session));
        (id, session)
    }

    pub fn session_count(&self) -> usize {
        self.registry().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_session_id_is_uuid() {
        let id = generate_session_id();
        assert_eq!(id.len(), 36);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_generate_session_id_unique() {
        let ids: std::collections::HashSet<String> =
            (0..100).map(|_| generate_session_id()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[tokio::test]
    async fn test_create_then_get_returns_same_session() {
        let store = SessionStore::new();
        let (id, first) = store.create();
        first.lock().await.set_notes("kept");

        let again = store.get(&id).expect("issued id resolves");
        assert_eq!(again.lock().await.notes, "kept");
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn test_get_unknown_id_does_not_create() {
        let store = SessionStore::new();
        assert!(store.get("made-up-id").is_none());
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::new();
        let (_, a) = store.create();
        let (_, b) = store.create();
        a.lock().await.confirm_identity(1).unwrap();
        assert!(!b.lock().await.identity_confirmed);
        assert_eq!(store.session_count(), 2);
    }

    #[test]
    fn test_clone_shares_registry() {
        let store = SessionStore::new();
        let clone = store.clone();
        let (id, _) = clone.create();
        assert!(store.get(&id).is_some());
    }
}
