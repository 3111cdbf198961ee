//! In-memory session registry.
//!
//! The single authoritative table of live sessions. Storage and lookup
//! only; lifecycle decisions live in [`crate::lifecycle`] and
//! [`crate::manager`]. All mutations go through the inner `RwLock`, so they
//! are atomic with respect to each other.

use crate::session::{Session, SessionId, SessionSummary};
use crate::transport::ConnectionHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared handle to the registry. Cloning is cheap.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for the session's id. There is never
    /// more than one entry per id.
    pub async fn insert(&self, session: Session) {
        let mut map = self.inner.write().await;
        map.insert(session.id.clone(), session);
    }

    /// Snapshot of one session, or `None` if it does not exist.
    pub async fn get(&self, id: &SessionId) -> Option<SessionSummary> {
        let map = self.inner.read().await;
        map.get(id).map(summarize)
    }

    /// Whether an entry exists for the id.
    pub async fn contains(&self, id: &SessionId) -> bool {
        self.inner.read().await.contains_key(id)
    }

    /// Flip the connectivity flag. Returns false if the session is gone.
    pub async fn set_connected(&self, id: &SessionId, connected: bool) -> bool {
        let mut map = self.inner.write().await;
        match map.get_mut(id) {
            Some(session) => {
                session.connected = connected;
                true
            }
            None => false,
        }
    }

    /// Swap in a new connection handle after a reconnect. The old handle is
    /// returned so the caller can close it if it is still live.
    pub async fn replace_handle(
        &self,
        id: &SessionId,
        handle: Arc<ConnectionHandle>,
    ) -> Option<Arc<ConnectionHandle>> {
        let mut map = self.inner.write().await;
        map.get_mut(id)
            .map(|session| std::mem::replace(&mut session.handle, handle))
    }

    /// Store or clear the pending pairing artifact.
    pub async fn set_artifact(&self, id: &SessionId, artifact: Option<String>) {
        let mut map = self.inner.write().await;
        if let Some(session) = map.get_mut(id) {
            session.pairing_artifact = artifact;
        }
    }

    /// Remove and return the entry. Idempotent: `None` when already gone.
    pub async fn take(&self, id: &SessionId) -> Option<Session> {
        let mut map = self.inner.write().await;
        map.remove(id)
    }

    /// Snapshot of all current sessions, for operational introspection.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let map = self.inner.read().await;
        map.values().map(summarize).collect()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

fn summarize(session: &Session) -> SessionSummary {
    SessionSummary {
        session_id: session.id.clone(),
        name: session.name.clone(),
        owner_user_id: session.owner_user_id.clone(),
        connected: session.connected,
    }
}
