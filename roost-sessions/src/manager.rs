//! Session manager façade.
//!
//! The only entry point the request-handling layer uses. Owns the registry,
//! the credential store, and the lifecycle policy; everything upstream
//! (coin debits, deployment records, compensation on failure) is the
//! caller's business.

use crate::creds::CredentialStore;
use crate::error::SessionResult;
use crate::lifecycle::LifecyclePolicy;
use crate::pairing::PairingCoordinator;
use crate::registry::SessionRegistry;
use crate::session::{SessionId, SessionStatus, SessionSummary};
use crate::transport::Transport;
use roost_common::config::SessionsConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Result of a successful session creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionOutcome {
    pub session_id: SessionId,
    /// One-shot pairing value. `None` when the session resumed with stored
    /// credentials and no pairing is needed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_artifact: Option<String>,
}

/// Façade over the session subsystem. Constructed once at startup and
/// shared by handle; no process-wide singleton.
#[derive(Clone)]
pub struct SessionManager {
    registry: SessionRegistry,
    coordinator: Arc<PairingCoordinator>,
}

impl SessionManager {
    /// Build a manager over the given transport and credential directory.
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials_dir: impl Into<PathBuf>,
        policy: LifecyclePolicy,
    ) -> Self {
        let registry = SessionRegistry::new();
        let creds = Arc::new(CredentialStore::new(credentials_dir));
        Self {
            registry: registry.clone(),
            coordinator: Arc::new(PairingCoordinator {
                transport,
                registry,
                creds,
                policy,
            }),
        }
    }

    /// Build a manager from platform configuration.
    pub fn from_config(transport: Arc<dyn Transport>, config: &SessionsConfig) -> Self {
        Self::new(
            transport,
            config.credentials_dir(),
            LifecyclePolicy::from_config(config),
        )
    }

    /// Create (or re-create) the session for `(owner_user_id, session_name)`
    /// and wait for its pairing artifact.
    ///
    /// An existing session under the same identity is torn down first, so
    /// there is never more than one live connection per session id.
    pub async fn create_session(
        &self,
        session_name: &str,
        owner_user_id: &str,
    ) -> SessionResult<CreateSessionOutcome> {
        let id = SessionId::derive(owner_user_id, session_name);
        if self.disconnect(&id).await {
            tracing::info!(session = %id, "replaced existing session");
        }

        self.coordinator
            .begin_pairing(session_name, owner_user_id)
            .await
    }

    /// Connectivity status for a session, or `None` if it does not exist.
    pub async fn get_status(&self, id: &SessionId) -> Option<SessionStatus> {
        self.registry.get(id).await.map(|summary| SessionStatus {
            session_id: summary.session_id,
            connected: summary.connected,
        })
    }

    /// Tear down a session: stop its driver (cancelling any pending
    /// reconnect), close the connection handle, drop the registry entry.
    /// Returns whether a session existed. Never fails on unknown ids.
    pub async fn disconnect(&self, id: &SessionId) -> bool {
        match self.registry.take(id).await {
            Some(session) => {
                let _ = session.shutdown.send(true);
                session.handle.close().await;
                tracing::info!(session = %id, "session disconnected");
                true
            }
            None => false,
        }
    }

    /// Snapshot of all live sessions.
    pub async fn list_active(&self) -> Vec<SessionSummary> {
        self.registry.list().await
    }

    /// Session ids with stored credential material on disk, live or not.
    pub fn stored_sessions(&self) -> SessionResult<Vec<SessionId>> {
        self.coordinator.creds.stored_sessions()
    }
}
