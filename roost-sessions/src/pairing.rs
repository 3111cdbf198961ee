//! Pairing handshake coordination.
//!
//! `begin_pairing` opens the connection for a session and waits, bounded,
//! for the transport to produce the first pairing artifact. The driver task
//! is subscribed to the event stream before the wait starts, so an artifact
//! can never slip past the caller.

use crate::creds::CredentialStore;
use crate::error::{SessionError, SessionResult};
use crate::lifecycle::{LifecyclePolicy, SessionDriver};
use crate::manager::CreateSessionOutcome;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionId};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

/// First meaningful signal out of a fresh connection. Sent at most once.
#[derive(Debug)]
pub(crate) enum PairingSignal {
    /// The transport produced a pairing artifact for the caller.
    Artifact(String),
    /// The connection opened without pairing (stored credentials were
    /// still valid), so no artifact is coming.
    Open,
}

/// Drives the handshake that lets a physical device authorize a session.
pub(crate) struct PairingCoordinator {
    pub transport: Arc<dyn Transport>,
    pub registry: SessionRegistry,
    pub creds: Arc<CredentialStore>,
    pub policy: LifecyclePolicy,
}

impl PairingCoordinator {
    /// Create the session entry, open its connection, and wait for the
    /// first pairing artifact (or an open, when resuming with valid
    /// credentials).
    ///
    /// On failure before a connection exists, no registry entry is left
    /// behind. On a pairing timeout the live connection stays registered
    /// and the lifecycle loop keeps managing it; the caller owns upstream
    /// compensation.
    pub(crate) async fn begin_pairing(
        &self,
        session_name: &str,
        owner_user_id: &str,
    ) -> SessionResult<CreateSessionOutcome> {
        let id = SessionId::derive(owner_user_id, session_name);

        // Storage failures surface before anything is connected.
        let creds = self.creds.load(&id)?;
        let resuming = !creds.is_empty();

        let conn = self.transport.connect(&id, &creds).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::new(conn.handle);
        self.registry
            .insert(Session {
                id: id.clone(),
                name: session_name.to_string(),
                owner_user_id: owner_user_id.to_string(),
                handle,
                connected: false,
                pairing_artifact: None,
                shutdown: shutdown_tx,
            })
            .await;

        // The driver takes over the event stream immediately; events that
        // arrived since connect are buffered in the channel.
        let (ready_tx, ready_rx) = oneshot::channel();
        SessionDriver {
            id: id.clone(),
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            creds: self.creds.clone(),
            policy: self.policy,
            shutdown: shutdown_rx,
        }
        .spawn(conn.events, Some(ready_tx));

        match tokio::time::timeout(self.policy.pairing_timeout, ready_rx).await {
            Ok(Ok(PairingSignal::Artifact(artifact))) => {
                // Consumed by the original caller; never reissued.
                self.registry.set_artifact(&id, None).await;
                tracing::info!(session = %id, "pairing artifact delivered");
                Ok(CreateSessionOutcome {
                    session_id: id,
                    pairing_artifact: Some(artifact),
                })
            }
            Ok(Ok(PairingSignal::Open)) => {
                tracing::info!(session = %id, resuming, "session open without new pairing");
                Ok(CreateSessionOutcome {
                    session_id: id,
                    pairing_artifact: None,
                })
            }
            Ok(Err(_)) => {
                // Driver exited before any signal: the connection died
                // during pairing (e.g. an immediate logout).
                Err(SessionError::Transport(
                    "connection closed during pairing".into(),
                ))
            }
            Err(_) => {
                // A live connection handle exists, so the entry stays for
                // the lifecycle loop to manage.
                tracing::warn!(session = %id, "pairing timed out");
                Err(SessionError::PairingTimeout)
            }
        }
    }
}
