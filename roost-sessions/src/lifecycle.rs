//! Connection lifecycle controller.
//!
//! One [`SessionDriver`] task per session consumes the transport's event
//! stream and turns it into registry mutations:
//!
//! - pairing artifact → delivered to the waiting creator at most once
//! - open → `connected = true`, retry counter reset
//! - credential rotation → persisted via the credential store
//! - terminal close (logout) → session removed, credentials purged
//! - any other close → `connected = false`, reconnect after a fixed delay
//!   using the already-loaded credentials (no re-pairing)
//!
//! Reconnects are bounded: after `max_reconnect_attempts` consecutive
//! failures the session is removed rather than retried forever. An explicit
//! disconnect cancels a pending reconnect delay instead of leaking the
//! timer.

use crate::creds::CredentialStore;
use crate::pairing::PairingSignal;
use crate::registry::SessionRegistry;
use crate::session::SessionId;
use crate::transport::{CloseReason, Transport, TransportEvent};
use roost_common::config::SessionsConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Timing and retry policy for the session lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct LifecyclePolicy {
    /// Bounded wait for the first pairing artifact during creation.
    pub pairing_timeout: Duration,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Consecutive failed reconnects before the session is given up on.
    pub max_reconnect_attempts: u32,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            pairing_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 20,
        }
    }
}

impl LifecyclePolicy {
    /// Build the policy from platform configuration.
    pub fn from_config(config: &SessionsConfig) -> Self {
        Self {
            pairing_timeout: Duration::from_secs(config.pairing_timeout_secs),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

enum ReconnectOutcome {
    /// A new connection is live; its event stream replaces the old one.
    Resumed(mpsc::Receiver<TransportEvent>),
    /// Retry budget exhausted or credentials unreadable.
    GaveUp,
    /// The session was torn down while we were waiting.
    Cancelled,
}

/// Per-session event loop. Spawned once per live session; exits when the
/// session is removed.
pub(crate) struct SessionDriver {
    pub id: SessionId,
    pub transport: Arc<dyn Transport>,
    pub registry: SessionRegistry,
    pub creds: Arc<CredentialStore>,
    pub policy: LifecyclePolicy,
    /// Signalled by `SessionManager::disconnect`; also covers pending
    /// reconnect delays.
    pub shutdown: watch::Receiver<bool>,
}

impl SessionDriver {
    pub(crate) fn spawn(
        self,
        events: mpsc::Receiver<TransportEvent>,
        ready: Option<oneshot::Sender<PairingSignal>>,
    ) {
        tokio::spawn(self.run(events, ready));
    }

    async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut ready: Option<oneshot::Sender<PairingSignal>>,
    ) {
        let mut attempts: u32 = 0;

        loop {
            let event = tokio::select! {
                // The disconnect path owns registry cleanup; just stop.
                _ = self.shutdown.changed() => return,
                event = events.recv() => {
                    // A dropped stream without a close frame is a drop.
                    event.unwrap_or(TransportEvent::Closed {
                        reason: CloseReason::ConnectionLost,
                    })
                }
            };

            match event {
                TransportEvent::PairingArtifact(artifact) => {
                    if let Some(tx) = ready.take() {
                        self.registry
                            .set_artifact(&self.id, Some(artifact.clone()))
                            .await;
                        if tx.send(PairingSignal::Artifact(artifact)).is_err() {
                            tracing::debug!(
                                session = %self.id,
                                "pairing caller gone before artifact delivery"
                            );
                        }
                    } else {
                        // e.g. QR expiry regenerated the artifact. It is
                        // never redelivered through the creation call.
                        tracing::debug!(
                            session = %self.id,
                            "pairing artifact regenerated; not redelivered"
                        );
                    }
                }

                TransportEvent::Open => {
                    attempts = 0;
                    self.registry.set_connected(&self.id, true).await;
                    self.registry.set_artifact(&self.id, None).await;
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(PairingSignal::Open);
                    }
                    tracing::info!(session = %self.id, "connection open");
                }

                TransportEvent::CredentialsRotated(delta) => {
                    if let Err(e) = self.creds.save(&self.id, &delta) {
                        tracing::error!(
                            session = %self.id,
                            error = %e,
                            "failed to persist rotated credentials"
                        );
                    }
                }

                TransportEvent::Closed { reason } if reason.is_terminal() => {
                    tracing::info!(
                        session = %self.id,
                        ?reason,
                        "terminal disconnect; removing session"
                    );
                    if let Some(session) = self.registry.take(&self.id).await {
                        session.handle.close().await;
                    }
                    if let Err(e) = self.creds.purge(&self.id) {
                        tracing::warn!(
                            session = %self.id,
                            error = %e,
                            "failed to purge credentials after logout"
                        );
                    }
                    return;
                }

                TransportEvent::Closed { reason } => {
                    tracing::warn!(
                        session = %self.id,
                        ?reason,
                        "connection closed; scheduling reconnect"
                    );
                    self.registry.set_connected(&self.id, false).await;

                    match self.reconnect(&mut attempts).await {
                        ReconnectOutcome::Resumed(stream) => events = stream,
                        ReconnectOutcome::GaveUp => {
                            tracing::error!(
                                session = %self.id,
                                attempts,
                                "reconnect budget exhausted; removing session"
                            );
                            if let Some(session) = self.registry.take(&self.id).await {
                                session.handle.close().await;
                            }
                            return;
                        }
                        ReconnectOutcome::Cancelled => return,
                    }
                }
            }
        }
    }

    /// Re-open the connection with stored credentials after a recoverable
    /// close. Waits out the fixed delay between attempts and bails out as
    /// soon as the session is torn down.
    async fn reconnect(&mut self, attempts: &mut u32) -> ReconnectOutcome {
        loop {
            if *attempts >= self.policy.max_reconnect_attempts {
                return ReconnectOutcome::GaveUp;
            }
            *attempts += 1;

            tokio::select! {
                _ = self.shutdown.changed() => return ReconnectOutcome::Cancelled,
                () = tokio::time::sleep(self.policy.reconnect_delay) => {}
            }

            if !self.registry.contains(&self.id).await {
                return ReconnectOutcome::Cancelled;
            }

            let creds = match self.creds.load(&self.id) {
                Ok(creds) => creds,
                Err(e) => {
                    tracing::error!(
                        session = %self.id,
                        error = %e,
                        "cannot load credentials for reconnect"
                    );
                    return ReconnectOutcome::GaveUp;
                }
            };

            match self.transport.connect(&self.id, &creds).await {
                Ok(conn) => {
                    let handle = Arc::new(conn.handle);
                    // Replace, never duplicate: the entry keeps its identity
                    // and only the handle is swapped.
                    match self.registry.replace_handle(&self.id, handle.clone()).await {
                        Some(_old) => return ReconnectOutcome::Resumed(conn.events),
                        None => {
                            // Torn down while we were connecting.
                            handle.close().await;
                            return ReconnectOutcome::Cancelled;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        session = %self.id,
                        attempt = *attempts,
                        error = %e,
                        "reconnect attempt failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults() {
        let policy = LifecyclePolicy::default();
        assert_eq!(policy.pairing_timeout, Duration::from_secs(10));
        assert_eq!(policy.reconnect_delay, Duration::from_secs(5));
        assert_eq!(policy.max_reconnect_attempts, 20);
    }

    #[test]
    fn policy_from_config() {
        let config = SessionsConfig {
            pairing_timeout_secs: 3,
            reconnect_delay_secs: 1,
            max_reconnect_attempts: 2,
            ..SessionsConfig::default()
        };
        let policy = LifecyclePolicy::from_config(&config);
        assert_eq!(policy.pairing_timeout, Duration::from_secs(3));
        assert_eq!(policy.reconnect_delay, Duration::from_secs(1));
        assert_eq!(policy.max_reconnect_attempts, 2);
    }
}
