//! Transport seam to the external messaging network.
//!
//! The messaging-protocol library itself lives outside this codebase; the
//! session manager only needs a way to open a connection for a session and a
//! stream of connectivity events back from it. [`BridgeTransport`] speaks a
//! small JSON protocol to the protocol daemon over a websocket; tests use the
//! scripted [`mock::MockTransport`].

mod bridge;
#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use bridge::BridgeTransport;

use crate::error::SessionResult;
use crate::session::SessionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Opaque credential material issued by the messaging network.
///
/// Roost never interprets the contents; it only merges rotation deltas and
/// persists the result so a session can resume without re-pairing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials {
    material: serde_json::Map<String, serde_json::Value>,
}

impl Credentials {
    /// True when no pairing has happened yet for this session.
    pub fn is_empty(&self) -> bool {
        self.material.is_empty()
    }

    /// Apply a rotation delta on top of the current material.
    pub fn merge(&mut self, delta: &CredentialDelta) {
        for (key, value) in &delta.0 {
            self.material.insert(key.clone(), value.clone());
        }
    }
}

/// A credential-rotation delta emitted by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialDelta(pub serde_json::Map<String, serde_json::Value>);

/// Why a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Authenticated logout. Retrying would re-trigger pairing loops against
    /// a revoked identity, so this is the only terminal reason.
    LoggedOut,
    /// Transient network drop.
    ConnectionLost,
    /// Protocol stream error.
    StreamError,
    /// Server-side restart.
    ServerRestart,
}

impl CloseReason {
    /// Terminal closures remove the session; everything else is retried.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

/// Connectivity events emitted by a live connection, in transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A QR payload or phone-linking code a device can use to authorize the
    /// session. May be emitted more than once (e.g. on QR expiry).
    PairingArtifact(String),
    /// The connection reached the open state.
    Open,
    /// The connection closed.
    Closed { reason: CloseReason },
    /// Credential material rotated and must be persisted.
    CredentialsRotated(CredentialDelta),
}

/// Handle to a live transport connection.
///
/// Owned by exactly one registry entry; `close` is idempotent so teardown
/// paths do not have to coordinate.
#[derive(Debug)]
pub struct ConnectionHandle {
    shutdown: mpsc::Sender<()>,
    closed: AtomicBool,
}

impl ConnectionHandle {
    /// Wrap a shutdown channel into a handle. The connection task is
    /// expected to terminate when it receives a message (or when all
    /// senders are gone).
    pub fn new(shutdown: mpsc::Sender<()>) -> Self {
        Self {
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Close the underlying connection. Safe to call more than once; only
    /// the first call signals the connection task.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown.send(()).await;
        }
    }

    /// Whether `close` has been called on this handle.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A freshly opened connection: the handle plus its event stream.
pub struct Connection {
    pub handle: ConnectionHandle,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Seam to the external messaging-protocol library.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection for `session_id` using previously stored credential
    /// material (empty on first pairing). Events start flowing into the
    /// returned receiver immediately; nothing is lost before the caller
    /// starts consuming because the channel buffers.
    async fn connect(
        &self,
        session_id: &SessionId,
        creds: &Credentials,
    ) -> SessionResult<Connection>;
}
