//! Session identity and registry entry types.

use crate::transport::ConnectionHandle;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Stable session identifier, derived deterministically from the owning
/// user and the session name. Doubles as the credential directory name, so
/// it is always filesystem-safe hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Derive the id for `(owner_user_id, session_name)`.
    pub fn derive(owner_user_id: &str, session_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(owner_user_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(session_name.as_bytes());
        Self(hex::encode(&hasher.finalize()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for SessionId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// A live session as held by the registry.
///
/// The registry owns the entry for the session's whole lifetime; the handle
/// is closed exactly once on teardown.
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub owner_user_id: String,
    pub handle: Arc<ConnectionHandle>,
    /// False until the connection reaches the open state; reset on close.
    pub connected: bool,
    /// One-shot pairing value, present only between creation and first
    /// successful pairing; cleared once consumed.
    pub pairing_artifact: Option<String>,
    /// Stops the lifecycle driver, including a pending reconnect delay.
    /// Lives in the entry so teardown has exactly one source of truth.
    pub shutdown: watch::Sender<bool>,
}

/// Read-only snapshot of a session for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub name: String,
    pub owner_user_id: String,
    pub connected: bool,
}

/// Connectivity status returned by the façade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub connected: bool,
}
