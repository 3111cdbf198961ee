//! Error types for the session lifecycle manager.

use thiserror::Error;

/// Result type alias for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the session manager.
///
/// Only two conditions are fatal to a caller: a pairing timeout during
/// session creation and a credential storage failure. Everything else is
/// handled internally by the lifecycle driver and shows up as status.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No pairing artifact arrived within the bounded wait window.
    /// The caller owns compensation (refund, mark deployment failed).
    #[error("No pairing artifact received before the timeout")]
    PairingTimeout,

    /// Credential persistence failed. Not retried automatically.
    #[error("Credential storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The transport refused or dropped the connection while a caller was
    /// still waiting on it.
    #[error("Transport error: {0}")]
    Transport(String),
}
