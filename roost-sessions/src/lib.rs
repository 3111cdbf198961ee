//! Bot session lifecycle management for Roost.
//!
//! This crate owns everything about live messaging sessions: durable
//! credential storage, the in-memory session registry, the pairing handshake,
//! and the reconnect policy. The HTTP layer talks to it exclusively through
//! [`SessionManager`].
//!
//! ## Architecture
//!
//! ```text
//! SessionManager (façade)
//!     ├── PairingCoordinator — connect + wait for the first pairing artifact
//!     ├── SessionRegistry    — single source of truth for live sessions
//!     ├── CredentialStore    — directory-per-session durable auth material
//!     └── SessionDriver      — per-session event loop (open/close/rotate)
//! ```
//!
//! The transport seam ([`transport::Transport`]) keeps the external
//! messaging-protocol library out of this crate: production uses the
//! websocket [`transport::BridgeTransport`], tests use a scripted mock.

#![warn(clippy::all)]

pub mod creds;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod pairing;
pub mod registry;
pub mod session;
pub mod transport;

pub use creds::CredentialStore;
pub use error::{SessionError, SessionResult};
pub use lifecycle::LifecyclePolicy;
pub use manager::{CreateSessionOutcome, SessionManager};
pub use registry::SessionRegistry;
pub use session::{SessionId, SessionStatus, SessionSummary};
pub use transport::{
    BridgeTransport, CloseReason, Connection, ConnectionHandle, CredentialDelta, Credentials,
    Transport, TransportEvent,
};
