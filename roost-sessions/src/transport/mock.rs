//! Scripted in-memory transport for lifecycle tests.
//!
//! Every `connect` hands back a channel the test can push events into, and
//! records enough state to assert on connect attempts, received credentials,
//! and handle closure.

use super::{Connection, ConnectionHandle, Credentials, Transport, TransportEvent};
use crate::error::{SessionError, SessionResult};
use crate::session::SessionId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

struct MockConnection {
    session_id: SessionId,
    creds: Credentials,
    event_tx: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
struct MockState {
    connections: Vec<MockConnection>,
    fail_next: u32,
}

/// Transport double that lets tests script connectivity events.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    connected: Arc<Notify>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connect attempts fail with a transport error.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().unwrap().fail_next = n;
    }

    /// Total connect attempts that succeeded.
    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    /// Session id seen by the most recent connect.
    pub fn last_session_id(&self) -> Option<SessionId> {
        let state = self.state.lock().unwrap();
        state.connections.last().map(|c| c.session_id.clone())
    }

    /// Credentials passed to the most recent connect.
    pub fn last_creds(&self) -> Option<Credentials> {
        let state = self.state.lock().unwrap();
        state.connections.last().map(|c| c.creds.clone())
    }

    /// Whether the handle of connection `index` (0-based) was closed.
    pub fn is_connection_closed(&self, index: usize) -> bool {
        let state = self.state.lock().unwrap();
        state.connections[index].closed.load(Ordering::SeqCst)
    }

    /// Push an event into the most recent connection's stream.
    pub async fn emit(&self, event: TransportEvent) {
        let tx = {
            let state = self.state.lock().unwrap();
            state
                .connections
                .last()
                .map(|c| c.event_tx.clone())
                .expect("no connection to emit on")
        };
        tx.send(event).await.expect("event channel closed");
    }

    /// Wait until at least `n` connects have happened.
    pub async fn wait_for_connects(&self, n: usize) {
        loop {
            let notified = self.connected.notified();
            if self.connect_count() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        session_id: &SessionId,
        creds: &Credentials,
    ) -> SessionResult<Connection> {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let closed = Arc::new(AtomicBool::new(false));

        {
            let mut state = self.state.lock().unwrap();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(SessionError::Transport("scripted connect failure".into()));
            }
            state.connections.push(MockConnection {
                session_id: session_id.clone(),
                creds: creds.clone(),
                event_tx,
                closed: closed.clone(),
            });
        }

        tokio::spawn(async move {
            if shutdown_rx.recv().await.is_some() {
                closed.store(true, Ordering::SeqCst);
            }
        });

        self.connected.notify_waiters();

        Ok(Connection {
            handle: ConnectionHandle::new(shutdown_tx),
            events: event_rx,
        })
    }
}
