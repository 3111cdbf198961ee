//! Websocket transport to the messaging-protocol daemon.
//!
//! The daemon owns the actual WhatsApp protocol implementation; Roost talks
//! to it over a per-session websocket speaking newline-free JSON frames:
//!
//! ```text
//! → {"op":"init","session":"<id>","creds":{...}}
//! ← {"event":"pairing_artifact","data":"<qr payload or linking code>"}
//! ← {"event":"open"}
//! ← {"event":"creds","delta":{...}}
//! ← {"event":"closed","reason":"logged_out" | "connection_lost" | ...}
//! ```

use super::{
    CloseReason, Connection, ConnectionHandle, CredentialDelta, Credentials, Transport,
    TransportEvent,
};
use crate::error::{SessionError, SessionResult};
use crate::session::SessionId;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Transport backed by the protocol daemon's websocket endpoint.
pub struct BridgeTransport {
    url: String,
}

impl BridgeTransport {
    /// Create a transport that dials the given websocket URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn connect(
        &self,
        session_id: &SessionId,
        creds: &Credentials,
    ) -> SessionResult<Connection> {
        let url = format!("{}?session={}", self.url, session_id);

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| SessionError::Transport(format!("Websocket connect failed: {e}")))?;

        let (mut write, mut read) = ws_stream.split();

        let init = json!({
            "op": "init",
            "session": session_id.as_str(),
            "creds": creds,
        });
        write
            .send(Message::Text(init.to_string()))
            .await
            .map_err(|e| SessionError::Transport(format!("Failed to send init frame: {e}")))?;

        let (event_tx, event_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let id = session_id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    msg = read.next() => {
                        let text = match msg {
                            Some(Ok(Message::Text(t))) => t,
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = event_tx
                                    .send(TransportEvent::Closed { reason: CloseReason::ConnectionLost })
                                    .await;
                                break;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                tracing::warn!(session = %id, error = %e, "bridge stream error");
                                let _ = event_tx
                                    .send(TransportEvent::Closed { reason: CloseReason::StreamError })
                                    .await;
                                break;
                            }
                        };

                        let Some(event) = parse_frame(&text) else {
                            tracing::debug!(session = %id, "ignoring unknown bridge frame");
                            continue;
                        };

                        let terminal = matches!(event, TransportEvent::Closed { .. });
                        if event_tx.send(event).await.is_err() || terminal {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Connection {
            handle: ConnectionHandle::new(shutdown_tx),
            events: event_rx,
        })
    }
}

/// Map one daemon frame to a transport event.
fn parse_frame(text: &str) -> Option<TransportEvent> {
    let frame: serde_json::Value = serde_json::from_str(text).ok()?;
    let event = frame.get("event").and_then(|e| e.as_str())?;

    match event {
        "pairing_artifact" => {
            let data = frame.get("data").and_then(|d| d.as_str())?;
            Some(TransportEvent::PairingArtifact(data.to_string()))
        }
        "open" => Some(TransportEvent::Open),
        "creds" => {
            let delta = frame.get("delta").and_then(|d| d.as_object())?;
            Some(TransportEvent::CredentialsRotated(CredentialDelta(
                delta.clone(),
            )))
        }
        "closed" => {
            // Unknown reasons are treated as recoverable.
            let reason = frame
                .get("reason")
                .and_then(|r| serde_json::from_value(r.clone()).ok())
                .unwrap_or(CloseReason::ConnectionLost);
            Some(TransportEvent::Closed { reason })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pairing_artifact_frame() {
        let event = parse_frame(r#"{"event":"pairing_artifact","data":"2@abc=="}"#).unwrap();
        assert_eq!(event, TransportEvent::PairingArtifact("2@abc==".into()));
    }

    #[test]
    fn parse_open_frame() {
        assert_eq!(parse_frame(r#"{"event":"open"}"#), Some(TransportEvent::Open));
    }

    #[test]
    fn parse_creds_frame() {
        let event = parse_frame(r#"{"event":"creds","delta":{"noise_key":"xyz"}}"#).unwrap();
        match event {
            TransportEvent::CredentialsRotated(delta) => {
                assert_eq!(delta.0["noise_key"], "xyz");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_closed_frames() {
        assert_eq!(
            parse_frame(r#"{"event":"closed","reason":"logged_out"}"#),
            Some(TransportEvent::Closed {
                reason: CloseReason::LoggedOut
            })
        );
        // Missing or unknown reason defaults to a recoverable close.
        assert_eq!(
            parse_frame(r#"{"event":"closed"}"#),
            Some(TransportEvent::Closed {
                reason: CloseReason::ConnectionLost
            })
        );
        assert_eq!(
            parse_frame(r#"{"event":"closed","reason":"solar_flare"}"#),
            Some(TransportEvent::Closed {
                reason: CloseReason::ConnectionLost
            })
        );
    }

    #[test]
    fn parse_garbage_is_none() {
        assert_eq!(parse_frame("not json"), None);
        assert_eq!(parse_frame(r#"{"event":"heartbeat"}"#), None);
        assert_eq!(parse_frame(r#"{"op":"init"}"#), None);
    }
}
