//! WebSocket client for talking to the relay.
//!
//! Thin by design: it encodes calls, decodes pushes, and leaves every
//! decision to the application. Reconnection is the application's job;
//! a dropped connection surfaces as a closed event channel.
//!
//! Used by the integration suite and by demo tooling.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{
    Answer, ClientCall, DrawOp, IceCandidate, Offer, ProtocolError, ServerMessage, Snapshot,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Typed client for one relay connection.
pub struct RelayClient {
    /// Full endpoint URL, e.g. `ws://127.0.0.1:9090/relay`
    server_url: String,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Decoded server pushes for the application
    event_rx: Option<mpsc::Receiver<ServerMessage>>,

    /// Push sender (held by the reader task)
    event_tx: mpsc::Sender<ServerMessage>,
}

impl RelayClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the push receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ServerMessage>> {
        self.event_rx.take()
    }

    /// Connect to the relay.
    ///
    /// Spawns the reader and writer tasks for this connection.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok(ok) => ok,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::Connection(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the socket.
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            // Channel closed: say goodbye properly.
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        // Reader task: decode pushes into the event channel.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match ServerMessage::decode(&bytes) {
                            Ok(server_msg) => {
                                if event_tx.send(server_msg).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => log::warn!("failed to decode server frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
        });

        *self.state.write().await = ConnectionState::Connected;
        Ok(())
    }

    /// Send one call to the relay.
    pub async fn call(&self, call: ClientCall) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::Closed);
        }
        let encoded = call.encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx.send(encoded).await.map_err(|_| ProtocolError::Closed),
            None => Err(ProtocolError::Closed),
        }
    }

    pub async fn join_meeting(
        &self,
        room: &str,
        participant: &str,
        display_name: &str,
    ) -> Result<(), ProtocolError> {
        self.call(ClientCall::JoinMeeting {
            room: room.to_string(),
            participant: participant.to_string(),
            display_name: display_name.to_string(),
        })
        .await
    }

    pub async fn leave_meeting(&self, room: &str, participant: &str) -> Result<(), ProtocolError> {
        self.call(ClientCall::LeaveMeeting {
            room: room.to_string(),
            participant: participant.to_string(),
        })
        .await
    }

    pub async fn send_offer(
        &self,
        room: &str,
        target: &str,
        sdp: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.call(ClientCall::SendOffer {
            room: room.to_string(),
            target: target.to_string(),
            offer: Offer { sdp: sdp.into() },
        })
        .await
    }

    pub async fn send_answer(
        &self,
        room: &str,
        target: &str,
        sdp: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.call(ClientCall::SendAnswer {
            room: room.to_string(),
            target: target.to_string(),
            answer: Answer { sdp: sdp.into() },
        })
        .await
    }

    pub async fn send_ice_candidate(
        &self,
        room: &str,
        target: &str,
        candidate: IceCandidate,
    ) -> Result<(), ProtocolError> {
        self.call(ClientCall::SendIceCandidate {
            room: room.to_string(),
            target: target.to_string(),
            candidate,
        })
        .await
    }

    pub async fn join_whiteboard(
        &self,
        room: &str,
        participant: &str,
        display_name: &str,
        color: &str,
    ) -> Result<(), ProtocolError> {
        self.call(ClientCall::JoinWhiteboard {
            room: room.to_string(),
            participant: participant.to_string(),
            display_name: display_name.to_string(),
            color: color.to_string(),
        })
        .await
    }

    pub async fn draw(&self, room: &str, seq: u64, op: DrawOp) -> Result<(), ProtocolError> {
        self.call(ClientCall::Drawing {
            room: room.to_string(),
            seq,
            op,
        })
        .await
    }

    pub async fn commit_stroke(&self, room: &str, snapshot: Snapshot) -> Result<(), ProtocolError> {
        self.call(ClientCall::CommitStroke {
            room: room.to_string(),
            snapshot,
        })
        .await
    }

    pub async fn clear_canvas(&self, room: &str) -> Result<(), ProtocolError> {
        self.call(ClientCall::ClearCanvas {
            room: room.to_string(),
        })
        .await
    }

    pub async fn undo(&self, room: &str) -> Result<(), ProtocolError> {
        self.call(ClientCall::Undo {
            room: room.to_string(),
        })
        .await
    }

    pub async fn redo(&self, room: &str) -> Result<(), ProtocolError> {
        self.call(ClientCall::Redo {
            room: room.to_string(),
        })
        .await
    }

    /// Close the connection. The writer drains pending calls, sends a
    /// close frame, and the server runs its disconnect fan-out.
    pub async fn close(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = RelayClient::new("ws://127.0.0.1:9090/relay");
        assert_eq!(client.server_url(), "ws://127.0.0.1:9090/relay");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = RelayClient::new("ws://127.0.0.1:9090/relay");
        assert_eq!(
            client.connection_state().await,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_call_before_connect_errors() {
        let client = RelayClient::new("ws://127.0.0.1:9090/relay");

        let result = client.join_meeting("standup", "alice", "Alice").await;
        assert!(matches!(result, Err(ProtocolError::Closed)));

        let result = client.undo("board").await;
        assert!(matches!(result, Err(ProtocolError::Closed)));
    }

    #[tokio::test]
    async fn test_take_event_rx_once() {
        let mut client = RelayClient::new("ws://127.0.0.1:9090/relay");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_connect_to_nothing_fails() {
        // Port 1 is never listening.
        let mut client = RelayClient::new("ws://127.0.0.1:1/relay");
        let result = client.connect().await;
        assert!(matches!(result, Err(ProtocolError::Connection(_))));
        assert_eq!(
            client.connection_state().await,
            ConnectionState::Disconnected
        );
    }
}
