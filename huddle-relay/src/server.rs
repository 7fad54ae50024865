//! WebSocket relay server wiring the components together.
//!
//! Architecture:
//! ```text
//! Client A ──┐                    ┌── SignalingRelay ── meeting rooms
//! Client B ──┼── SessionManager ──┤
//! Client C ──┘        │           └── WhiteboardRelay ── boards + history
//!                     │
//!               UsageTracker ── StatsSnapshot (pulled by HTTP collaborator)
//!                     │
//!                 EventBus ── dashboard subscribers
//! ```
//!
//! Each connection runs one task: a select loop over the socket and
//! the connection's outbound queue. Decoded calls dispatch into the
//! relays; everything the relays emit comes back through the queue.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 11

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::events::{EventBus, RelayEvent};
use crate::lifecycle::SessionManager;
use crate::protocol::{ClientCall, ConnectionId, RoomId, SignalPayload};
use crate::rooms::ClientHandle;
use crate::signaling::SignalingRelay;
use crate::usage::UsageTracker;
use crate::whiteboard::{WhiteboardRelay, HISTORY_CAP};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Path the WebSocket handshake must request
    pub endpoint_path: String,
    /// Origins admitted during the handshake. Empty admits every
    /// origin; requests without an Origin header always pass.
    pub allowed_origins: Vec<String>,
    /// Outbound frame queue length per connection
    pub outbound_queue: usize,
    /// Snapshots retained per whiteboard
    pub history_cap: usize,
    /// Event bus capacity per subscriber
    pub event_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            endpoint_path: "/relay".to_string(),
            allowed_origins: Vec::new(),
            outbound_queue: 256,
            history_cap: HISTORY_CAP,
            event_capacity: 256,
        }
    }
}

/// Point-in-time stats assembled from the live components.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub active_connections: usize,
    pub active_meetings: usize,
    pub messages_per_second: f64,
    pub total_messages: u64,
    pub last_activity: Option<String>,
    pub meeting_counts: HashMap<RoomId, usize>,
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    usage: Arc<UsageTracker>,
    bus: EventBus,
    signaling: Arc<SignalingRelay>,
    whiteboard: Arc<WhiteboardRelay>,
    sessions: Arc<SessionManager>,
}

impl RelayServer {
    /// Create a relay server with the given configuration.
    pub fn new(config: RelayConfig) -> Self {
        let usage = Arc::new(UsageTracker::new());
        let bus = EventBus::new(config.event_capacity);
        let signaling = Arc::new(SignalingRelay::new(usage.clone(), bus.clone()));
        let whiteboard = Arc::new(WhiteboardRelay::new(
            config.history_cap,
            usage.clone(),
            bus.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            signaling.clone(),
            whiteboard.clone(),
            usage.clone(),
            bus.clone(),
            config.outbound_queue,
        ));

        Self {
            config,
            usage,
            bus,
            signaling,
            whiteboard,
            sessions,
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the accept loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!(
            "relay listening on {}{}",
            self.config.bind_addr,
            self.config.endpoint_path
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let config = self.config.clone();
            let sessions = self.sessions.clone();
            let signaling = self.signaling.clone();
            let whiteboard = self.whiteboard.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, config, sessions, signaling, whiteboard)
                        .await
                {
                    log::warn!("connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection from handshake to close.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        config: RelayConfig,
        sessions: Arc<SessionManager>,
        signaling: Arc<SignalingRelay>,
        whiteboard: Arc<WhiteboardRelay>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let endpoint_path = config.endpoint_path.clone();
        let allowed_origins = config.allowed_origins.clone();
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            move |request: &Request, response: Response| {
                if request.uri().path() != endpoint_path {
                    log::debug!("handshake rejected: path {}", request.uri().path());
                    return Err(reject_handshake(StatusCode::NOT_FOUND, "unknown endpoint"));
                }
                if !origin_allowed(&allowed_origins, request) {
                    log::debug!("handshake rejected: origin not allowed");
                    return Err(reject_handshake(StatusCode::FORBIDDEN, "origin not allowed"));
                }
                Ok(response)
            },
        )
        .await?;

        let (handle, outbound_rx) = sessions.open().await;
        let conn = handle.conn();
        log::info!("connection {conn} established from {addr}");

        let result = Self::drive_connection(
            ws_stream,
            addr,
            &handle,
            &signaling,
            &whiteboard,
            outbound_rx,
        )
        .await;

        // Teardown runs regardless of how the loop ended.
        sessions.close(conn).await;
        result
    }

    /// Select loop over the socket and the outbound queue.
    async fn drive_connection(
        ws_stream: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        handle: &ClientHandle,
        signaling: &Arc<SignalingRelay>,
        whiteboard: &Arc<WhiteboardRelay>,
        mut outbound_rx: mpsc::Receiver<Arc<Vec<u8>>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            match ClientCall::decode(&bytes) {
                                Ok(call) => {
                                    Self::dispatch(call, handle, signaling, whiteboard).await;
                                }
                                Err(e) => {
                                    // Malformed frames never kill the connection.
                                    log::warn!("failed to decode frame from {addr}: {e}");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("connection closed from {addr}");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Err(e)) => {
                            log::warn!("websocket error from {addr}: {e}");
                            break;
                        }
                        _ => {}
                    }
                }

                // Outgoing relay frame
                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            ws_sender.send(Message::Binary(frame.to_vec().into())).await?;
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }

    /// Route one decoded call into the owning relay.
    async fn dispatch(
        call: ClientCall,
        handle: &ClientHandle,
        signaling: &Arc<SignalingRelay>,
        whiteboard: &Arc<WhiteboardRelay>,
    ) {
        let conn: ConnectionId = handle.conn();
        log::trace!("{} from {conn}", call.name());

        match call {
            ClientCall::JoinMeeting {
                room,
                participant,
                display_name,
            } => {
                signaling
                    .join_meeting(&room, &participant, &display_name, handle.clone())
                    .await
            }
            ClientCall::LeaveMeeting { room, participant } => {
                signaling.leave_meeting(&room, &participant, conn).await
            }
            ClientCall::SendOffer {
                room,
                target,
                offer,
            } => {
                signaling
                    .relay_signal(&room, &target, SignalPayload::Offer(offer), conn)
                    .await
            }
            ClientCall::SendAnswer {
                room,
                target,
                answer,
            } => {
                signaling
                    .relay_signal(&room, &target, SignalPayload::Answer(answer), conn)
                    .await
            }
            ClientCall::SendIceCandidate {
                room,
                target,
                candidate,
            } => {
                signaling
                    .relay_signal(&room, &target, SignalPayload::Ice(candidate), conn)
                    .await
            }
            ClientCall::JoinWhiteboard {
                room,
                participant,
                display_name,
                color,
            } => {
                whiteboard
                    .join_whiteboard(&room, &participant, &display_name, &color, handle.clone())
                    .await
            }
            ClientCall::Drawing { room, seq, op } => whiteboard.draw(&room, seq, op, conn).await,
            ClientCall::CommitStroke { room, snapshot } => {
                whiteboard.commit_stroke(&room, snapshot, conn).await
            }
            ClientCall::ClearCanvas { room } => whiteboard.clear_canvas(&room, conn).await,
            ClientCall::Undo { room } => whiteboard.undo(&room).await,
            ClientCall::Redo { room } => whiteboard.redo(&room).await,
        }
    }

    /// Assemble a stats snapshot from the live components.
    pub async fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_connections: self.sessions.active_connections().await,
            active_meetings: self.signaling.active_meetings().await,
            messages_per_second: self.usage.rate().await,
            total_messages: self.usage.total(),
            last_activity: self.usage.last_activity().await.map(|entry| entry.text),
            meeting_counts: self.signaling.meeting_counts().await,
        }
    }

    /// Zero the usage counters and note the reset in the activity log.
    pub async fn reset_stats(&self) {
        self.usage.reset().await;
        self.usage.record_activity("statistics reset").await;
        self.bus.publish(RelayEvent::StatsReset);
        log::info!("statistics reset");
    }

    /// Subscribe to the relay event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RelayEvent> {
        self.bus.subscribe()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn signaling(&self) -> &Arc<SignalingRelay> {
        &self.signaling
    }

    pub fn whiteboard(&self) -> &Arc<WhiteboardRelay> {
        &self.whiteboard
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }
}

fn reject_handshake(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

fn origin_allowed(allowed: &[String], request: &Request) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(origin) = request
        .headers()
        .get("Origin")
        .and_then(|value| value.to_str().ok())
    else {
        // Non-browser clients send no Origin header.
        return true;
    };
    allowed.iter().any(|entry| entry.eq_ignore_ascii_case(origin))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.endpoint_path, "/relay");
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.outbound_queue, 256);
        assert_eq!(config.history_cap, HISTORY_CAP);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_server_creation() {
        let server = RelayServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
    }

    #[test]
    fn test_server_custom_config() {
        let config = RelayConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            endpoint_path: "/signal".to_string(),
            ..RelayConfig::default()
        };
        let server = RelayServer::new(config);
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
        assert_eq!(server.config().endpoint_path, "/signal");
    }

    #[tokio::test]
    async fn test_stats_initial() {
        let server = RelayServer::with_defaults();
        let stats = server.stats().await;

        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.active_meetings, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.messages_per_second, 0.0);
        assert!(stats.last_activity.is_none());
        assert!(stats.meeting_counts.is_empty());
    }

    #[tokio::test]
    async fn test_reset_stats_notes_activity() {
        let server = RelayServer::with_defaults();
        server.usage.record_message();
        server.usage.record_message();

        server.reset_stats().await;

        let stats = server.stats().await;
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.last_activity.as_deref(), Some("statistics reset"));
    }

    #[tokio::test]
    async fn test_reset_publishes_event() {
        let server = RelayServer::with_defaults();
        let mut events = server.subscribe_events();

        server.reset_stats().await;

        assert!(matches!(
            events.recv().await.unwrap(),
            RelayEvent::StatsReset
        ));
    }

    fn request_with_origin(origin: Option<&str>) -> Request {
        let builder = Request::builder().uri("/relay");
        let builder = match origin {
            Some(origin) => builder.header("Origin", origin),
            None => builder,
        };
        builder.body(()).unwrap()
    }

    #[test]
    fn test_origin_allowed_empty_list_admits_all() {
        let request = request_with_origin(Some("http://evil.example"));
        assert!(origin_allowed(&[], &request));
    }

    #[test]
    fn test_origin_allowed_checks_list() {
        let allowed = vec!["http://localhost:3000".to_string()];

        let ok = request_with_origin(Some("http://localhost:3000"));
        assert!(origin_allowed(&allowed, &ok));

        let ok_case = request_with_origin(Some("HTTP://LOCALHOST:3000"));
        assert!(origin_allowed(&allowed, &ok_case));

        let bad = request_with_origin(Some("http://evil.example"));
        assert!(!origin_allowed(&allowed, &bad));
    }

    #[test]
    fn test_origin_allowed_missing_header_passes() {
        let allowed = vec!["http://localhost:3000".to_string()];
        let request = request_with_origin(None);
        assert!(origin_allowed(&allowed, &request));
    }
}
