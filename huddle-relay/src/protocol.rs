//! Binary protocol for signaling and whiteboard relay traffic.
//!
//! Every WebSocket frame carries one bincode-encoded value: client to
//! server frames are a [`ClientCall`], server to client frames a
//! [`ServerMessage`] envelope:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ room         │ event                        │
//! │ optional str │ tagged union, variable       │
//! └──────────────┴──────────────────────────────┘
//! ```
//!
//! Signaling payloads (SDP, ICE) are opaque strings relayed verbatim;
//! the relay never parses them.
//!
//! Performance target: encode < 1µs for a typical drawing segment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Room identifier chosen by clients.
pub type RoomId = String;
/// Participant identifier chosen by clients, unique per room by convention.
pub type ParticipantId = String;
/// Server-assigned transport connection identifier.
pub type ConnectionId = Uuid;

/// Opaque canvas bitmap blob, produced and consumed by clients.
pub type Snapshot = Vec<u8>;

/// Upper bound on room and participant identifier length, in bytes.
pub const MAX_ID_BYTES: usize = 128;

/// Identifier validation applied before any relay state change.
///
/// Rejects empty ids, ids over [`MAX_ID_BYTES`] bytes, and ids containing
/// control characters. A call carrying an invalid id is dropped whole.
pub fn valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_ID_BYTES && !id.chars().any(|c| c.is_control())
}

/// A point in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Geometric primitive for shape operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeKind {
    Line,
    Rectangle,
    Circle,
}

/// One drawing operation, relayed verbatim between clients.
///
/// `color` is a client-side CSS color string; the relay never
/// interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DrawOp {
    /// One segment of a freehand stroke.
    FreehandSegment {
        from: Point,
        to: Point,
        color: String,
        width: f32,
    },
    /// A complete geometric shape.
    Shape {
        kind: ShapeKind,
        start: Point,
        end: Point,
        color: String,
        width: f32,
    },
    /// One segment of an erase pass.
    Erase { from: Point, to: Point, width: f32 },
}

/// SDP offer, relayed opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub sdp: String,
}

/// SDP answer, relayed opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub sdp: String,
}

/// ICE candidate, relayed opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Whiteboard roster entry pushed in `UsersUpdate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardUser {
    pub participant: ParticipantId,
    pub display_name: String,
    /// Client-chosen cursor/stroke color string.
    pub color: String,
}

/// Client-to-server calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientCall {
    /// Enter a meeting room under a participant identity.
    JoinMeeting {
        room: RoomId,
        participant: ParticipantId,
        display_name: String,
    },
    /// Leave a meeting room.
    LeaveMeeting {
        room: RoomId,
        participant: ParticipantId,
    },
    /// Relay an SDP offer to one named participant in the room.
    SendOffer {
        room: RoomId,
        target: ParticipantId,
        offer: Offer,
    },
    /// Relay an SDP answer to one named participant in the room.
    SendAnswer {
        room: RoomId,
        target: ParticipantId,
        answer: Answer,
    },
    /// Relay an ICE candidate to one named participant in the room.
    SendIceCandidate {
        room: RoomId,
        target: ParticipantId,
        candidate: IceCandidate,
    },
    /// Enter a whiteboard room under a participant identity.
    JoinWhiteboard {
        room: RoomId,
        participant: ParticipantId,
        display_name: String,
        color: String,
    },
    /// Broadcast one in-progress drawing operation to the room.
    Drawing { room: RoomId, seq: u64, op: DrawOp },
    /// Append a completed-canvas snapshot to the room history.
    CommitStroke { room: RoomId, snapshot: Snapshot },
    /// Blank the canvas for the whole room.
    ClearCanvas { room: RoomId },
    /// Step the room history cursor back.
    Undo { room: RoomId },
    /// Step the room history cursor forward.
    Redo { room: RoomId },
}

impl ClientCall {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (call, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(call)
    }

    /// Call name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinMeeting { .. } => "JoinMeeting",
            Self::LeaveMeeting { .. } => "LeaveMeeting",
            Self::SendOffer { .. } => "SendOffer",
            Self::SendAnswer { .. } => "SendAnswer",
            Self::SendIceCandidate { .. } => "SendIceCandidate",
            Self::JoinWhiteboard { .. } => "JoinWhiteboard",
            Self::Drawing { .. } => "Drawing",
            Self::CommitStroke { .. } => "CommitStroke",
            Self::ClearCanvas { .. } => "ClearCanvas",
            Self::Undo { .. } => "Undo",
            Self::Redo { .. } => "Redo",
        }
    }
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// A participant entered the meeting room.
    ParticipantJoined {
        participant: ParticipantId,
        display_name: String,
        conn: ConnectionId,
    },
    /// A participant left the meeting room.
    ParticipantLeft { participant: ParticipantId },
    /// Targeted SDP offer from another connection.
    ReceiveOffer { from_conn: ConnectionId, offer: Offer },
    /// Targeted SDP answer from another connection.
    ReceiveAnswer {
        from_conn: ConnectionId,
        answer: Answer,
    },
    /// Targeted ICE candidate from another connection.
    ReceiveIceCandidate {
        from_conn: ConnectionId,
        candidate: IceCandidate,
    },
    /// Current canvas state for a joining client. `None` means blank board.
    InitialState { snapshot: Option<Snapshot> },
    /// Full whiteboard roster after a membership change.
    UsersUpdate { users: Vec<BoardUser> },
    /// A drawing operation from another connection.
    Drawing {
        author_conn: ConnectionId,
        seq: u64,
        op: DrawOp,
    },
    /// Blank the canvas.
    ClearCanvas,
    /// Step back in local history.
    Undo,
    /// Step forward in local history.
    Redo,
}

/// Room-scoped envelope for every server push.
///
/// `room` is `None` only for events outside any room scope; all relay
/// traffic today is room-scoped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub room: Option<RoomId>,
    pub event: ServerEvent,
}

impl ServerMessage {
    /// Room-scoped event envelope.
    pub fn room(room: impl Into<RoomId>, event: ServerEvent) -> Self {
        Self {
            room: Some(room.into()),
            event,
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Serialize once for fan-out to many receivers.
    pub fn encode_shared(&self) -> Result<Arc<Vec<u8>>, ProtocolError> {
        self.encode().map(Arc::new)
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(msg)
    }
}

/// Signaling payload variants, unified so the relay path is written once.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalPayload {
    Offer(Offer),
    Answer(Answer),
    Ice(IceCandidate),
}

impl SignalPayload {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Offer(_) => SignalKind::Offer,
            Self::Answer(_) => SignalKind::Answer,
            Self::Ice(_) => SignalKind::IceCandidate,
        }
    }

    /// The event delivered to the target, stamped with the sender's
    /// connection id so the target can route its reply.
    pub fn into_event(self, from_conn: ConnectionId) -> ServerEvent {
        match self {
            Self::Offer(offer) => ServerEvent::ReceiveOffer { from_conn, offer },
            Self::Answer(answer) => ServerEvent::ReceiveAnswer { from_conn, answer },
            Self::Ice(candidate) => ServerEvent::ReceiveIceCandidate {
                from_conn,
                candidate,
            },
        }
    }
}

/// Signal flavor, used for logging and event reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
            Self::IceCandidate => write!(f, "ice candidate"),
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("connection closed")]
    Closed,
}
