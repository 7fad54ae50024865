//! Internal event stream feeding dashboards and activity logs.
//!
//! Relay components publish typed events onto a tokio broadcast
//! channel; observers subscribe explicitly through [`EventBus`]. The
//! relay never depends on a subscriber being present, and a lagging
//! subscriber loses old events instead of slowing the relay.

use tokio::sync::broadcast;

use crate::protocol::{ConnectionId, ParticipantId, RoomId, SignalKind};

/// Direction of a history cursor step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Back,
    Forward,
}

/// One observable relay occurrence.
///
/// These are advisory: every authoritative number comes from the stats
/// snapshot, events only tell observers that something changed.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    ConnectionOpened {
        conn: ConnectionId,
    },
    ConnectionClosed {
        conn: ConnectionId,
    },
    MeetingJoined {
        room: RoomId,
        participant: ParticipantId,
    },
    MeetingLeft {
        room: RoomId,
        participant: ParticipantId,
    },
    SignalRelayed {
        room: RoomId,
        kind: SignalKind,
        delivered: bool,
    },
    BoardJoined {
        room: RoomId,
        participant: ParticipantId,
    },
    DrawingRelayed {
        room: RoomId,
        receivers: usize,
    },
    StrokeCommitted {
        room: RoomId,
        author: ConnectionId,
        history_len: usize,
    },
    CanvasCleared {
        room: RoomId,
        author: ConnectionId,
    },
    HistoryStepped {
        room: RoomId,
        direction: StepDirection,
        cursor: usize,
    },
    StatsReset,
}

impl RelayEvent {
    /// Human-readable line for dashboards and activity feeds.
    pub fn describe(&self) -> String {
        match self {
            Self::ConnectionOpened { conn } => format!("connection {conn} opened"),
            Self::ConnectionClosed { conn } => format!("connection {conn} closed"),
            Self::MeetingJoined { room, participant } => {
                format!("{participant} joined meeting {room}")
            }
            Self::MeetingLeft { room, participant } => {
                format!("{participant} left meeting {room}")
            }
            Self::SignalRelayed {
                room,
                kind,
                delivered: true,
            } => format!("{kind} relayed in {room}"),
            Self::SignalRelayed {
                room,
                kind,
                delivered: false,
            } => format!("{kind} dropped in {room}, target unknown"),
            Self::BoardJoined { room, participant } => {
                format!("{participant} joined board {room}")
            }
            Self::DrawingRelayed { room, receivers } => {
                format!("drawing relayed to {receivers} clients in {room}")
            }
            Self::StrokeCommitted {
                room,
                author,
                history_len,
            } => format!("stroke committed in {room} by {author}, history {history_len}"),
            Self::CanvasCleared { room, author } => {
                format!("canvas cleared in {room} by {author}")
            }
            Self::HistoryStepped {
                room,
                direction: StepDirection::Back,
                cursor,
            } => format!("undo in {room}, cursor {cursor}"),
            Self::HistoryStepped {
                room,
                direction: StepDirection::Forward,
                cursor,
            } => format!("redo in {room}, cursor {cursor}"),
            Self::StatsReset => "stats reset".to_string(),
        }
    }
}

/// Broadcast bus carrying [`RelayEvent`]s to any number of observers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    /// `capacity` bounds how far a slow subscriber may fall behind
    /// before it starts losing events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. With no subscribers the event
    /// is discarded.
    pub fn publish(&self, event: RelayEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
