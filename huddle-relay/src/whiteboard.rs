//! Whiteboard relay: live drawing fan-out plus snapshot history.
//!
//! Live strokes are relayed immediately and never stored. What the
//! server keeps per board is a bounded FIFO of whole-canvas snapshots,
//! one committed after each completed stroke, plus an undo/redo cursor
//! into that history. A late joiner receives the snapshot under the
//! cursor and replays nothing else.
//!
//! Undo and redo are relayed as directives; each client steps its own
//! local history. The server cursor is authoritative only for late
//! joiners, so clients that commit concurrently with an undo can see
//! a different canvas until the next commit realigns everyone.
//!
//! Boards are kept while idle: membership can drop to zero and return
//! later to the same history.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{Mutex, RwLock};

use crate::events::{EventBus, RelayEvent, StepDirection};
use crate::protocol::{
    valid_id, BoardUser, ConnectionId, DrawOp, RoomId, ServerEvent, ServerMessage, Snapshot,
};
use crate::registry::ConnectionRegistry;
use crate::rooms::{ClientHandle, Member, RoomChannel};
use crate::usage::UsageTracker;

/// Snapshots retained per board.
pub const HISTORY_CAP: usize = 50;

/// One committed canvas state.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub snapshot: Snapshot,
    /// Strictly increasing per board. Survives FIFO eviction, so two
    /// entries never share an order even after old ones age out.
    pub order: u64,
}

/// Bounded snapshot FIFO with an undo/redo cursor.
///
/// The cursor always lies within `[0, len - 1]` while entries exist.
/// Undo and redo clamp at the ends. Append moves the cursor to the new
/// tail; entries above a rewound cursor are not truncated.
#[derive(Debug)]
pub struct SnapshotHistory {
    entries: VecDeque<HistoryEntry>,
    cursor: usize,
    next_order: u64,
    cap: usize,
}

impl SnapshotHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap.min(64)),
            cursor: 0,
            next_order: 0,
            cap: cap.max(1),
        }
    }

    /// Append a snapshot, evicting the oldest entry once over
    /// capacity. Returns the order stamped onto the new entry.
    pub fn append(&mut self, snapshot: Snapshot) -> u64 {
        let order = self.next_order;
        self.next_order += 1;

        self.entries.push_back(HistoryEntry { snapshot, order });
        if self.entries.len() > self.cap {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len() - 1;
        order
    }

    /// Step the cursor back. `None` when the history is empty.
    pub fn undo(&mut self) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        self.cursor = self.cursor.saturating_sub(1);
        Some(self.cursor)
    }

    /// Step the cursor forward. `None` when the history is empty.
    pub fn redo(&mut self) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1).min(self.entries.len() - 1);
        Some(self.cursor)
    }

    /// Entry under the cursor.
    pub fn current(&self) -> Option<&HistoryEntry> {
        self.entries.get(self.cursor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

/// One board: member channel plus its history.
struct BoardRoom {
    channel: RoomChannel,
    history: Mutex<SnapshotHistory>,
}

impl BoardRoom {
    fn new(history_cap: usize) -> Self {
        Self {
            channel: RoomChannel::new(),
            history: Mutex::new(SnapshotHistory::new(history_cap)),
        }
    }
}

/// Drawing relay and snapshot store for whiteboard rooms.
///
/// Holds its own [`ConnectionRegistry`], separate from the signaling
/// relay's, so board names never collide with meeting names.
pub struct WhiteboardRelay {
    registry: ConnectionRegistry,
    rooms: RwLock<HashMap<RoomId, Arc<BoardRoom>>>,
    history_cap: usize,
    usage: Arc<UsageTracker>,
    bus: EventBus,
}

impl WhiteboardRelay {
    pub fn new(history_cap: usize, usage: Arc<UsageTracker>, bus: EventBus) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            rooms: RwLock::new(HashMap::new()),
            history_cap,
            usage,
            bus,
        }
    }

    async fn board(&self, room: &str) -> Option<Arc<BoardRoom>> {
        self.rooms.read().await.get(room).cloned()
    }

    async fn board_or_create(&self, room: &str) -> Arc<BoardRoom> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(board) = rooms.get(room) {
                return board.clone();
            }
        }

        // Slow path: write lock to create
        let mut rooms = self.rooms.write().await;
        if let Some(board) = rooms.get(room) {
            return board.clone();
        }

        let board = Arc::new(BoardRoom::new(self.history_cap));
        rooms.insert(room.to_string(), board.clone());
        board
    }

    /// Enter a board. The joiner is sent `InitialState` first, then
    /// the whole room (joiner included) receives the new roster.
    pub async fn join_whiteboard(
        &self,
        room: &str,
        participant: &str,
        display_name: &str,
        color: &str,
        handle: ClientHandle,
    ) {
        if !valid_id(room) || !valid_id(participant) {
            warn!("join_whiteboard dropped: invalid id");
            return;
        }
        self.usage.record_message();

        let board = self.board_or_create(room).await;
        board
            .channel
            .add_member(
                Member::new(handle.clone(), participant, display_name).with_color(color),
            )
            .await;
        self.registry.register(room, participant, handle.conn()).await;

        // Catch the joiner up before any roster traffic arrives.
        let snapshot = {
            let history = board.history.lock().await;
            history.current().map(|entry| entry.snapshot.clone())
        };
        let initial = ServerMessage::room(room, ServerEvent::InitialState { snapshot });
        match initial.encode_shared() {
            Ok(frame) => {
                handle.send(frame);
            }
            Err(e) => warn!("initial state encode failed: {e}"),
        }

        Self::broadcast_roster(&board, room).await;

        debug!("{participant} joined board {room}");
        self.bus.publish(RelayEvent::BoardJoined {
            room: room.to_string(),
            participant: participant.to_string(),
        });
    }

    /// Relay one drawing operation to everyone in the room except the
    /// author. Nothing is stored.
    pub async fn draw(&self, room: &str, seq: u64, op: DrawOp, author: ConnectionId) {
        if !valid_id(room) {
            return;
        }
        self.usage.record_message();

        let Some(board) = self.board(room).await else {
            return;
        };

        let msg = ServerMessage::room(
            room,
            ServerEvent::Drawing {
                author_conn: author,
                seq,
                op,
            },
        );
        match msg.encode_shared() {
            Ok(frame) => {
                let receivers = board.channel.broadcast(frame, Some(author)).await;
                self.bus.publish(RelayEvent::DrawingRelayed {
                    room: room.to_string(),
                    receivers,
                });
            }
            Err(e) => warn!("drawing encode failed: {e}"),
        }
    }

    /// Append a completed-canvas snapshot to the board history. No
    /// broadcast: the room already saw the stroke via `draw`.
    pub async fn commit_stroke(&self, room: &str, snapshot: Snapshot, author: ConnectionId) {
        if !valid_id(room) {
            return;
        }
        self.usage.record_message();

        let Some(board) = self.board(room).await else {
            return;
        };

        let history_len = {
            let mut history = board.history.lock().await;
            history.append(snapshot);
            history.len()
        };
        self.bus.publish(RelayEvent::StrokeCommitted {
            room: room.to_string(),
            author,
            history_len,
        });
    }

    /// Blank the board: a blank-canvas entry joins the history and the
    /// whole room, caller included, is told to clear.
    pub async fn clear_canvas(&self, room: &str, author: ConnectionId) {
        if !valid_id(room) {
            return;
        }
        self.usage.record_message();

        let Some(board) = self.board(room).await else {
            return;
        };

        {
            let mut history = board.history.lock().await;
            history.append(Snapshot::new());
        }

        let msg = ServerMessage::room(room, ServerEvent::ClearCanvas);
        match msg.encode_shared() {
            Ok(frame) => {
                board.channel.broadcast(frame, None).await;
            }
            Err(e) => warn!("clear encode failed: {e}"),
        }
        self.bus.publish(RelayEvent::CanvasCleared {
            room: room.to_string(),
            author,
        });
    }

    /// Step the board history back and tell every member to do the
    /// same. A board with no history ignores the call.
    pub async fn undo(&self, room: &str) {
        self.step_history(room, StepDirection::Back).await;
    }

    /// Step the board history forward and tell every member to do the
    /// same. A board with no history ignores the call.
    pub async fn redo(&self, room: &str) {
        self.step_history(room, StepDirection::Forward).await;
    }

    async fn step_history(&self, room: &str, direction: StepDirection) {
        if !valid_id(room) {
            return;
        }
        self.usage.record_message();

        let Some(board) = self.board(room).await else {
            return;
        };

        let cursor = {
            let mut history = board.history.lock().await;
            match direction {
                StepDirection::Back => history.undo(),
                StepDirection::Forward => history.redo(),
            }
        };
        let Some(cursor) = cursor else {
            return;
        };

        let event = match direction {
            StepDirection::Back => ServerEvent::Undo,
            StepDirection::Forward => ServerEvent::Redo,
        };
        let msg = ServerMessage::room(room, event);
        match msg.encode_shared() {
            Ok(frame) => {
                board.channel.broadcast(frame, None).await;
            }
            Err(e) => warn!("history step encode failed: {e}"),
        }
        self.bus.publish(RelayEvent::HistoryStepped {
            room: room.to_string(),
            direction,
            cursor,
        });
    }

    /// Remove `conn` from every board it joined and push fresh rosters.
    /// Boards stay alive with their history even when emptied.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let slots = self.registry.unregister_connection(conn).await;
        for (room, participant) in slots {
            let Some(board) = self.board(&room).await else {
                continue;
            };
            if board.channel.remove_member(conn).await.is_some() {
                Self::broadcast_roster(&board, &room).await;
                debug!("{participant} left board {room}");
            }
        }
    }

    async fn broadcast_roster(board: &Arc<BoardRoom>, room: &str) {
        let users: Vec<BoardUser> = board
            .channel
            .members()
            .await
            .iter()
            .map(Member::board_user)
            .collect();
        let msg = ServerMessage::room(room, ServerEvent::UsersUpdate { users });
        match msg.encode_shared() {
            Ok(frame) => {
                board.channel.broadcast(frame, None).await;
            }
            Err(e) => warn!("roster encode failed: {e}"),
        }
    }

    /// Boards currently held, idle ones included.
    pub async fn board_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// History length for a board, zero when the board is unknown.
    pub async fn history_len(&self, room: &str) -> usize {
        match self.board(room).await {
            Some(board) => board.history.lock().await.len(),
            None => 0,
        }
    }

    /// History cursor for a board with at least one entry.
    pub async fn history_cursor(&self, room: &str) -> Option<usize> {
        let board = self.board(room).await?;
        let history = board.history.lock().await;
        if history.is_empty() {
            None
        } else {
            Some(history.cursor())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[test]
    fn test_history_append_and_cursor() {
        let mut history = SnapshotHistory::new(10);
        assert!(history.is_empty());
        assert!(history.current().is_none());

        assert_eq!(history.append(vec![1]), 0);
        assert_eq!(history.append(vec![2]), 1);
        assert_eq!(history.append(vec![3]), 2);

        assert_eq!(history.len(), 3);
        assert_eq!(history.cursor(), 2);
        assert_eq!(history.current().unwrap().snapshot, vec![3]);
    }

    #[test]
    fn test_history_eviction_keeps_orders_increasing() {
        let mut history = SnapshotHistory::new(3);
        for i in 0..5u8 {
            history.append(vec![i]);
        }

        assert_eq!(history.len(), 3);
        // Oldest two evicted; orders keep counting rather than resetting.
        assert_eq!(history.current().unwrap().order, 4);
        history.undo();
        assert_eq!(history.current().unwrap().order, 3);
        history.undo();
        assert_eq!(history.current().unwrap().order, 2);
        assert_eq!(history.cursor(), 0);
    }

    #[test]
    fn test_history_undo_redo_clamps() {
        let mut history = SnapshotHistory::new(10);
        for i in 0..3u8 {
            history.append(vec![i]);
        }

        assert_eq!(history.undo(), Some(1));
        assert_eq!(history.undo(), Some(0));
        assert_eq!(history.undo(), Some(0));

        assert_eq!(history.redo(), Some(1));
        assert_eq!(history.redo(), Some(2));
        assert_eq!(history.redo(), Some(2));
    }

    #[test]
    fn test_undo_then_redo_returns_to_same_entry() {
        let mut history = SnapshotHistory::new(10);
        for i in 0..4u8 {
            history.append(vec![i]);
        }
        let before = history.current().unwrap().order;

        history.undo();
        history.redo();

        assert_eq!(history.current().unwrap().order, before);
    }

    #[test]
    fn test_append_after_undo_moves_cursor_to_tail() {
        let mut history = SnapshotHistory::new(10);
        history.append(vec![1]);
        history.append(vec![2]);
        history.undo();
        assert_eq!(history.cursor(), 0);

        history.append(vec![3]);

        assert_eq!(history.cursor(), history.len() - 1);
        assert_eq!(history.current().unwrap().snapshot, vec![3]);
    }

    #[test]
    fn test_empty_history_steps_return_none() {
        let mut history = SnapshotHistory::new(10);
        assert_eq!(history.undo(), None);
        assert_eq!(history.redo(), None);
    }

    fn relay() -> (WhiteboardRelay, Arc<UsageTracker>) {
        let usage = Arc::new(UsageTracker::new());
        let bus = EventBus::new(64);
        (WhiteboardRelay::new(HISTORY_CAP, usage.clone(), bus), usage)
    }

    fn client() -> (ClientHandle, mpsc::Receiver<Arc<Vec<u8>>>) {
        ClientHandle::channel(Uuid::new_v4(), 32)
    }

    async fn next_event(rx: &mut mpsc::Receiver<Arc<Vec<u8>>>) -> ServerEvent {
        let frame = rx.recv().await.expect("frame");
        ServerMessage::decode(&frame).expect("decode").event
    }

    #[tokio::test]
    async fn test_join_blank_board() {
        let (relay, _) = relay();
        let (alice, mut alice_rx) = client();

        relay
            .join_whiteboard("board", "alice", "Alice", "#e91e63", alice)
            .await;

        match next_event(&mut alice_rx).await {
            ServerEvent::InitialState { snapshot } => assert!(snapshot.is_none()),
            other => panic!("unexpected event: {other:?}"),
        }
        match next_event(&mut alice_rx).await {
            ServerEvent::UsersUpdate { users } => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].participant, "alice");
                assert_eq!(users[0].color, "#e91e63");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_late_joiner_receives_current_snapshot() {
        let (relay, _) = relay();
        let (alice, mut alice_rx) = client();
        let (bob, mut bob_rx) = client();
        let alice_conn = alice.conn();

        relay
            .join_whiteboard("board", "alice", "Alice", "#e91e63", alice)
            .await;
        let _ = next_event(&mut alice_rx).await;
        let _ = next_event(&mut alice_rx).await;

        relay.commit_stroke("board", vec![1, 2, 3], alice_conn).await;

        relay
            .join_whiteboard("board", "bob", "Bob", "#3f51b5", bob)
            .await;

        match next_event(&mut bob_rx).await {
            ServerEvent::InitialState { snapshot } => {
                assert_eq!(snapshot, Some(vec![1, 2, 3]))
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match next_event(&mut bob_rx).await {
            ServerEvent::UsersUpdate { users } => assert_eq!(users.len(), 2),
            other => panic!("unexpected event: {other:?}"),
        }
        // Alice receives the refreshed roster too.
        match next_event(&mut alice_rx).await {
            ServerEvent::UsersUpdate { users } => assert_eq!(users.len(), 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drawing_excludes_author() {
        let (relay, _) = relay();
        let (alice, mut alice_rx) = client();
        let (bob, mut bob_rx) = client();
        let alice_conn = alice.conn();

        relay
            .join_whiteboard("board", "alice", "Alice", "#e91e63", alice)
            .await;
        relay
            .join_whiteboard("board", "bob", "Bob", "#3f51b5", bob)
            .await;
        let _ = next_event(&mut alice_rx).await;
        let _ = next_event(&mut alice_rx).await;
        let _ = next_event(&mut alice_rx).await;
        let _ = next_event(&mut bob_rx).await;
        let _ = next_event(&mut bob_rx).await;

        let op = DrawOp::FreehandSegment {
            from: crate::protocol::Point::new(0.0, 0.0),
            to: crate::protocol::Point::new(1.0, 1.0),
            color: "#000000".into(),
            width: 2.0,
        };
        relay.draw("board", 7, op.clone(), alice_conn).await;

        match next_event(&mut bob_rx).await {
            ServerEvent::Drawing {
                author_conn,
                seq,
                op: received,
            } => {
                assert_eq!(author_conn, alice_conn);
                assert_eq!(seq, 7);
                assert_eq!(received, op);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_clear_blanks_history_and_reaches_everyone() {
        let (relay, _) = relay();
        let (alice, mut alice_rx) = client();
        let (bob, mut bob_rx) = client();
        let alice_conn = alice.conn();

        relay
            .join_whiteboard("board", "alice", "Alice", "#e91e63", alice)
            .await;
        relay
            .join_whiteboard("board", "bob", "Bob", "#3f51b5", bob)
            .await;
        relay.commit_stroke("board", vec![9, 9], alice_conn).await;
        let _ = next_event(&mut alice_rx).await;
        let _ = next_event(&mut alice_rx).await;
        let _ = next_event(&mut alice_rx).await;
        let _ = next_event(&mut bob_rx).await;
        let _ = next_event(&mut bob_rx).await;

        relay.clear_canvas("board", alice_conn).await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            match next_event(rx).await {
                ServerEvent::ClearCanvas => {}
                other => panic!("unexpected event: {other:?}"),
            }
        }

        // A joiner after the clear sees the blank-canvas entry.
        let (carol, mut carol_rx) = client();
        relay
            .join_whiteboard("board", "carol", "Carol", "#4caf50", carol)
            .await;
        match next_event(&mut carol_rx).await {
            ServerEvent::InitialState { snapshot } => {
                assert_eq!(snapshot, Some(Vec::new()))
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(relay.history_len("board").await, 2);
    }

    #[tokio::test]
    async fn test_commit_and_clear_events_name_the_author() {
        let usage = Arc::new(UsageTracker::new());
        let bus = EventBus::new(64);
        let relay = WhiteboardRelay::new(HISTORY_CAP, usage, bus.clone());
        let mut events = bus.subscribe();

        let (alice, _alice_rx) = client();
        let alice_conn = alice.conn();
        relay
            .join_whiteboard("board", "alice", "Alice", "#e91e63", alice)
            .await;
        match events.recv().await.unwrap() {
            RelayEvent::BoardJoined { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }

        relay.commit_stroke("board", vec![1], alice_conn).await;
        match events.recv().await.unwrap() {
            RelayEvent::StrokeCommitted { author, history_len, .. } => {
                assert_eq!(author, alice_conn);
                assert_eq!(history_len, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        relay.clear_canvas("board", alice_conn).await;
        match events.recv().await.unwrap() {
            RelayEvent::CanvasCleared { room, author } => {
                assert_eq!(room, "board");
                assert_eq!(author, alice_conn);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undo_redo_broadcast_directives() {
        let (relay, _) = relay();
        let (alice, mut alice_rx) = client();
        let alice_conn = alice.conn();

        relay
            .join_whiteboard("board", "alice", "Alice", "#e91e63", alice)
            .await;
        let _ = next_event(&mut alice_rx).await;
        let _ = next_event(&mut alice_rx).await;

        relay.commit_stroke("board", vec![1], alice_conn).await;
        relay.commit_stroke("board", vec![2], alice_conn).await;

        relay.undo("board").await;
        assert_eq!(relay.history_cursor("board").await, Some(0));
        match next_event(&mut alice_rx).await {
            ServerEvent::Undo => {}
            other => panic!("unexpected event: {other:?}"),
        }

        relay.redo("board").await;
        assert_eq!(relay.history_cursor("board").await, Some(1));
        match next_event(&mut alice_rx).await {
            ServerEvent::Redo => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undo_on_empty_board_sends_nothing() {
        let (relay, _) = relay();
        let (alice, mut alice_rx) = client();

        relay
            .join_whiteboard("board", "alice", "Alice", "#e91e63", alice)
            .await;
        let _ = next_event(&mut alice_rx).await;
        let _ = next_event(&mut alice_rx).await;

        relay.undo("board").await;
        relay.redo("board").await;

        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_updates_roster_and_keeps_board() {
        let (relay, _) = relay();
        let (alice, mut alice_rx) = client();
        let (bob, mut bob_rx) = client();
        let alice_conn = alice.conn();

        relay
            .join_whiteboard("board", "alice", "Alice", "#e91e63", alice)
            .await;
        relay
            .join_whiteboard("board", "bob", "Bob", "#3f51b5", bob)
            .await;
        relay.commit_stroke("board", vec![5], alice_conn).await;
        let _ = next_event(&mut alice_rx).await;
        let _ = next_event(&mut alice_rx).await;
        let _ = next_event(&mut alice_rx).await;
        let _ = next_event(&mut bob_rx).await;
        let _ = next_event(&mut bob_rx).await;

        relay.disconnect(alice_conn).await;

        match next_event(&mut bob_rx).await {
            ServerEvent::UsersUpdate { users } => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].participant, "bob");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // The board and its history outlive the membership change.
        assert_eq!(relay.board_count().await, 1);
        assert_eq!(relay.history_len("board").await, 1);
    }

    #[tokio::test]
    async fn test_calls_on_unknown_board_are_noops() {
        let (relay, usage) = relay();
        let conn = Uuid::new_v4();

        relay.commit_stroke("nowhere", vec![1], conn).await;
        relay.clear_canvas("nowhere", conn).await;
        relay.undo("nowhere").await;

        // Valid ids still count as relay traffic even when dropped.
        assert_eq!(usage.total(), 3);
        assert_eq!(relay.board_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_room_is_whole_call_noop() {
        let (relay, usage) = relay();
        let (alice, mut alice_rx) = client();

        relay
            .join_whiteboard("bad\nboard", "alice", "Alice", "#fff", alice)
            .await;
        relay.commit_stroke("", vec![1], Uuid::new_v4()).await;

        assert_eq!(usage.total(), 0);
        assert_eq!(relay.board_count().await, 0);
        assert!(alice_rx.try_recv().is_err());
    }
}
