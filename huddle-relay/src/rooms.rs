//! Room membership and frame fan-out.
//!
//! Each connection owns one bounded outbound queue drained by its
//! writer task. Rooms hold cloned senders into those queues, so one
//! pre-encoded `Arc<Vec<u8>>` frame is shared across N receivers
//! without copying. Sends never block: a full queue drops the frame
//! for that receiver only and counts the drop.
//!
//! One connection can sit in several rooms at once (a meeting and a
//! whiteboard, several boards), which is why fan-out goes through
//! per-connection queues rather than one channel per room.
//!
//! Performance target: broadcast of one frame to 100 members < 100µs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::{BoardUser, ConnectionId, ParticipantId, RoomId};

/// Sending half of one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    conn: ConnectionId,
    tx: mpsc::Sender<Arc<Vec<u8>>>,
}

impl ClientHandle {
    pub fn new(conn: ConnectionId, tx: mpsc::Sender<Arc<Vec<u8>>>) -> Self {
        Self { conn, tx }
    }

    /// Handle plus the receiving half its writer task drains.
    pub fn channel(conn: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Arc<Vec<u8>>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { conn, tx }, rx)
    }

    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    /// Non-blocking enqueue. Returns false when the queue is full or
    /// the writer task is gone; the frame is dropped for this receiver.
    pub fn send(&self, frame: Arc<Vec<u8>>) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

/// One room member with presence metadata and its outbound handle.
#[derive(Debug, Clone)]
pub struct Member {
    pub participant: ParticipantId,
    pub display_name: String,
    /// Whiteboard cursor/stroke color; meeting members carry None.
    pub color: Option<String>,
    pub joined_at: Instant,
    handle: ClientHandle,
}

impl Member {
    pub fn new(
        handle: ClientHandle,
        participant: impl Into<ParticipantId>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            participant: participant.into(),
            display_name: display_name.into(),
            color: None,
            joined_at: Instant::now(),
            handle,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn conn(&self) -> ConnectionId {
        self.handle.conn()
    }

    /// Roster view pushed in whiteboard `UsersUpdate` events.
    pub fn board_user(&self) -> BoardUser {
        BoardUser {
            participant: self.participant.clone(),
            display_name: self.display_name.clone(),
            color: self.color.clone().unwrap_or_default(),
        }
    }

    fn send(&self, frame: Arc<Vec<u8>>) -> bool {
        self.handle.send(frame)
    }
}

/// Fan-out health counters for one room.
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub members: usize,
}

/// Member table and fan-out path for a single room.
///
/// Frame counters are atomics so broadcast never takes a write lock.
pub struct RoomChannel {
    members: RwLock<HashMap<ConnectionId, Member>>,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl RoomChannel {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub async fn add_member(&self, member: Member) {
        let mut members = self.members.write().await;
        members.insert(member.conn(), member);
    }

    pub async fn remove_member(&self, conn: ConnectionId) -> Option<Member> {
        let mut members = self.members.write().await;
        members.remove(&conn)
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn contains(&self, conn: ConnectionId) -> bool {
        self.members.read().await.contains_key(&conn)
    }

    /// Current members ordered by join time.
    pub async fn members(&self) -> Vec<Member> {
        let members = self.members.read().await;
        let mut list: Vec<Member> = members.values().cloned().collect();
        list.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.participant.cmp(&b.participant))
        });
        list
    }

    /// Fan a pre-encoded frame out to every member, optionally skipping
    /// one connection. Returns the number of queues reached.
    pub async fn broadcast(&self, frame: Arc<Vec<u8>>, exclude: Option<ConnectionId>) -> usize {
        let members = self.members.read().await;
        let mut reached = 0;
        for member in members.values() {
            if exclude == Some(member.conn()) {
                continue;
            }
            if member.send(frame.clone()) {
                reached += 1;
            } else {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.frames_sent.fetch_add(reached as u64, Ordering::Relaxed);
        reached
    }

    /// Deliver a frame to one member. False when the connection is not
    /// a member or its queue is full.
    pub async fn unicast(&self, conn: ConnectionId, frame: Arc<Vec<u8>>) -> bool {
        let members = self.members.read().await;
        let Some(member) = members.get(&conn) else {
            return false;
        };
        if member.send(frame) {
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub async fn stats(&self) -> ChannelStats {
        let members = self.members.read().await;
        ChannelStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            members: members.len(),
        }
    }
}

impl Default for RoomChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory of live rooms keyed by room id.
pub struct RoomDirectory {
    rooms: RwLock<HashMap<RoomId, Arc<RoomChannel>>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the channel for `room`.
    pub async fn get_or_create(&self, room: &str) -> Arc<RoomChannel> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(channel) = rooms.get(room) {
                return channel.clone();
            }
        }

        // Slow path: write lock to create
        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(channel) = rooms.get(room) {
            return channel.clone();
        }

        let channel = Arc::new(RoomChannel::new());
        rooms.insert(room.to_string(), channel.clone());
        channel
    }

    pub async fn get(&self, room: &str) -> Option<Arc<RoomChannel>> {
        self.rooms.read().await.get(room).cloned()
    }

    /// Remove a room once its last member is gone.
    pub async fn remove_if_empty(&self, room: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(channel) = rooms.get(room) {
            if channel.member_count().await == 0 {
                rooms.remove(room);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<RoomId> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new()
    }
}
