//! Bidirectional index of who owns which slot in which room.
//!
//! Forward direction answers "which connection speaks for participant P
//! in room R" (the targeted-signal path). Reverse direction answers
//! "which slots does connection C own" (the disconnect fan-out path).
//!
//! The two maps live behind independent locks and are never acquired
//! nested, so registration storms cannot deadlock against disconnects.

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::protocol::{ConnectionId, ParticipantId, RoomId};

/// A (room, participant) pair owned by a connection.
pub type SlotKey = (RoomId, ParticipantId);

/// Room/participant/connection index shared by a relay.
///
/// Registration is last-write-wins: a participant id re-registered from
/// a new connection silently takes the slot over. The prior owner's
/// reverse entry is left in place; its eventual disconnect fan-out is
/// idempotent for receivers, and [`unregister_connection`] only removes
/// forward mappings the departing connection still owns.
///
/// [`unregister_connection`]: ConnectionRegistry::unregister_connection
pub struct ConnectionRegistry {
    /// room -> participant -> owning connection
    rooms: RwLock<HashMap<RoomId, HashMap<ParticipantId, ConnectionId>>>,

    /// connection -> slots it registered, in registration order
    connections: RwLock<HashMap<ConnectionId, Vec<SlotKey>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register `conn` as the owner of (`room`, `participant`).
    ///
    /// Creates the room entry on first use. Re-registering a slot the
    /// same connection already owns is a no-op on the reverse index.
    pub async fn register(&self, room: &str, participant: &str, conn: ConnectionId) {
        {
            let mut rooms = self.rooms.write().await;
            rooms
                .entry(room.to_string())
                .or_default()
                .insert(participant.to_string(), conn);
        }

        let key = (room.to_string(), participant.to_string());
        let mut connections = self.connections.write().await;
        let slots = connections.entry(conn).or_default();
        if !slots.contains(&key) {
            slots.push(key);
        }
    }

    /// Resolve the connection currently owning (`room`, `participant`).
    pub async fn resolve(&self, room: &str, participant: &str) -> Option<ConnectionId> {
        let rooms = self.rooms.read().await;
        rooms.get(room).and_then(|members| members.get(participant)).copied()
    }

    /// Slots owned by `conn`, in registration order.
    pub async fn slots_of(&self, conn: ConnectionId) -> Vec<SlotKey> {
        let connections = self.connections.read().await;
        connections.get(&conn).cloned().unwrap_or_default()
    }

    /// Remove the (`room`, `participant`) mapping and the owner's
    /// matching reverse entry. Empty room entries are pruned.
    pub async fn unregister(&self, room: &str, participant: &str) {
        let owner = {
            let mut rooms = self.rooms.write().await;
            let Some(members) = rooms.get_mut(room) else {
                return;
            };
            let owner = members.remove(participant);
            if members.is_empty() {
                rooms.remove(room);
            }
            owner
        };

        if let Some(owner) = owner {
            let mut connections = self.connections.write().await;
            if let Some(slots) = connections.get_mut(&owner) {
                slots.retain(|(r, p)| r != room || p != participant);
            }
        }
    }

    /// Drop every slot registered by `conn` and return them for leave
    /// fan-out, in registration order.
    ///
    /// Forward mappings are removed only where `conn` is still the
    /// owner, so a slot taken over by a newer connection survives. The
    /// returned list is the reverse index verbatim and may include such
    /// taken-over slots; receivers treat the resulting leave events as
    /// idempotent.
    pub async fn unregister_connection(&self, conn: ConnectionId) -> Vec<SlotKey> {
        let slots = {
            let mut connections = self.connections.write().await;
            connections.remove(&conn).unwrap_or_default()
        };

        if !slots.is_empty() {
            let mut rooms = self.rooms.write().await;
            for (room, participant) in &slots {
                if let Some(members) = rooms.get_mut(room) {
                    if members.get(participant) == Some(&conn) {
                        members.remove(participant);
                    }
                    if members.is_empty() {
                        rooms.remove(room);
                    }
                }
            }
        }

        slots
    }

    /// Number of rooms with at least one registered participant.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Participant count per room, for the stats surface.
    pub async fn room_counts(&self) -> HashMap<RoomId, usize> {
        let rooms = self.rooms.read().await;
        rooms
            .iter()
            .map(|(room, members)| (room.clone(), members.len()))
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_register_resolve_roundtrip() {
        let registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();

        registry.register("standup", "alice", conn).await;

        assert_eq!(registry.resolve("standup", "alice").await, Some(conn));
        assert_eq!(registry.resolve("standup", "bob").await, None);
        assert_eq!(registry.resolve("other", "alice").await, None);
    }

    #[tokio::test]
    async fn test_last_write_wins_on_reregister() {
        let registry = ConnectionRegistry::new();
        let old_conn = Uuid::new_v4();
        let new_conn = Uuid::new_v4();

        registry.register("standup", "alice", old_conn).await;
        registry.register("standup", "alice", new_conn).await;

        assert_eq!(registry.resolve("standup", "alice").await, Some(new_conn));

        // The displaced owner keeps its reverse entry until it disconnects.
        let stale = registry.slots_of(old_conn).await;
        assert_eq!(stale, vec![("standup".to_string(), "alice".to_string())]);
    }

    #[tokio::test]
    async fn test_reregister_same_connection_no_duplicate() {
        let registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();

        registry.register("standup", "alice", conn).await;
        registry.register("standup", "alice", conn).await;

        assert_eq!(registry.slots_of(conn).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_clears_mapping_and_prunes_room() {
        let registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();

        registry.register("standup", "alice", conn).await;
        registry.unregister("standup", "alice").await;

        assert_eq!(registry.resolve("standup", "alice").await, None);
        assert_eq!(registry.room_count().await, 0);
        assert!(registry.slots_of(conn).await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_unknown_slot_is_noop() {
        let registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();

        registry.register("standup", "alice", conn).await;
        registry.unregister("standup", "ghost").await;
        registry.unregister("nowhere", "alice").await;

        assert_eq!(registry.resolve("standup", "alice").await, Some(conn));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_connection_removes_all_slots() {
        let registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();

        registry.register("standup", "alice", conn).await;
        registry.register("retro", "alice", conn).await;

        let removed = registry.unregister_connection(conn).await;

        assert_eq!(removed.len(), 2);
        assert_eq!(registry.resolve("standup", "alice").await, None);
        assert_eq!(registry.resolve("retro", "alice").await, None);
        assert!(registry.slots_of(conn).await.is_empty());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_connection_spares_taken_over_slot() {
        let registry = ConnectionRegistry::new();
        let old_conn = Uuid::new_v4();
        let new_conn = Uuid::new_v4();

        registry.register("standup", "alice", old_conn).await;
        registry.register("standup", "alice", new_conn).await;

        let removed = registry.unregister_connection(old_conn).await;

        // The stale slot is reported for fan-out but the live mapping stays.
        assert_eq!(removed.len(), 1);
        assert_eq!(registry.resolve("standup", "alice").await, Some(new_conn));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_slots_in_registration_order() {
        let registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();

        registry.register("alpha", "alice", conn).await;
        registry.register("beta", "alice", conn).await;
        registry.register("gamma", "alice", conn).await;

        let slots = registry.slots_of(conn).await;
        let rooms: Vec<&str> = slots.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(rooms, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_room_counts() {
        let registry = ConnectionRegistry::new();

        registry.register("standup", "alice", Uuid::new_v4()).await;
        registry.register("standup", "bob", Uuid::new_v4()).await;
        registry.register("retro", "carol", Uuid::new_v4()).await;

        let counts = registry.room_counts().await;
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.get("standup"), Some(&2));
        assert_eq!(counts.get("retro"), Some(&1));
    }
}
