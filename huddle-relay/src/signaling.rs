//! WebRTC signaling relay for meeting rooms.
//!
//! The relay never parses SDP or ICE payloads. It tracks who is in
//! which meeting, fans presence changes out to the room, and forwards
//! offer/answer/candidate payloads to exactly one named target
//! participant. A signal whose target cannot be resolved is dropped
//! silently; endpoints renegotiate on their own and a lost candidate
//! is routine.
//!
//! Meetings keep no history, so an emptied meeting room is reaped
//! immediately.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::events::{EventBus, RelayEvent};
use crate::protocol::{
    valid_id, ConnectionId, RoomId, ServerEvent, ServerMessage, SignalPayload,
};
use crate::registry::ConnectionRegistry;
use crate::rooms::{ClientHandle, Member, RoomChannel, RoomDirectory};
use crate::usage::UsageTracker;

/// Meeting-room presence and signal forwarding.
///
/// Holds its own [`ConnectionRegistry`], so meeting room ids never
/// collide with whiteboard room ids even when clients reuse names.
pub struct SignalingRelay {
    registry: ConnectionRegistry,
    rooms: RoomDirectory,
    usage: Arc<UsageTracker>,
    bus: EventBus,
}

impl SignalingRelay {
    pub fn new(usage: Arc<UsageTracker>, bus: EventBus) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            rooms: RoomDirectory::new(),
            usage,
            bus,
        }
    }

    /// Enter `room` as `participant`.
    ///
    /// The rest of the room hears one `ParticipantJoined`. The joiner
    /// instead receives a roster replay, one `ParticipantJoined` per
    /// current member in join order, its own slot included, so a late
    /// joiner can build the full peer list without a separate call.
    pub async fn join_meeting(
        &self,
        room: &str,
        participant: &str,
        display_name: &str,
        handle: ClientHandle,
    ) {
        if !valid_id(room) || !valid_id(participant) {
            warn!("join_meeting dropped: invalid id");
            return;
        }
        self.usage.record_message();

        let conn = handle.conn();
        let channel = self.rooms.get_or_create(room).await;
        channel
            .add_member(Member::new(handle.clone(), participant, display_name))
            .await;
        self.registry.register(room, participant, conn).await;

        let joined = ServerMessage::room(
            room,
            ServerEvent::ParticipantJoined {
                participant: participant.to_string(),
                display_name: display_name.to_string(),
                conn,
            },
        );
        match joined.encode_shared() {
            Ok(frame) => {
                channel.broadcast(frame, Some(conn)).await;
            }
            Err(e) => warn!("join broadcast encode failed: {e}"),
        }

        for member in channel.members().await {
            let echo = ServerMessage::room(
                room,
                ServerEvent::ParticipantJoined {
                    participant: member.participant.clone(),
                    display_name: member.display_name.clone(),
                    conn: member.conn(),
                },
            );
            match echo.encode_shared() {
                Ok(frame) => {
                    handle.send(frame);
                }
                Err(e) => warn!("roster replay encode failed: {e}"),
            }
        }

        debug!("{participant} joined meeting {room} on {conn}");
        self.bus.publish(RelayEvent::MeetingJoined {
            room: room.to_string(),
            participant: participant.to_string(),
        });
    }

    /// Leave `room`. The departure is broadcast to the remaining
    /// members and the room is reaped once empty.
    pub async fn leave_meeting(&self, room: &str, participant: &str, conn: ConnectionId) {
        if !valid_id(room) || !valid_id(participant) {
            return;
        }
        self.usage.record_message();

        let Some(channel) = self.rooms.get(room).await else {
            return;
        };
        channel.remove_member(conn).await;
        self.registry.unregister(room, participant).await;
        Self::broadcast_left(&channel, room, participant).await;
        self.rooms.remove_if_empty(room).await;

        debug!("{participant} left meeting {room}");
        self.bus.publish(RelayEvent::MeetingLeft {
            room: room.to_string(),
            participant: participant.to_string(),
        });
    }

    /// Forward a signaling payload to the connection currently owning
    /// `target` in `room`.
    pub async fn relay_signal(
        &self,
        room: &str,
        target: &str,
        payload: SignalPayload,
        from: ConnectionId,
    ) {
        if !valid_id(room) || !valid_id(target) {
            return;
        }
        self.usage.record_message();

        let kind = payload.kind();
        let delivered = self.deliver_signal(room, target, payload, from).await;
        if !delivered {
            debug!("{kind} for {target} in {room} dropped");
        }
        self.bus.publish(RelayEvent::SignalRelayed {
            room: room.to_string(),
            kind,
            delivered,
        });
    }

    async fn deliver_signal(
        &self,
        room: &str,
        target: &str,
        payload: SignalPayload,
        from: ConnectionId,
    ) -> bool {
        let Some(target_conn) = self.registry.resolve(room, target).await else {
            return false;
        };
        let Some(channel) = self.rooms.get(room).await else {
            return false;
        };

        let msg = ServerMessage::room(room, payload.into_event(from));
        match msg.encode_shared() {
            Ok(frame) => channel.unicast(target_conn, frame).await,
            Err(e) => {
                warn!("signal encode failed: {e}");
                false
            }
        }
    }

    /// Tear down every meeting slot `conn` owns, broadcasting one
    /// `ParticipantLeft` per affected room.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let slots = self.registry.unregister_connection(conn).await;
        for (room, participant) in slots {
            let Some(channel) = self.rooms.get(&room).await else {
                continue;
            };
            channel.remove_member(conn).await;
            Self::broadcast_left(&channel, &room, &participant).await;
            self.rooms.remove_if_empty(&room).await;
            self.bus.publish(RelayEvent::MeetingLeft { room, participant });
        }
    }

    async fn broadcast_left(channel: &Arc<RoomChannel>, room: &str, participant: &str) {
        let msg = ServerMessage::room(
            room,
            ServerEvent::ParticipantLeft {
                participant: participant.to_string(),
            },
        );
        match msg.encode_shared() {
            Ok(frame) => {
                channel.broadcast(frame, None).await;
            }
            Err(e) => warn!("leave broadcast encode failed: {e}"),
        }
    }

    /// Number of meetings with at least one registered participant.
    pub async fn active_meetings(&self) -> usize {
        self.registry.room_count().await
    }

    /// Participant count per meeting.
    pub async fn meeting_counts(&self) -> HashMap<RoomId, usize> {
        self.registry.room_counts().await
    }
}
