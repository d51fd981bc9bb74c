//! Rooms: membership, cursor cache and rebroadcast.
//!
//! The hub never looks inside node payloads. A room exists from its first
//! join until its last member leaves; a later join with the same id starts
//! from an empty room.

use std::collections::HashMap;
use std::sync::Arc;

use gaggle_core::{ParticipantId, RoomId};
use tokio::sync::RwLock;

use crate::broadcast::{BroadcastGroup, RoomReceiver};
use crate::presence::CursorEntry;
use crate::protocol::{ProtocolError, RelayEvent};

pub struct RoomState {
    /// Open connections per participant. A participant reconnecting under
    /// the same id holds two until the old socket is torn down.
    participants: HashMap<ParticipantId, usize>,
    cursors: HashMap<ParticipantId, CursorEntry>,
    group: Arc<BroadcastGroup>,
}

impl RoomState {
    fn new(capacity: usize) -> Self {
        Self {
            participants: HashMap::new(),
            cursors: HashMap::new(),
            group: Arc::new(BroadcastGroup::new(capacity)),
        }
    }
}

/// Read-only copy of a room for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    /// Sorted.
    pub participants: Vec<ParticipantId>,
    /// Sorted by participant.
    pub cursors: Vec<CursorEntry>,
}

/// Handed to a member on join.
pub struct Membership {
    pub room_id: RoomId,
    pub participant_id: ParticipantId,
    pub receiver: RoomReceiver,
    /// Cursor-move events for the other members' cached cursors.
    pub replay: Vec<RelayEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Last connection of the last participant; the room is gone.
    RoomDestroyed,
    /// Participant fully left; `remaining` participants were told.
    Left { remaining: usize },
    /// One of several connections under this id closed; nothing changed
    /// for the other members.
    ConnectionClosed { connections: usize },
    NotMember,
}

pub struct RelayHub {
    rooms: RwLock<HashMap<RoomId, RoomState>>,
    capacity: usize,
}

impl RelayHub {
    /// Empty hub. Each room it creates buffers `capacity` frames per member.
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Add one connection of `participant_id` to `room_id`, creating the
    /// room on first use.
    ///
    /// The returned membership carries a receiver for the other members'
    /// frames and a replay of their cached cursors.
    pub async fn join(&self, room_id: &str, participant_id: &str) -> Membership {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
            log::info!("Room {room_id} created");
            RoomState::new(self.capacity)
        });

        let connections = room
            .participants
            .entry(participant_id.to_string())
            .or_insert(0);
        *connections += 1;
        if *connections > 1 {
            log::debug!(
                "Participant {participant_id} re-joined room {room_id} ({connections} connections)"
            );
        }

        let mut cached: Vec<&CursorEntry> = room
            .cursors
            .values()
            .filter(|c| c.participant_id != participant_id)
            .collect();
        cached.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        let replay = cached.into_iter().map(CursorEntry::to_event).collect();

        Membership {
            room_id: room_id.to_string(),
            participant_id: participant_id.to_string(),
            receiver: room.group.subscribe(participant_id),
            replay,
        }
    }

    /// Encode `event` and rebroadcast it to the other members.
    pub async fn publish(
        &self,
        room_id: &str,
        from: &str,
        event: &RelayEvent,
    ) -> Result<usize, ProtocolError> {
        let frame = event.encode()?;
        Ok(self.relay(room_id, from, event, frame).await)
    }

    /// Rebroadcast an already-encoded `frame` of `event` verbatim.
    ///
    /// Cursor moves also refresh the sender's cached cursor. Returns the
    /// number of receivers, zero when the room does not exist.
    pub async fn relay(&self, room_id: &str, from: &str, event: &RelayEvent, frame: Vec<u8>) -> usize {
        let group = {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get_mut(room_id) else {
                log::debug!("Dropping {} for unknown room {room_id}", event.name());
                return 0;
            };
            if let RelayEvent::CursorMove(payload) = event {
                room.cursors
                    .insert(from.to_string(), CursorEntry::from_payload(from, payload));
            }
            room.group.clone()
        };
        group.send(from, frame)
    }

    /// Drop one connection of a member.
    ///
    /// Only the member's last connection removes it: its cursor is dropped
    /// and the rest are told with `UserLeft`, or the room is destroyed when
    /// nobody is left.
    pub async fn leave(&self, room_id: &str, participant_id: &str) -> LeaveOutcome {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return LeaveOutcome::NotMember;
        };
        let Some(connections) = room.participants.get_mut(participant_id) else {
            return LeaveOutcome::NotMember;
        };
        *connections -= 1;
        if *connections > 0 {
            return LeaveOutcome::ConnectionClosed {
                connections: *connections,
            };
        }
        room.participants.remove(participant_id);
        room.cursors.remove(participant_id);

        if room.participants.is_empty() {
            rooms.remove(room_id);
            log::info!("Room {room_id} removed (empty)");
            return LeaveOutcome::RoomDestroyed;
        }

        let left = RelayEvent::UserLeft {
            participant_id: participant_id.to_string(),
        };
        if let Err(e) = room.group.send_event(participant_id, &left) {
            log::error!("Failed to announce departure of {participant_id}: {e}");
        }
        LeaveOutcome::Left {
            remaining: room.participants.len(),
        }
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Whether `room_id` currently has at least one member.
    pub async fn has_room(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    pub async fn room_snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let rooms = self.rooms.read().await;
        let room = rooms.get(room_id)?;

        let mut participants: Vec<_> = room.participants.keys().cloned().collect();
        participants.sort();
        let mut cursors: Vec<_> = room.cursors.values().cloned().collect();
        cursors.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        Some(RoomSnapshot {
            participants,
            cursors,
        })
    }
}
