//! Relay wire protocol.
//!
//! Every frame is one binary WebSocket message holding a bincode (standard
//! config, serde) encoding of [`RelayEvent`]. The first frame a member sends
//! must be [`RelayEvent::Join`]; everything after that is rebroadcast
//! verbatim to the other members of the room.
//!
//! ```text
//! member ──Join──► hub ──CursorMove*──► member      (cursor replay)
//! member ──event─► hub ──event────────► other members
//! member ──Ping──► hub ──Pong─────────► member      (never relayed)
//! ```

use gaggle_core::{IdeaNode, NodeId, ParticipantId, RoomId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cursor position broadcast by a member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CursorPayload {
    pub participant_id: ParticipantId,
    pub x: f32,
    pub y: f32,
    pub color: String,
}

/// Top-level relay event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RelayEvent {
    /// Handshake: enter `room_id` as `participant_id`.
    Join {
        room_id: RoomId,
        participant_id: ParticipantId,
    },
    CursorMove(CursorPayload),
    UserTyping {
        participant_id: ParticipantId,
        text: Option<String>,
    },
    UserStopTyping {
        participant_id: ParticipantId,
    },
    IdeaGenerationStart {
        participant_id: ParticipantId,
    },
    IdeaGenerationComplete {
        participant_id: ParticipantId,
    },
    IdeaGenerationError {
        participant_id: ParticipantId,
    },
    /// Newly committed nodes; receivers upsert each one.
    SyncIdeas {
        participant_id: ParticipantId,
        nodes: Vec<IdeaNode>,
        parent_id: Option<NodeId>,
    },
    /// Reserved. Relayed like any other event, ignored by replicas.
    SyncGraphState {
        participant_id: ParticipantId,
    },
    RemoveNode {
        participant_id: ParticipantId,
        node_id: NodeId,
    },
    /// Sent by the hub when a member disconnects.
    UserLeft {
        participant_id: ParticipantId,
    },
    Ping,
    Pong,
}

impl RelayEvent {
    pub fn join(room_id: impl Into<RoomId>, participant_id: impl Into<ParticipantId>) -> Self {
        Self::Join {
            room_id: room_id.into(),
            participant_id: participant_id.into(),
        }
    }

    pub fn cursor(
        participant_id: impl Into<ParticipantId>,
        x: f32,
        y: f32,
        color: impl Into<String>,
    ) -> Self {
        Self::CursorMove(CursorPayload {
            participant_id: participant_id.into(),
            x,
            y,
            color: color.into(),
        })
    }

    /// Originating participant; `None` for heartbeats.
    pub fn participant_id(&self) -> Option<&str> {
        match self {
            Self::Join { participant_id, .. }
            | Self::UserTyping { participant_id, .. }
            | Self::UserStopTyping { participant_id }
            | Self::IdeaGenerationStart { participant_id }
            | Self::IdeaGenerationComplete { participant_id }
            | Self::IdeaGenerationError { participant_id }
            | Self::SyncIdeas { participant_id, .. }
            | Self::SyncGraphState { participant_id }
            | Self::RemoveNode { participant_id, .. }
            | Self::UserLeft { participant_id } => Some(participant_id),
            Self::CursorMove(cursor) => Some(&cursor.participant_id),
            Self::Ping | Self::Pong => None,
        }
    }

    /// Event name as used on the relay contract.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join-board",
            Self::CursorMove(_) => "cursor-move",
            Self::UserTyping { .. } => "user-typing",
            Self::UserStopTyping { .. } => "user-stop-typing",
            Self::IdeaGenerationStart { .. } => "idea-generation-start",
            Self::IdeaGenerationComplete { .. } => "idea-generation-complete",
            Self::IdeaGenerationError { .. } => "idea-generation-error",
            Self::SyncIdeas { .. } => "sync-ideas",
            Self::SyncGraphState { .. } => "sync-graph-state",
            Self::RemoveNode { .. } => "remove-node",
            Self::UserLeft { .. } => "user-left",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (event, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(event)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),
}
