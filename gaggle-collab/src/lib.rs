//! # gaggle-collab — Real-time replication of the idea graph
//!
//! A stateless WebSocket relay rebroadcasts events between the members of a
//! room; every participant keeps its own [`Replica`] of the graph and
//! converges by applying the events it receives.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ RelayClient │ ◄─────────────────► │ RelayServer │
//! │ (per user)  │     Binary Proto    │ (stateless) │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ Replica     │                     │ RelayHub    │
//! │ (NodeStore) │                     │ rooms       │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                    ┌───────┴───────┐
//!                                    │ BroadcastGroup│
//!                                    │ (fan-out)     │
//!                                    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded RelayEvent)
//! - [`broadcast`] — Per-room fan-out excluding the sender
//! - [`hub`] — Room membership and cursor cache
//! - [`server`] — WebSocket relay server
//! - [`client`] — WebSocket relay client
//! - [`presence`] — Cursors, typing and generation indicators
//! - [`replica`] — Local graph with optimistic placeholders
//! - [`merge`] — Merging committed nodes

pub mod broadcast;
pub mod client;
pub mod hub;
pub mod merge;
pub mod presence;
pub mod protocol;
pub mod replica;
pub mod server;

pub use broadcast::{BroadcastGroup, BroadcastStats, RoomReceiver};
pub use client::{ClientEvent, ConnectionState, RelayClient};
pub use hub::{LeaveOutcome, Membership, RelayHub, RoomSnapshot};
pub use merge::MergeRequest;
pub use presence::{CursorEntry, PresenceView};
pub use protocol::{CursorPayload, ProtocolError, RelayEvent};
pub use replica::{DraftKind, NodePhase, Outbox, Replica, ReplicaError};
pub use server::{RelayServer, ServerConfig, ServerStats};
