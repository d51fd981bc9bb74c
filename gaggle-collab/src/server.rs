//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── RelayHub ── Room (room_id) ── BroadcastGroup
//! Client B ──┘                   │
//!                                ├── members
//!                                └── cursor cache
//!                     ┌──────────┼───────────┐
//!                     ▼          ▼           ▼
//!                  Client A   Client B    Client C
//! ```
//!
//! One task per connection. The first binary frame must be a `Join`; after
//! that every decoded event except heartbeats is rebroadcast verbatim. The
//! server holds no graph state.

use std::env;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use gaggle_core::{ParticipantId, RoomId};

use crate::hub::{Membership, RelayHub};
use crate::protocol::{ProtocolError, RelayEvent};

type BoxError = Box<dyn Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

pub const ADDR_ENV: &str = "GAGGLE_RELAY_ADDR";
pub const CAPACITY_ENV: &str = "GAGGLE_BROADCAST_CAPACITY";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Frames buffered per member before a slow member starts losing them.
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
            broadcast_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `GAGGLE_RELAY_ADDR` and
    /// `GAGGLE_BROADCAST_CAPACITY`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup(ADDR_ENV).filter(|a| !a.trim().is_empty()) {
            config.bind_addr = addr.trim().to_string();
        }
        if let Some(raw) = lookup(CAPACITY_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.broadcast_capacity = n,
                _ => log::warn!(
                    "Ignoring invalid {CAPACITY_ENV}={raw:?}, using {}",
                    config.broadcast_capacity
                ),
            }
        }
        config
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_events: u64,
    pub active_rooms: usize,
}

pub struct RelayServer {
    config: ServerConfig,
    hub: Arc<RelayHub>,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let hub = Arc::new(RelayHub::new(config.broadcast_capacity));
        Self {
            config,
            hub,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept loop on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, hub, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<RelayHub>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = match Self::handshake(&mut ws_sender, &mut ws_receiver).await {
            Ok(Some((room_id, participant_id))) => {
                let mut membership = hub.join(&room_id, &participant_id).await;
                stats.write().await.active_rooms = hub.room_count().await;
                log::info!("Participant {participant_id} joined room {room_id} from {addr}");

                let result = Self::pump(
                    &mut ws_sender,
                    &mut ws_receiver,
                    &mut membership,
                    &hub,
                    &stats,
                )
                .await;

                let outcome = hub.leave(&room_id, &participant_id).await;
                log::info!("Participant {participant_id} left room {room_id} ({outcome:?})");
                result
            }
            Ok(None) => Ok(()),
            Err(e) => {
                let _ = ws_sender.send(Message::Close(None)).await;
                Err(e)
            }
        };

        let active_rooms = hub.room_count().await;
        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
        s.active_rooms = active_rooms;
        result
    }

    /// Wait for the `Join` frame. `None` if the peer hung up first.
    async fn handshake(
        ws_sender: &mut WsSink,
        ws_receiver: &mut WsSource,
    ) -> Result<Option<(RoomId, ParticipantId)>, BoxError> {
        while let Some(msg) = ws_receiver.next().await {
            match msg? {
                Message::Binary(data) => {
                    let bytes: Vec<u8> = data.into();
                    return match RelayEvent::decode(&bytes)? {
                        RelayEvent::Join {
                            room_id,
                            participant_id,
                        } => Ok(Some((room_id, participant_id))),
                        other => Err(ProtocolError::InvalidHandshake(format!(
                            "expected join, got {}",
                            other.name()
                        ))
                        .into()),
                    };
                }
                Message::Ping(data) => ws_sender.send(Message::Pong(data)).await?,
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    async fn pump(
        ws_sender: &mut WsSink,
        ws_receiver: &mut WsSource,
        membership: &mut Membership,
        hub: &RelayHub,
        stats: &RwLock<ServerStats>,
    ) -> Result<(), BoxError> {
        for event in membership.replay.drain(..) {
            ws_sender.send(Message::Binary(event.encode()?.into())).await?;
        }

        let room_id = membership.room_id.clone();
        let participant_id = membership.participant_id.clone();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            match RelayEvent::decode(&bytes) {
                                Ok(RelayEvent::Ping) => {
                                    let pong = RelayEvent::Pong.encode()?;
                                    ws_sender.send(Message::Binary(pong.into())).await?;
                                }
                                Ok(RelayEvent::Join { .. }) => {
                                    log::warn!("Ignoring second join from {participant_id}");
                                }
                                Ok(event) => {
                                    stats.write().await.total_events += 1;
                                    if matches!(event, RelayEvent::CursorMove(_)) {
                                        log::trace!("cursor-move from {participant_id} in {room_id}");
                                    } else {
                                        log::debug!("{} from {participant_id} in {room_id}", event.name());
                                    }
                                    hub.relay(&room_id, &participant_id, &event, bytes).await;
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {participant_id}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed by {participant_id}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {participant_id}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                relayed = membership.receiver.recv() => {
                    match relayed {
                        Some(item) => {
                            ws_sender.send(Message::Binary(item.frame.clone().into())).await?;
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn hub(&self) -> &Arc<RelayHub> {
        &self.hub
    }
}
