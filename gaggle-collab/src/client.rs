//! WebSocket relay client.
//!
//! Connects, sends the `Join` handshake and then runs two tasks: a writer
//! draining an unbounded channel of [`RelayEvent`]s onto the socket, and a
//! reader turning incoming frames into [`ClientEvent`]s. Nothing is queued
//! while disconnected; events sent then are dropped.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use gaggle_core::{ParticipantId, RoomId};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ProtocolError, RelayEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    Remote(RelayEvent),
}

pub struct RelayClient {
    room_id: RoomId,
    participant_id: ParticipantId,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: Option<mpsc::UnboundedSender<RelayEvent>>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    event_tx: mpsc::Sender<ClientEvent>,
}

impl RelayClient {
    pub fn new(
        server_url: impl Into<String>,
        room_id: impl Into<RoomId>,
        participant_id: impl Into<ParticipantId>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            room_id: room_id.into(),
            participant_id: participant_id.into(),
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Could not reach relay at {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RelayEvent>();
        out_tx
            .send(RelayEvent::join(self.room_id.clone(), self.participant_id.clone()))
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        self.outgoing_tx = Some(out_tx);

        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let frame = match event.encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("Dropping unencodable {}: {e}", event.name());
                        continue;
                    }
                };
                if ws_writer.send(Message::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(ClientEvent::Connected).await;
        log::info!(
            "Connected to {} as {} in room {}",
            self.server_url,
            self.participant_id,
            self.room_id
        );

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match RelayEvent::decode(&bytes) {
                            Ok(event) => {
                                if event_tx.send(ClientEvent::Remote(event)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => log::warn!("Failed to decode relay frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Queue `event` for the writer task.
    pub fn send(&self, event: RelayEvent) -> Result<(), ProtocolError> {
        match &self.outgoing_tx {
            Some(tx) => tx.send(event).map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Handle for other components (a replica's outbox) to send through.
    pub fn sender(&self) -> Option<mpsc::UnboundedSender<RelayEvent>> {
        self.outgoing_tx.clone()
    }

    pub fn send_ping(&self) -> Result<(), ProtocolError> {
        self.send(RelayEvent::Ping)
    }

    /// Stop writing and close the socket once queued events are flushed.
    ///
    /// Clones handed out by [`sender`](Self::sender) keep the writer alive
    /// until they are dropped too.
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }
}
