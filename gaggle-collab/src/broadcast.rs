//! Per-room fan-out to every member except the sender.
//!
//! One tokio broadcast channel per room. Items carry the sender id so each
//! [`RoomReceiver`] can skip its own frames. A receiver that falls more than
//! `capacity` frames behind loses the oldest ones (at-most-once delivery).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gaggle_core::ParticipantId;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::protocol::{ProtocolError, RelayEvent};

/// One encoded frame and who sent it.
#[derive(Debug)]
pub struct Relayed {
    pub from: ParticipantId,
    pub frame: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub subscribers: usize,
}

/// Lock-free counters shared with every receiver.
#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Relayed>>,
    capacity: usize,
    stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity,
            stats: Arc::new(AtomicBroadcastStats::default()),
        }
    }

    /// Receiver for `participant_id` that never yields that participant's
    /// own frames.
    pub fn subscribe(&self, participant_id: impl Into<ParticipantId>) -> RoomReceiver {
        RoomReceiver {
            me: participant_id.into(),
            rx: self.sender.subscribe(),
            stats: self.stats.clone(),
        }
    }

    /// Fan a pre-encoded frame out. Returns the number of live receivers,
    /// the sender's own included.
    pub fn send(&self, from: impl Into<ParticipantId>, frame: Vec<u8>) -> usize {
        let relayed = Arc::new(Relayed {
            from: from.into(),
            frame,
        });
        let count = self.sender.send(relayed).unwrap_or(0);
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub fn send_event(
        &self,
        from: impl Into<ParticipantId>,
        event: &RelayEvent,
    ) -> Result<usize, ProtocolError> {
        Ok(self.send(from, event.encode()?))
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub struct RoomReceiver {
    me: ParticipantId,
    rx: broadcast::Receiver<Arc<Relayed>>,
    stats: Arc<AtomicBroadcastStats>,
}

impl RoomReceiver {
    /// Next frame from another member; `None` once the room is gone.
    pub async fn recv(&mut self) -> Option<Arc<Relayed>> {
        loop {
            match self.rx.recv().await {
                Ok(item) if item.from == self.me => continue,
                Ok(item) => return Some(item),
                Err(RecvError::Lagged(n)) => {
                    log::warn!("Participant {} lagged by {n} frames", self.me);
                    self.stats.messages_dropped.fetch_add(n, Ordering::Relaxed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.me
    }
}
