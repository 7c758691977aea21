//! Room-scoped signaling fan-out
//!
//! Fire-and-forget pub/sub: every subscriber of a room receives every
//! message (including its own) and filters for itself. No replay and no
//! acknowledgment — a message sent before a peer subscribes is lost,
//! which is why join-time membership comes from the room store instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::{RoomId, SignalingMessage};

/// Per-room broadcast buffer. Slow subscribers past this many messages
/// lose the oldest ones (logged, not fatal).
const ROOM_CHANNEL_CAPACITY: usize = 128;

/// Named per-room broadcast buses. Cloning shares the hub.
#[derive(Clone, Default)]
pub struct SignalingHub {
    rooms: Arc<RwLock<HashMap<RoomId, broadcast::Sender<SignalingMessage>>>>,
}

impl SignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a room's bus, creating it on first use.
    pub fn connect(&self, room_id: &RoomId) -> SignalingChannel {
        let tx = {
            let mut rooms = self.rooms.write();
            rooms
                .entry(room_id.clone())
                .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
                .clone()
        };
        let rx = tx.subscribe();
        SignalingChannel {
            room_id: room_id.clone(),
            hub: self.clone(),
            tx,
            rx: Some(rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Live subscriber count for a room (zero once everyone has left).
    pub fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.rooms
            .read()
            .get(room_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn prune(&self, room_id: &RoomId) {
        let mut rooms = self.rooms.write();
        if let Some(tx) = rooms.get(room_id) {
            if tx.receiver_count() == 0 {
                rooms.remove(room_id);
            }
        }
    }
}

/// A participant's handle on one room's bus.
pub struct SignalingChannel {
    room_id: RoomId,
    hub: SignalingHub,
    tx: broadcast::Sender<SignalingMessage>,
    rx: Option<broadcast::Receiver<SignalingMessage>>,
    closed: AtomicBool,
}

impl SignalingChannel {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Broadcast a message to the room. Best-effort: a send after
    /// disconnect, or into a room with no subscribers, is dropped with a
    /// log line.
    pub fn send(&self, message: SignalingMessage) {
        if self.closed.load(Ordering::SeqCst) {
            debug!(room_id = %self.room_id, "dropping send on disconnected channel");
            return;
        }
        if self.tx.send(message).is_err() {
            debug!(room_id = %self.room_id, "dropping send, no subscribers");
        }
    }

    /// Take the receive side (once). The caller owns message delivery
    /// from then on; [`SignalingChannel::recv`] no longer yields.
    pub fn take_receiver(&mut self) -> Option<broadcast::Receiver<SignalingMessage>> {
        self.rx.take()
    }

    /// Receive the next message, skipping over lag gaps.
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(room_id = %self.room_id, skipped, "signaling receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Unsubscribe. Idempotent; later sends are dropped.
    pub fn disconnect(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.rx = None;
        self.hub.prune(&self.room_id);
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}
