//! Room lifecycle management
//!
//! Creates, joins, leaves and ends rooms against the persisted store.
//! The store is authoritative for membership at join time; live joins
//! and leaves after that travel over the signaling channel.

use std::sync::Arc;

use tracing::{info, warn};

use crate::models::{Participant, Room, RoomId, RoomMetadata, RoomStatus, UserId};
use crate::repository::RoomStore;
use crate::{Error, Result};

#[derive(Clone)]
pub struct RoomService {
    store: Arc<dyn RoomStore>,
}

impl std::fmt::Debug for RoomService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomService").finish()
    }
}

impl RoomService {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self { store }
    }

    /// Create a room in `Waiting` status with the host as its sole
    /// participant.
    pub async fn create_room(&self, host: UserId, metadata: RoomMetadata) -> Result<Room> {
        let room = Room::new(host.clone(), metadata);
        self.store.create_room(&room).await?;

        let participant = Participant::new(room.id.clone(), host, true);
        self.store.upsert_participant(&participant).await?;

        info!(room_id = %room.id, host = %room.host, "room created");
        Ok(room)
    }

    /// Fetch a room, failing with [`Error::RoomNotFound`].
    pub async fn room(&self, room_id: &RoomId) -> Result<Room> {
        self.store
            .get_room(room_id)
            .await?
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))
    }

    /// Persist a join: upsert the caller's participant record (idempotent
    /// on re-join), flip `Waiting → Active` on the first join beyond the
    /// host, and return the room plus the participants already present
    /// (excluding the caller).
    pub async fn register_join(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<(Room, Vec<Participant>)> {
        let mut room = self.room(room_id).await?;
        if room.status.is_ended() {
            return Err(Error::InvalidInput(format!("Room {room_id} has ended")));
        }

        let is_host = room.host == *user_id;
        let participant = Participant::new(room_id.clone(), user_id.clone(), is_host);
        self.store.upsert_participant(&participant).await?;

        let others: Vec<Participant> = self
            .store
            .list_present(room_id)
            .await?
            .into_iter()
            .filter(|p| p.user_id != *user_id)
            .collect();

        if room.status.is_waiting() && !is_host {
            self.store
                .set_room_status(room_id, RoomStatus::Active)
                .await?;
            room.status = RoomStatus::Active;
        }

        info!(room_id = %room_id, user_id = %user_id, others = others.len(), "join registered");
        Ok((room, others))
    }

    /// Persist the caller's transition to connected, once its first
    /// peer connection lands. Best-effort, like [`Self::record_leave`].
    pub async fn record_connected(&self, room_id: &RoomId, user_id: &UserId) {
        if let Err(err) = self.store.mark_connected(room_id, user_id).await {
            warn!(room_id = %room_id, user_id = %user_id, %err, "failed to persist connected status");
        }
    }

    /// Persist a leave. Store failures are logged, never propagated:
    /// local teardown must not be blocked by an unreachable store.
    pub async fn record_leave(&self, room_id: &RoomId, user_id: &UserId) {
        if let Err(err) = self.store.mark_left(room_id, user_id).await {
            warn!(room_id = %room_id, user_id = %user_id, %err, "failed to persist leave record");
        }
    }

    /// Explicit termination by the host.
    pub async fn end_room(&self, room_id: &RoomId, by: &UserId) -> Result<()> {
        let room = self.room(room_id).await?;
        if room.host != *by {
            return Err(Error::InvalidInput(
                "only the host can end a room".to_string(),
            ));
        }
        self.store
            .set_room_status(room_id, RoomStatus::Ended)
            .await?;
        info!(room_id = %room_id, "room ended");
        Ok(())
    }
}
