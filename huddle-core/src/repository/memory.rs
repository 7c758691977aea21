use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{Participant, Room, RoomId, RoomStatus, UserId};
use crate::{Error, Result};

use super::store::RoomStore;

/// In-memory room store.
///
/// Useful for tests and single-process deployments; production embeds a
/// database-backed implementation of [`RoomStore`] instead.
#[derive(Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<RoomId, Room>>,
    participants: RwLock<HashMap<(RoomId, UserId), Participant>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn create_room(&self, room: &Room) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.id) {
            return Err(Error::AlreadyExists(format!("Room {}", room.id)));
        }
        rooms.insert(room.id.clone(), room.clone());
        Ok(())
    }

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>> {
        let rooms = self.rooms.read().await;
        Ok(rooms.get(room_id).cloned())
    }

    async fn set_room_status(&self, room_id: &RoomId, status: RoomStatus) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))?;
        room.status = status;
        Ok(())
    }

    async fn upsert_participant(&self, participant: &Participant) -> Result<Participant> {
        let mut participants = self.participants.write().await;
        let key = (participant.room_id.clone(), participant.user_id.clone());
        // Rejoin replaces the old record: fresh joined_at, cleared left_at.
        participants.insert(key, participant.clone());
        Ok(participant.clone())
    }

    async fn mark_connected(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        let mut participants = self.participants.write().await;
        let participant = participants
            .get_mut(&(room_id.clone(), user_id.clone()))
            .ok_or_else(|| Error::NotFound(format!("Participant {user_id} in room {room_id}")))?;
        participant.mark_connected();
        Ok(())
    }

    async fn mark_left(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        let mut participants = self.participants.write().await;
        let participant = participants
            .get_mut(&(room_id.clone(), user_id.clone()))
            .ok_or_else(|| Error::NotFound(format!("Participant {user_id} in room {room_id}")))?;
        participant.leave();
        Ok(())
    }

    async fn list_present(&self, room_id: &RoomId) -> Result<Vec<Participant>> {
        let participants = self.participants.read().await;
        let mut present: Vec<Participant> = participants
            .values()
            .filter(|p| p.room_id == *room_id && p.is_present())
            .cloned()
            .collect();
        present.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoomMetadata;

    #[tokio::test]
    async fn test_create_and_get_room() {
        let store = MemoryStore::new();
        let room = Room::new(UserId::new(), RoomMetadata::default());

        store.create_room(&room).await.unwrap();
        let fetched = store.get_room(&room.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, room.id);

        // Duplicate creation is rejected
        assert!(store.create_room(&room).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_room_user() {
        let store = MemoryStore::new();
        let room_id = RoomId::new();
        let user_id = UserId::new();

        let first = Participant::new(room_id.clone(), user_id.clone(), false);
        store.upsert_participant(&first).await.unwrap();

        // Leave, then re-join: still exactly one record, present again.
        store.mark_left(&room_id, &user_id).await.unwrap();
        assert!(store.list_present(&room_id).await.unwrap().is_empty());

        let rejoin = Participant::new(room_id.clone(), user_id.clone(), false);
        store.upsert_participant(&rejoin).await.unwrap();

        let present = store.list_present(&room_id).await.unwrap();
        assert_eq!(present.len(), 1);
        assert!(present[0].left_at.is_none());
    }

    #[tokio::test]
    async fn test_list_present_excludes_left() {
        let store = MemoryStore::new();
        let room_id = RoomId::new();
        let stays = Participant::new(room_id.clone(), UserId::new(), true);
        let leaves = Participant::new(room_id.clone(), UserId::new(), false);

        store.upsert_participant(&stays).await.unwrap();
        store.upsert_participant(&leaves).await.unwrap();
        store.mark_left(&room_id, &leaves.user_id).await.unwrap();

        let present = store.list_present(&room_id).await.unwrap();
        assert_eq!(present.len(), 1);
        assert_eq!(present[0].user_id, stays.user_id);
    }

    #[tokio::test]
    async fn test_mark_connected_updates_status() {
        let store = MemoryStore::new();
        let room_id = RoomId::new();
        let participant = Participant::new(room_id.clone(), UserId::new(), false);
        store.upsert_participant(&participant).await.unwrap();

        store
            .mark_connected(&room_id, &participant.user_id)
            .await
            .unwrap();

        let present = store.list_present(&room_id).await.unwrap();
        assert!(present[0].status.is_connected());
    }

    #[tokio::test]
    async fn test_mark_left_unknown_participant() {
        let store = MemoryStore::new();
        let err = store.mark_left(&RoomId::new(), &UserId::new()).await;
        assert!(matches!(err, Err(Error::NotFound(_))));
    }
}
