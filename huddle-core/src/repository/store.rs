use async_trait::async_trait;

use crate::models::{Participant, Room, RoomId, RoomStatus, UserId};
use crate::Result;

/// Persistence seam for room and participant records.
///
/// The backing store is owned by the surrounding application; the call
/// core only needs these operations. The store is the single source of
/// truth for "who is in the room" at join time — the signaling channel
/// takes over for joins and leaves after that point.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn create_room(&self, room: &Room) -> Result<()>;

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>>;

    async fn set_room_status(&self, room_id: &RoomId, status: RoomStatus) -> Result<()>;

    /// Insert or update the participant record keyed by (room, user).
    ///
    /// Re-joining must update the existing record (fresh `joined_at`,
    /// cleared `left_at`) rather than create a duplicate.
    async fn upsert_participant(&self, participant: &Participant) -> Result<Participant>;

    async fn mark_connected(&self, room_id: &RoomId, user_id: &UserId) -> Result<()>;

    async fn mark_left(&self, room_id: &RoomId, user_id: &UserId) -> Result<()>;

    /// All non-left participants for a room.
    async fn list_present(&self, room_id: &RoomId) -> Result<Vec<Participant>>;
}
