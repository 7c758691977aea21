use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{RoomId, UserId};

/// Connection status of a participant as seen by the room store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted membership record, one active record per (room, user) pair.
///
/// Re-joining upserts this record rather than duplicating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub is_host: bool,
    pub status: ConnectionStatus,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn new(room_id: RoomId, user_id: UserId, is_host: bool) -> Self {
        Self {
            room_id,
            user_id,
            is_host,
            status: ConnectionStatus::Connecting,
            joined_at: Utc::now(),
            left_at: None,
        }
    }

    /// Present means joined and not yet left.
    pub fn is_present(&self) -> bool {
        self.left_at.is_none() && !self.status.is_disconnected()
    }

    pub fn mark_connected(&mut self) {
        self.status = ConnectionStatus::Connected;
    }

    pub fn leave(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.left_at = Some(Utc::now());
    }
}
