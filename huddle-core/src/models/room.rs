use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{RoomId, UserId};

/// Room lifecycle status.
///
/// A room starts `Waiting` with only the host registered, becomes `Active`
/// on the first successful join beyond the host, and `Ended` on explicit
/// termination by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    #[default]
    Waiting,
    Active,
    Ended,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Room visibility for listing purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

/// Free-form descriptive metadata owned by the room pages.
///
/// The call core never interprets these fields; they ride along on the
/// persisted room record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoomMetadata {
    pub title: String,
    pub subject: Option<String>,
    pub capacity: Option<u32>,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub host: UserId,
    pub status: RoomStatus,
    pub metadata: RoomMetadata,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(host: UserId, metadata: RoomMetadata) -> Self {
        Self {
            id: RoomId::new(),
            host,
            status: RoomStatus::Waiting,
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn is_joinable(&self) -> bool {
        !self.status.is_ended()
    }
}
