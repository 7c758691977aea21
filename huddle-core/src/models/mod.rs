pub mod id;
pub mod participant;
pub mod room;
pub mod signaling;

pub use id::{generate_id, RoomId, UserId};
pub use participant::{ConnectionStatus, Participant};
pub use room::{Room, RoomMetadata, RoomStatus, Visibility};
pub use signaling::{IceCandidate, SdpType, SessionDescription, SignalingMessage};
