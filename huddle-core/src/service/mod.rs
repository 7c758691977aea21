//! Call-core services: media, signaling, peer negotiation and the
//! session actor that composes them.

pub mod call;
pub mod directory;
pub mod media;
pub mod pool;
pub mod room;
pub mod signaling;
pub mod transport;

pub use call::{CallContext, CallHandle, CallSession, CallSnapshot, ParticipantView};
pub use directory::{StaticDirectory, UserDirectory, UserProfile};
pub use media::{
    LocalMediaController, MediaSource, MediaStream, MediaTrack, SyntheticMediaSource, TrackKind,
};
pub use pool::PeerPool;
pub use room::RoomService;
pub use signaling::{SignalingChannel, SignalingHub};
pub use transport::{
    PeerConnectionState, PeerEvent, PeerTransport, SimulatedTransport, SimulatedTransportFactory,
    TransportFactory,
};
