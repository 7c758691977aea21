//! Peer transport seam
//!
//! [`PeerTransport`] is the boundary between the negotiation core and a
//! media engine. The pool drives it with the offer/answer/candidate
//! steps; the transport reports back through an event channel
//! (candidates it gathers, the remote stream once media flows, and
//! connection-state transitions).
//!
//! [`SimulatedTransportFactory`] is the in-process backend: it walks the
//! full handshake and synthesizes the remote stream, without moving any
//! RTP. A WebRTC engine plugs in behind the same trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::CallConfig;
use crate::models::{generate_id, IceCandidate, SdpType, SessionDescription, UserId};
use crate::{Error, Result};

use super::media::{MediaStream, MediaTrack, TrackKind};

/// Connection state of a single peer transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// Events a transport reports to its owner.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A locally gathered ICE candidate to relay to the remote peer.
    Candidate(IceCandidate),
    /// The remote peer's media stream became available.
    Track(MediaStream),
    /// Connection state transition.
    StateChanged(PeerConnectionState),
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Requires the remote offer to have been applied first.
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Re-run candidate gathering on a failed connection without tearing
    /// down the transport.
    async fn restart_ice(&self) -> Result<()>;

    /// Attach the local tracks that should flow over this connection.
    fn attach_tracks(&self, tracks: &[MediaTrack]);

    /// Take the event receiver (once).
    fn take_events(&self) -> Option<mpsc::Receiver<PeerEvent>>;

    fn close(&self);
}

/// Creates one transport per remote participant.
pub trait TransportFactory: Send + Sync {
    fn create(&self, remote_id: &UserId) -> Arc<dyn PeerTransport>;
}

const PEER_EVENT_CHANNEL_CAPACITY: usize = 64;

struct SimulatedInner {
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    remote_candidates: Vec<IceCandidate>,
    tracks: Vec<MediaTrack>,
    state: PeerConnectionState,
    stream_delivered: bool,
    closed: bool,
}

/// In-process transport that performs the complete negotiation dance.
///
/// It reaches `Connected` once both descriptions are set and at least one
/// remote candidate has been applied, then emits a synthetic remote
/// stream. `force_state` exists for fault drills; `restart_ice` recovers
/// a `Failed` transport.
pub struct SimulatedTransport {
    remote_id: UserId,
    inner: Mutex<SimulatedInner>,
    events_tx: mpsc::Sender<PeerEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<PeerEvent>>>,
}

impl SimulatedTransport {
    fn new(remote_id: UserId) -> Self {
        let (events_tx, events_rx) = mpsc::channel(PEER_EVENT_CHANNEL_CAPACITY);
        Self {
            remote_id,
            inner: Mutex::new(SimulatedInner {
                local_description: None,
                remote_description: None,
                remote_candidates: Vec::new(),
                tracks: Vec::new(),
                state: PeerConnectionState::New,
                stream_delivered: false,
                closed: false,
            }),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn state(&self) -> PeerConnectionState {
        self.inner.lock().state
    }

    /// Drive the transport into an arbitrary state, emitting the
    /// matching event. Used to rehearse failure handling.
    pub fn force_state(&self, state: PeerConnectionState) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.state = state;
        }
        self.emit(PeerEvent::StateChanged(state));
    }

    fn emit(&self, event: PeerEvent) {
        if let Err(err) = self.events_tx.try_send(event) {
            warn!(remote_id = %self.remote_id, %err, "peer event dropped");
        }
    }

    fn synth_sdp(&self, sdp_type: SdpType) -> SessionDescription {
        SessionDescription {
            sdp_type,
            sdp: format!(
                "v=0\r\no=- {} 0 IN IP4 0.0.0.0\r\ns=huddle\r\nt=0 0\r\n",
                generate_id()
            ),
        }
    }

    fn ensure_open(inner: &SimulatedInner) -> Result<()> {
        if inner.closed {
            return Err(Error::InvalidInput("transport is closed".to_string()));
        }
        Ok(())
    }

    /// Connect once both descriptions and a remote candidate are in.
    fn maybe_connect(&self, inner: &mut SimulatedInner) {
        if inner.closed
            || inner.state == PeerConnectionState::Connected
            || inner.local_description.is_none()
            || inner.remote_description.is_none()
            || inner.remote_candidates.is_empty()
        {
            return;
        }

        inner.state = PeerConnectionState::Connecting;
        self.emit(PeerEvent::StateChanged(PeerConnectionState::Connecting));
        inner.state = PeerConnectionState::Connected;
        self.emit(PeerEvent::StateChanged(PeerConnectionState::Connected));

        if !inner.stream_delivered {
            inner.stream_delivered = true;
            // Mirror what the remote side would send: one track per kind
            // we expect from a camera/microphone peer.
            let stream = MediaStream::new(vec![
                MediaTrack::new(TrackKind::Video, true),
                MediaTrack::new(TrackKind::Audio, true),
            ]);
            self.emit(PeerEvent::Track(stream));
        }
    }
}

#[async_trait]
impl PeerTransport for SimulatedTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let inner = self.inner.lock();
        Self::ensure_open(&inner)?;
        Ok(self.synth_sdp(SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let inner = self.inner.lock();
        Self::ensure_open(&inner)?;
        match &inner.remote_description {
            Some(desc) if desc.sdp_type == SdpType::Offer => Ok(self.synth_sdp(SdpType::Answer)),
            _ => Err(Error::InvalidInput(
                "cannot answer without a remote offer".to_string(),
            )),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;
            inner.local_description = Some(desc);
        }
        // Trickle: gather one host candidate right after the local
        // description lands.
        self.emit(PeerEvent::Candidate(IceCandidate {
            candidate: format!("candidate:{} 1 udp 2130706431 0.0.0.0 9 typ host", generate_id()),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }));
        let mut inner = self.inner.lock();
        self.maybe_connect(&mut inner);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;
        inner.remote_description = Some(desc);
        self.maybe_connect(&mut inner);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;
        if inner.remote_description.is_none() {
            // The pool queues candidates until the remote description is
            // set; reaching here without one is a protocol violation.
            return Err(Error::InvalidInput(
                "candidate before remote description".to_string(),
            ));
        }
        inner.remote_candidates.push(candidate);
        self.maybe_connect(&mut inner);
        Ok(())
    }

    async fn restart_ice(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;
        if inner.state != PeerConnectionState::Failed {
            debug!(remote_id = %self.remote_id, "restart_ice on non-failed transport, ignoring");
            return Ok(());
        }
        inner.state = PeerConnectionState::Connecting;
        self.emit(PeerEvent::StateChanged(PeerConnectionState::Connecting));
        inner.state = PeerConnectionState::Connected;
        self.emit(PeerEvent::StateChanged(PeerConnectionState::Connected));
        Ok(())
    }

    fn attach_tracks(&self, tracks: &[MediaTrack]) {
        let mut inner = self.inner.lock();
        inner.tracks = tracks.to_vec();
    }

    fn take_events(&self) -> Option<mpsc::Receiver<PeerEvent>> {
        self.events_rx.lock().take()
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.state = PeerConnectionState::Closed;
    }
}

/// Factory for [`SimulatedTransport`]s. Keeps a handle per remote id so
/// tests and drills can reach into a live transport.
pub struct SimulatedTransportFactory {
    config: CallConfig,
    transports: Mutex<HashMap<UserId, Arc<SimulatedTransport>>>,
}

impl SimulatedTransportFactory {
    pub fn new(config: CallConfig) -> Self {
        Self {
            config,
            transports: Mutex::new(HashMap::new()),
        }
    }

    pub fn transport_to(&self, remote_id: &UserId) -> Option<Arc<SimulatedTransport>> {
        self.transports.lock().get(remote_id).cloned()
    }
}

impl Default for SimulatedTransportFactory {
    fn default() -> Self {
        Self::new(CallConfig::default())
    }
}

impl TransportFactory for SimulatedTransportFactory {
    fn create(&self, remote_id: &UserId) -> Arc<dyn PeerTransport> {
        debug!(
            remote_id = %remote_id,
            stun_servers = ?self.config.stun_servers,
            "creating peer transport"
        );
        let transport = Arc::new(SimulatedTransport::new(remote_id.clone()));
        self.transports
            .lock()
            .insert(remote_id.clone(), transport.clone());
        transport
    }
}
