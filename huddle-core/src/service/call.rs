//! Call session facade
//!
//! Composes media, signaling, the peer pool and the room lifecycle into
//! one actor per joined room. Every mutation of call state funnels
//! through the session's run loop: UI commands arrive over the
//! [`CallHandle`], network events over the signaling pump and per-peer
//! transport forwards, all serialized onto one queue. Observers read the
//! [`CallSnapshot`] published through a watch channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CallConfig;
use crate::models::{
    ConnectionStatus, RoomId, RoomStatus, SignalingMessage, UserId,
};
use crate::{Error, Result};

use super::directory::UserDirectory;
use super::media::{LocalMediaController, MediaSource, MediaStream};
use super::pool::PeerPool;
use super::room::RoomService;
use super::signaling::{SignalingChannel, SignalingHub};
use super::transport::{PeerConnectionState, PeerEvent, TransportFactory};

const SIGNAL_QUEUE_CAPACITY: usize = 256;
const PEER_QUEUE_CAPACITY: usize = 256;
const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Collaborators shared by every session this process opens.
#[derive(Clone)]
pub struct CallContext {
    pub rooms: RoomService,
    pub hub: SignalingHub,
    pub media: Arc<dyn MediaSource>,
    pub transports: Arc<dyn TransportFactory>,
    pub directory: Arc<dyn UserDirectory>,
    pub config: CallConfig,
}

/// A remote participant as the presentation layer sees it.
#[derive(Debug, Clone)]
pub struct ParticipantView {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_host: bool,
    pub connection: ConnectionStatus,
}

/// Immutable view of the call, published after every state change.
///
/// `remote_streams` is the pure participant-id → stream mapping the
/// presentation layer renders generically.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub room_id: RoomId,
    pub local_user: UserId,
    pub status: RoomStatus,
    pub participants: Vec<ParticipantView>,
    pub remote_streams: HashMap<UserId, MediaStream>,
    pub local_stream: MediaStream,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    /// Set once, when the first peer connection lands.
    pub call_started_at: Option<Instant>,
    pub duration: Duration,
    pub in_call: bool,
}

enum CallCommand {
    ToggleVideo(oneshot::Sender<bool>),
    ToggleAudio(oneshot::Sender<bool>),
    Leave(oneshot::Sender<()>),
}

/// The embedder's only mutation path into a running session.
pub struct CallHandle {
    room_id: RoomId,
    local_user: UserId,
    commands: mpsc::Sender<CallCommand>,
    snapshot: watch::Receiver<CallSnapshot>,
}

impl CallHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait for the next published snapshot.
    pub async fn changed(&mut self) -> Result<()> {
        self.snapshot.changed().await.map_err(|_| Error::ChannelClosed)
    }

    pub async fn toggle_video(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(CallCommand::ToggleVideo(tx))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    pub async fn toggle_audio(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(CallCommand::ToggleAudio(tx))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Leave the room and tear the session down. Resolves once cleanup
    /// has completed.
    pub async fn leave(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(CallCommand::Leave(tx))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }
}

/// One joined room, driven as a single logical actor.
pub struct CallSession {
    ctx: CallContext,
    room_id: RoomId,
    host: UserId,
    local_user: UserId,
    status: RoomStatus,
    media: LocalMediaController,
    channel: SignalingChannel,
    pool: PeerPool,
    participants: HashMap<UserId, ParticipantView>,
    started_at: Option<Instant>,
    final_duration: Duration,
    in_call: bool,
    snapshot_tx: watch::Sender<CallSnapshot>,
    commands_rx: mpsc::Receiver<CallCommand>,
    signal_rx: mpsc::Receiver<SignalingMessage>,
    peer_rx: mpsc::Receiver<(UserId, PeerEvent)>,
    cancel: CancellationToken,
}

impl CallSession {
    /// Join a room and spawn the session actor.
    ///
    /// Orchestration order matters for the failure contract: the room is
    /// validated before any device is touched, and an error after media
    /// acquisition releases the tracks before returning.
    pub async fn join(ctx: CallContext, room_id: RoomId, local_user: UserId) -> Result<CallHandle> {
        // Room must exist before we hold any media open.
        ctx.rooms.room(&room_id).await?;

        let media = LocalMediaController::acquire(
            ctx.media.as_ref(),
            ctx.config.video_enabled,
            ctx.config.audio_enabled,
        )
        .await?;

        let (room, others) = match ctx.rooms.register_join(&room_id, &local_user).await {
            Ok(v) => v,
            Err(err) => {
                media.release();
                return Err(err);
            }
        };

        let mut channel = ctx.hub.connect(&room_id);
        let Some(mut raw_rx) = channel.take_receiver() else {
            media.release();
            return Err(Error::ChannelClosed);
        };

        let cancel = CancellationToken::new();
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        let (peer_tx, peer_rx) = mpsc::channel(PEER_QUEUE_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        // Pump the room bus onto the session queue, riding over lag gaps.
        {
            let cancel = cancel.clone();
            let room_id = room_id.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = raw_rx.recv() => match received {
                            Ok(message) => {
                                if signal_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(room_id = %room_id, skipped, "signaling pump lagged");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
            });
        }

        let pool = PeerPool::new(
            local_user.clone(),
            ctx.transports.clone(),
            media.stream().tracks().to_vec(),
            peer_tx,
            cancel.clone(),
        );

        let mut session = Self {
            host: room.host.clone(),
            status: room.status,
            local_user: local_user.clone(),
            room_id: room_id.clone(),
            media,
            channel,
            pool,
            participants: HashMap::new(),
            started_at: None,
            final_duration: Duration::ZERO,
            in_call: true,
            snapshot_tx: watch::channel(CallSnapshot {
                room_id: room_id.clone(),
                local_user: local_user.clone(),
                status: room.status,
                participants: Vec::new(),
                remote_streams: HashMap::new(),
                local_stream: MediaStream::new(Vec::new()),
                video_enabled: false,
                audio_enabled: false,
                call_started_at: None,
                duration: Duration::ZERO,
                in_call: true,
            })
            .0,
            commands_rx,
            signal_rx,
            peer_rx,
            cancel,
            ctx,
        };

        // Announce ourselves, then reach out to everyone the store says
        // is already here (the channel cannot replay their presence).
        session.channel.send(SignalingMessage::UserConnected {
            user_id: local_user.clone(),
        });
        for participant in &others {
            let view = session
                .make_view(&participant.user_id, participant.is_host)
                .await;
            session.participants.insert(participant.user_id.clone(), view);
        }
        for participant in &others {
            session.initiate(&participant.user_id).await;
        }

        let snapshot_rx = session.snapshot_tx.subscribe();
        session.publish();
        tokio::spawn(session.run());

        Ok(CallHandle {
            room_id,
            local_user,
            commands: commands_tx,
            snapshot: snapshot_rx,
        })
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(CallCommand::ToggleVideo(ack)) => {
                        let enabled = self.media.toggle_video();
                        self.publish();
                        let _ = ack.send(enabled);
                    }
                    Some(CallCommand::ToggleAudio(ack)) => {
                        let enabled = self.media.toggle_audio();
                        self.publish();
                        let _ = ack.send(enabled);
                    }
                    Some(CallCommand::Leave(ack)) => {
                        self.leave().await;
                        let _ = ack.send(());
                        break;
                    }
                    // Handle dropped: treat as leave.
                    None => {
                        self.leave().await;
                        break;
                    }
                },
                Some(message) = self.signal_rx.recv() => {
                    self.handle_signal(message).await;
                    self.publish();
                },
                Some((remote, event)) = self.peer_rx.recv() => {
                    self.handle_peer_event(remote, event).await;
                    self.publish();
                },
            }
        }
    }

    async fn handle_signal(&mut self, message: SignalingMessage) {
        if !message.concerns(&self.local_user) {
            return;
        }
        match message {
            SignalingMessage::UserConnected { user_id } => {
                if self.status.is_waiting() {
                    // Mirror the store-side flip done by the joiner.
                    self.status = RoomStatus::Active;
                }
                if !self.participants.contains_key(&user_id) {
                    let is_host = user_id == self.host;
                    let view = self.make_view(&user_id, is_host).await;
                    self.participants.insert(user_id.clone(), view);
                }
                if self.pool.contains(&user_id) {
                    // Known from the join-time membership query. An
                    // offer we sent to this peer may predate its
                    // subscription; refresh it if still unanswered.
                    if let Err(err) = self
                        .pool
                        .reoffer_unanswered(&user_id, &self.channel)
                        .await
                    {
                        warn!(remote_id = %user_id, %err, "failed to refresh offer");
                    }
                    return;
                }
                self.initiate_if_smaller(&user_id).await;
            }
            SignalingMessage::UserDisconnected { user_id } => {
                self.pool.remove(&user_id);
                self.participants.remove(&user_id);
            }
            SignalingMessage::Offer {
                offer,
                from_user_id,
                ..
            } => {
                // An offer can outrun its sender's presence notice.
                if !self.participants.contains_key(&from_user_id) {
                    let is_host = from_user_id == self.host;
                    let view = self.make_view(&from_user_id, is_host).await;
                    self.participants.insert(from_user_id.clone(), view);
                }
                if let Err(err) = self
                    .pool
                    .handle_offer(&from_user_id, offer, &self.channel)
                    .await
                {
                    warn!(remote_id = %from_user_id, %err, "failed to answer offer");
                }
            }
            SignalingMessage::Answer {
                answer,
                from_user_id,
                ..
            } => {
                if let Err(err) = self.pool.handle_answer(&from_user_id, answer).await {
                    warn!(remote_id = %from_user_id, %err, "failed to apply answer");
                }
            }
            SignalingMessage::IceCandidate {
                candidate,
                from_user_id,
                ..
            } => {
                if let Err(err) = self.pool.handle_candidate(&from_user_id, candidate).await {
                    warn!(remote_id = %from_user_id, %err, "failed to handle candidate");
                }
            }
        }
    }

    async fn handle_peer_event(&mut self, remote: UserId, event: PeerEvent) {
        match event {
            PeerEvent::Candidate(candidate) => {
                self.channel.send(SignalingMessage::IceCandidate {
                    candidate,
                    from_user_id: self.local_user.clone(),
                    target_user_id: remote,
                });
            }
            PeerEvent::Track(stream) => {
                debug!(remote_id = %remote, stream_id = %stream.id(), "remote stream attached");
                self.pool.set_remote_stream(&remote, stream);
            }
            PeerEvent::StateChanged(state) => {
                if let Err(err) = self.pool.on_state_changed(&remote, state).await {
                    warn!(remote_id = %remote, %err, "state transition handling failed");
                }
                if state == PeerConnectionState::Connected && self.started_at.is_none() {
                    // First peer connected: the call is live. The timer
                    // starts here and only here.
                    self.started_at = Some(Instant::now());
                    info!(room_id = %self.room_id, "call active");
                    self.ctx
                        .rooms
                        .record_connected(&self.room_id, &self.local_user)
                        .await;
                }
                if let Some(view) = self.participants.get_mut(&remote) {
                    view.connection = match state {
                        PeerConnectionState::Connected => ConnectionStatus::Connected,
                        PeerConnectionState::Closed => ConnectionStatus::Disconnected,
                        _ => ConnectionStatus::Connecting,
                    };
                }
            }
        }
    }

    /// Offer a connection to a peer. Store-known peers get an offer
    /// from the joiner regardless of id order: their presence notice
    /// can predate our subscription and never arrive, and crossed
    /// offers collapse deterministically in the pool.
    async fn initiate(&mut self, remote_id: &UserId) {
        if let Err(err) = self.pool.connect_to_user(remote_id, &self.channel).await {
            // A failed initiate is isolated to this pair.
            warn!(remote_id = %remote_id, %err, "failed to initiate connection");
        }
    }

    /// Presence-triggered tie-break: the smaller id initiates, the
    /// larger side waits for the offer.
    async fn initiate_if_smaller(&mut self, remote_id: &UserId) {
        if self.local_user.as_str() >= remote_id.as_str() {
            return;
        }
        self.initiate(remote_id).await;
    }

    async fn make_view(&self, user_id: &UserId, is_host: bool) -> ParticipantView {
        let profile = self.ctx.directory.lookup(user_id).await;
        ParticipantView {
            user_id: user_id.clone(),
            display_name: profile
                .as_ref()
                .map_or_else(|| user_id.to_string(), |p| p.display_name.clone()),
            avatar_url: profile.and_then(|p| p.avatar_url),
            is_host,
            connection: ConnectionStatus::Connecting,
        }
    }

    /// Tear everything down. Best-effort-all: every step runs even if an
    /// earlier one fails, so the user can always leave.
    async fn leave(&mut self) {
        if !self.in_call {
            return;
        }
        self.in_call = false;
        info!(room_id = %self.room_id, user_id = %self.local_user, "leaving room");

        self.channel.send(SignalingMessage::UserDisconnected {
            user_id: self.local_user.clone(),
        });
        self.pool.close_all();
        self.media.release();
        self.channel.disconnect();
        self.cancel.cancel();
        self.final_duration = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        self.started_at = None;
        self.ctx
            .rooms
            .record_leave(&self.room_id, &self.local_user)
            .await;
        self.participants.clear();
        self.publish();
    }

    fn publish(&self) {
        let mut participants: Vec<ParticipantView> = self.participants.values().cloned().collect();
        participants.sort_by(|a, b| a.user_id.as_str().cmp(b.user_id.as_str()));

        let snapshot = CallSnapshot {
            room_id: self.room_id.clone(),
            local_user: self.local_user.clone(),
            status: self.status,
            participants,
            remote_streams: self.pool.remote_streams(),
            local_stream: self.media.stream().clone(),
            video_enabled: self.media.video_enabled(),
            audio_enabled: self.media.audio_enabled(),
            call_started_at: self.started_at,
            duration: self
                .started_at
                .map_or(self.final_duration, |t| t.elapsed()),
            in_call: self.in_call,
        };
        let _ = self.snapshot_tx.send(snapshot);
    }
}
