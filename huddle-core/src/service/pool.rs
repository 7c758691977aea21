//! Peer connection pool
//!
//! One independently negotiated connection per remote participant,
//! keyed by user id. The pool is owned by the call session's run loop
//! and only ever mutated there, so entries need no interior locking;
//! negotiations for different remote peers share nothing but the map.
//!
//! Per-entry state machine:
//! `new → have-local-offer | have-remote-offer → connected →
//! { failed → connected (after restart) | closed }`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{IceCandidate, SessionDescription, SignalingMessage, UserId};
use crate::Result;

use super::media::{MediaStream, MediaTrack};
use super::signaling::SignalingChannel;
use super::transport::{PeerConnectionState, PeerEvent, PeerTransport, TransportFactory};

struct PeerEntry {
    transport: Arc<dyn PeerTransport>,
    state: PeerConnectionState,
    remote_stream: Option<MediaStream>,
    /// Candidates received before the remote description; applied once
    /// it lands, never dropped.
    pending_candidates: Vec<IceCandidate>,
    remote_description_set: bool,
    /// We sent an offer and are waiting for the answer.
    initiated: bool,
}

pub struct PeerPool {
    local_id: UserId,
    factory: Arc<dyn TransportFactory>,
    local_tracks: Vec<MediaTrack>,
    entries: HashMap<UserId, PeerEntry>,
    /// Candidates addressed to us for peers we have no entry for yet.
    orphan_candidates: HashMap<UserId, Vec<IceCandidate>>,
    /// Transport events are forwarded here, tagged with the remote id.
    peer_events: mpsc::Sender<(UserId, PeerEvent)>,
    cancel: CancellationToken,
}

impl PeerPool {
    pub fn new(
        local_id: UserId,
        factory: Arc<dyn TransportFactory>,
        local_tracks: Vec<MediaTrack>,
        peer_events: mpsc::Sender<(UserId, PeerEvent)>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            local_id,
            factory,
            local_tracks,
            entries: HashMap::new(),
            orphan_candidates: HashMap::new(),
            peer_events,
            cancel,
        }
    }

    pub fn contains(&self, remote_id: &UserId) -> bool {
        self.entries.contains_key(remote_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current remote streams keyed by participant id.
    pub fn remote_streams(&self) -> HashMap<UserId, MediaStream> {
        self.entries
            .iter()
            .filter_map(|(id, entry)| {
                entry
                    .remote_stream
                    .as_ref()
                    .map(|s| (id.clone(), s.clone()))
            })
            .collect()
    }

    /// Create the entry and wire its event forwarding; no-op if present.
    fn ensure_entry(&mut self, remote_id: &UserId) {
        if self.entries.contains_key(remote_id) {
            return;
        }

        let transport = self.factory.create(remote_id);
        transport.attach_tracks(&self.local_tracks);

        if let Some(mut rx) = transport.take_events() {
            let tx = self.peer_events.clone();
            let remote = remote_id.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = rx.recv() => match event {
                            Some(event) => {
                                if tx.send((remote.clone(), event)).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
        }

        let pending_candidates = self.orphan_candidates.remove(remote_id).unwrap_or_default();
        self.entries.insert(
            remote_id.clone(),
            PeerEntry {
                transport,
                state: PeerConnectionState::New,
                remote_stream: None,
                pending_candidates,
                remote_description_set: false,
                initiated: false,
            },
        );
    }

    /// Initiating side: offer a connection to a newly learned peer.
    pub async fn connect_to_user(
        &mut self,
        remote_id: &UserId,
        channel: &SignalingChannel,
    ) -> Result<()> {
        if self.entries.contains_key(remote_id) {
            debug!(remote_id = %remote_id, "already negotiating, skipping initiate");
            return Ok(());
        }

        self.ensure_entry(remote_id);
        let Some(entry) = self.entries.get_mut(remote_id) else {
            return Ok(());
        };

        let offer = entry.transport.create_offer().await?;
        entry.transport.set_local_description(offer.clone()).await?;
        entry.initiated = true;

        channel.send(SignalingMessage::Offer {
            offer,
            from_user_id: self.local_id.clone(),
            target_user_id: remote_id.clone(),
        });
        info!(remote_id = %remote_id, "sent offer");
        Ok(())
    }

    /// The remote peer announced its presence while our offer to it is
    /// still unanswered. The offer may have been broadcast before the
    /// peer subscribed, so abandon the attempt and offer again. A no-op
    /// for answered or passive entries.
    pub async fn reoffer_unanswered(
        &mut self,
        remote_id: &UserId,
        channel: &SignalingChannel,
    ) -> Result<()> {
        let unanswered = self
            .entries
            .get(remote_id)
            .is_some_and(|e| e.initiated && !e.remote_description_set);
        if !unanswered {
            return Ok(());
        }
        debug!(remote_id = %remote_id, "peer reappeared with our offer unanswered, offering again");
        self.remove(remote_id);
        self.connect_to_user(remote_id, channel).await
    }

    /// Responding side: apply a remote offer and answer it.
    pub async fn handle_offer(
        &mut self,
        from: &UserId,
        offer: SessionDescription,
        channel: &SignalingChannel,
    ) -> Result<()> {
        // Glare: both sides offered at once. The smaller id's offer
        // wins; the larger side abandons its own attempt and answers.
        if let Some(entry) = self.entries.get(from) {
            if entry.initiated && !entry.remote_description_set {
                if self.local_id.as_str() < from.as_str() {
                    debug!(remote_id = %from, "ignoring glare offer, ours wins");
                    return Ok(());
                }
                debug!(remote_id = %from, "yielding glare to smaller id");
                self.remove(from);
            }
        }

        self.ensure_entry(from);
        let Some(entry) = self.entries.get_mut(from) else {
            return Ok(());
        };

        let transport = entry.transport.clone();
        transport.set_remote_description(offer).await?;
        entry.remote_description_set = true;

        let pending: Vec<IceCandidate> = entry.pending_candidates.drain(..).collect();
        Self::apply_candidates(&transport, from, pending).await;

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;

        channel.send(SignalingMessage::Answer {
            answer,
            from_user_id: self.local_id.clone(),
            target_user_id: from.clone(),
        });
        info!(remote_id = %from, "answered offer");
        Ok(())
    }

    /// Initiating side: apply the answer to our pending offer.
    pub async fn handle_answer(&mut self, from: &UserId, answer: SessionDescription) -> Result<()> {
        let Some(entry) = self.entries.get_mut(from) else {
            // Entry already closed; expected during races, not an error.
            debug!(remote_id = %from, "answer for unknown peer, ignoring");
            return Ok(());
        };
        if entry.remote_description_set {
            debug!(remote_id = %from, "duplicate answer, ignoring");
            return Ok(());
        }

        let transport = entry.transport.clone();
        transport.set_remote_description(answer).await?;
        entry.remote_description_set = true;
        entry.initiated = false;

        let pending: Vec<IceCandidate> = entry.pending_candidates.drain(..).collect();
        Self::apply_candidates(&transport, from, pending).await;
        Ok(())
    }

    /// Apply or queue a remote candidate, depending on whether the
    /// pair's remote description is in place yet.
    pub async fn handle_candidate(&mut self, from: &UserId, candidate: IceCandidate) -> Result<()> {
        match self.entries.get_mut(from) {
            Some(entry) if entry.remote_description_set => {
                let transport = entry.transport.clone();
                Self::apply_candidates(&transport, from, vec![candidate]).await;
            }
            Some(entry) => {
                debug!(remote_id = %from, "queueing candidate before remote description");
                entry.pending_candidates.push(candidate);
            }
            None => {
                debug!(remote_id = %from, "parking candidate for unknown peer");
                self.orphan_candidates
                    .entry(from.clone())
                    .or_default()
                    .push(candidate);
            }
        }
        Ok(())
    }

    async fn apply_candidates(
        transport: &Arc<dyn PeerTransport>,
        remote_id: &UserId,
        candidates: Vec<IceCandidate>,
    ) {
        for candidate in candidates {
            if let Err(err) = transport.add_ice_candidate(candidate).await {
                // Late candidates against a closing pair are expected.
                debug!(remote_id = %remote_id, %err, "candidate not applied");
            }
        }
    }

    /// Record a state transition; `Failed` triggers an ICE restart on
    /// this entry only.
    pub async fn on_state_changed(
        &mut self,
        remote_id: &UserId,
        state: PeerConnectionState,
    ) -> Result<()> {
        let Some(entry) = self.entries.get_mut(remote_id) else {
            return Ok(());
        };
        entry.state = state;

        if state == PeerConnectionState::Failed {
            info!(remote_id = %remote_id, "connection failed, restarting ICE");
            let transport = entry.transport.clone();
            if let Err(err) = transport.restart_ice().await {
                warn!(remote_id = %remote_id, %err, "ICE restart failed");
            }
        }
        Ok(())
    }

    pub fn set_remote_stream(&mut self, remote_id: &UserId, stream: MediaStream) {
        if let Some(entry) = self.entries.get_mut(remote_id) {
            entry.remote_stream = Some(stream);
        }
    }

    /// Close and discard one entry; siblings are untouched.
    pub fn remove(&mut self, remote_id: &UserId) -> bool {
        self.orphan_candidates.remove(remote_id);
        match self.entries.remove(remote_id) {
            Some(entry) => {
                entry.transport.close();
                debug!(remote_id = %remote_id, "closed peer entry");
                true
            }
            None => false,
        }
    }

    /// Close everything; in-flight negotiations are abandoned.
    pub fn close_all(&mut self) {
        for (remote_id, entry) in self.entries.drain() {
            entry.transport.close();
            debug!(remote_id = %remote_id, "closed peer entry");
        }
        self.orphan_candidates.clear();
    }
}
