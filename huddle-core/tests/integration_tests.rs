//! Integration tests for the call core
//!
//! Each test stands up a shared room store and signaling hub, then joins
//! multiple clients the way separate processes would: every client has
//! its own media source and transport factory, and talks to the others
//! only through the store and the signaling bus.
//!
//! Run with: cargo test --test integration_tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use huddle_core::config::CallConfig;
use huddle_core::models::{
    ConnectionStatus, Participant, Room, RoomId, RoomMetadata, RoomStatus, UserId,
};
use huddle_core::repository::{MemoryStore, RoomStore};
use huddle_core::service::{
    PeerConnectionState, RoomService, SignalingHub, SimulatedTransportFactory, StaticDirectory,
    SyntheticMediaSource,
};
use huddle_core::{CallContext, CallHandle, CallSession, CallSnapshot, Error};

struct World {
    store: Arc<MemoryStore>,
    hub: SignalingHub,
    rooms: RoomService,
}

impl World {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            rooms: RoomService::new(store.clone()),
            hub: SignalingHub::new(),
            store,
        }
    }

    /// A client as a separate process would see it: shared store and hub,
    /// private media source and transport factory.
    fn client(&self) -> (CallContext, Arc<SimulatedTransportFactory>) {
        let factory = Arc::new(SimulatedTransportFactory::default());
        let ctx = CallContext {
            rooms: RoomService::new(self.store.clone()),
            hub: self.hub.clone(),
            media: Arc::new(SyntheticMediaSource::new()),
            transports: factory.clone(),
            directory: Arc::new(StaticDirectory::new()),
            config: CallConfig::default(),
        };
        (ctx, factory)
    }

    async fn room(&self, host: &UserId) -> Room {
        self.rooms
            .create_room(host.clone(), RoomMetadata::default())
            .await
            .expect("create room")
    }
}

/// Poll a handle's snapshots until the predicate holds.
async fn wait_for<F>(handle: &mut CallHandle, mut predicate: F) -> CallSnapshot
where
    F: FnMut(&CallSnapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = handle.snapshot();
            if predicate(&snapshot) {
                return snapshot;
            }
            if handle.changed().await.is_err() {
                let snapshot = handle.snapshot();
                assert!(predicate(&snapshot), "session ended before condition held");
                return snapshot;
            }
        }
    })
    .await
    .expect("condition not reached within timeout")
}

fn connected(snapshot: &CallSnapshot, expected_peers: usize) -> bool {
    snapshot.remote_streams.len() == expected_peers
        && snapshot
            .participants
            .iter()
            .all(|p| p.connection == ConnectionStatus::Connected)
}

#[tokio::test]
async fn test_room_waits_for_guest_then_activates() {
    let world = World::new();
    let host = UserId::new();
    let guest = UserId::new();
    let room = world.room(&host).await;

    let (host_ctx, _) = world.client();
    let mut host_call = CallSession::join(host_ctx, room.id.clone(), host)
        .await
        .unwrap();

    let snapshot = host_call.snapshot();
    assert_eq!(snapshot.status, RoomStatus::Waiting);
    assert!(snapshot.participants.is_empty());
    assert!(snapshot.call_started_at.is_none());

    let (guest_ctx, _) = world.client();
    let guest_call = CallSession::join(guest_ctx, room.id.clone(), guest)
        .await
        .unwrap();
    assert_eq!(guest_call.snapshot().status, RoomStatus::Active);

    // The host observes the activation through the guest's presence.
    wait_for(&mut host_call, |s| s.status == RoomStatus::Active).await;

    host_call.leave().await.unwrap();
    guest_call.leave().await.unwrap();
}

#[tokio::test]
async fn test_two_party_handshake_connects_both_sides() {
    let world = World::new();
    let host = UserId::new();
    let guest = UserId::new();
    let room = world.room(&host).await;

    let (host_ctx, _) = world.client();
    let (guest_ctx, _) = world.client();
    let mut host_call = CallSession::join(host_ctx, room.id.clone(), host.clone())
        .await
        .unwrap();
    let mut guest_call = CallSession::join(guest_ctx, room.id.clone(), guest.clone())
        .await
        .unwrap();

    let host_view = wait_for(&mut host_call, |s| connected(s, 1)).await;
    let guest_view = wait_for(&mut guest_call, |s| connected(s, 1)).await;

    assert!(host_view.remote_streams.contains_key(&guest));
    assert!(guest_view.remote_streams.contains_key(&host));
    assert!(host_view.call_started_at.is_some());
    assert!(guest_view.call_started_at.is_some());

    // Both sides persisted their transition to connected.
    let present = world.store.list_present(&room.id).await.unwrap();
    assert!(present.iter().all(|p| p.status.is_connected()));

    host_call.leave().await.unwrap();
    guest_call.leave().await.unwrap();
}

#[tokio::test]
async fn test_call_timer_starts_exactly_once() {
    let world = World::new();
    let host = UserId::new();
    let guest = UserId::new();
    let room = world.room(&host).await;

    let (host_ctx, host_factory) = world.client();
    let (guest_ctx, _) = world.client();
    let mut host_call = CallSession::join(host_ctx, room.id.clone(), host)
        .await
        .unwrap();
    let guest_call = CallSession::join(guest_ctx, room.id.clone(), guest.clone())
        .await
        .unwrap();

    let first = wait_for(&mut host_call, |s| s.call_started_at.is_some()).await;
    let started_at = first.call_started_at.unwrap();

    // A later state event must not restart the timer.
    let transport = host_factory.transport_to(&guest).unwrap();
    transport.force_state(PeerConnectionState::Connected);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(host_call.snapshot().call_started_at.unwrap(), started_at);

    host_call.leave().await.unwrap();
    guest_call.leave().await.unwrap();
}

#[tokio::test]
async fn test_third_participant_joins_full_mesh() {
    let world = World::new();
    let host = UserId::new();
    let g1 = UserId::new();
    let g2 = UserId::new();
    let room = world.room(&host).await;

    let (host_ctx, _) = world.client();
    let (g1_ctx, _) = world.client();
    let (g2_ctx, _) = world.client();

    let mut host_call = CallSession::join(host_ctx, room.id.clone(), host)
        .await
        .unwrap();
    let mut g1_call = CallSession::join(g1_ctx, room.id.clone(), g1)
        .await
        .unwrap();
    let mut g2_call = CallSession::join(g2_ctx, room.id.clone(), g2)
        .await
        .unwrap();

    // Every participant holds exactly participants-1 connections.
    for call in [&mut host_call, &mut g1_call, &mut g2_call] {
        let snapshot = wait_for(call, |s| connected(s, 2)).await;
        assert_eq!(snapshot.participants.len(), 2);
    }

    for call in [&host_call, &g1_call, &g2_call] {
        call.leave().await.unwrap();
    }
}

#[tokio::test]
async fn test_leave_tears_down_only_that_peer() {
    let world = World::new();
    let host = UserId::new();
    let g1 = UserId::new();
    let g2 = UserId::new();
    let room = world.room(&host).await;

    let (host_ctx, _) = world.client();
    let (g1_ctx, _) = world.client();
    let (g2_ctx, _) = world.client();

    let mut host_call = CallSession::join(host_ctx, room.id.clone(), host.clone())
        .await
        .unwrap();
    let mut g1_call = CallSession::join(g1_ctx, room.id.clone(), g1.clone())
        .await
        .unwrap();
    let mut g2_call = CallSession::join(g2_ctx, room.id.clone(), g2.clone())
        .await
        .unwrap();

    wait_for(&mut host_call, |s| connected(s, 2)).await;
    wait_for(&mut g2_call, |s| connected(s, 2)).await;
    wait_for(&mut g1_call, |s| connected(s, 2)).await;

    g1_call.leave().await.unwrap();

    // The leaver's side: fully torn down.
    let gone = g1_call.snapshot();
    assert!(!gone.in_call);
    assert!(gone.remote_streams.is_empty());
    assert!(gone.participants.is_empty());
    for track in gone.local_stream.tracks() {
        assert!(track.is_stopped());
    }

    // The remaining pair keeps talking, minus exactly one peer.
    let host_view = wait_for(&mut host_call, |s| s.remote_streams.len() == 1).await;
    assert!(!host_view.remote_streams.contains_key(&g1));
    assert!(host_view.remote_streams.contains_key(&g2));
    let g2_view = wait_for(&mut g2_call, |s| s.remote_streams.len() == 1).await;
    assert!(g2_view.remote_streams.contains_key(&host));

    // Persisted membership and the signaling bus both reflect the leave.
    let present = world.store.list_present(&room.id).await.unwrap();
    assert_eq!(present.len(), 2);
    assert!(present.iter().all(|p| p.user_id != g1));
    assert_eq!(world.hub.subscriber_count(&room.id), 2);

    host_call.leave().await.unwrap();
    g2_call.leave().await.unwrap();
    assert_eq!(world.hub.subscriber_count(&room.id), 0);
}

#[tokio::test]
async fn test_connection_failure_recovers_without_touching_siblings() {
    let world = World::new();
    let host = UserId::new();
    let g1 = UserId::new();
    let g2 = UserId::new();
    let room = world.room(&host).await;

    let (host_ctx, host_factory) = world.client();
    let (g1_ctx, _) = world.client();
    let (g2_ctx, _) = world.client();

    let mut host_call = CallSession::join(host_ctx, room.id.clone(), host)
        .await
        .unwrap();
    let g1_call = CallSession::join(g1_ctx, room.id.clone(), g1.clone())
        .await
        .unwrap();
    let g2_call = CallSession::join(g2_ctx, room.id.clone(), g2.clone())
        .await
        .unwrap();

    wait_for(&mut host_call, |s| connected(s, 2)).await;

    // Drop the host-g1 link; the session restarts ICE on that pair only.
    let failed = host_factory.transport_to(&g1).unwrap();
    failed.force_state(PeerConnectionState::Failed);

    tokio::time::timeout(Duration::from_secs(5), async {
        while failed.state() != PeerConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("ICE restart did not recover the connection");

    wait_for(&mut host_call, |s| {
        s.participants
            .iter()
            .all(|p| p.connection == ConnectionStatus::Connected)
    })
    .await;

    let sibling = host_factory.transport_to(&g2).unwrap();
    assert_eq!(sibling.state(), PeerConnectionState::Connected);

    for call in [&host_call, &g1_call, &g2_call] {
        call.leave().await.unwrap();
    }
}

#[tokio::test]
async fn test_rejoin_after_leave() {
    let world = World::new();
    let host = UserId::new();
    let guest = UserId::new();
    let room = world.room(&host).await;

    let (host_ctx, _) = world.client();
    let mut host_call = CallSession::join(host_ctx, room.id.clone(), host.clone())
        .await
        .unwrap();

    let (guest_ctx, _) = world.client();
    let guest_call = CallSession::join(guest_ctx, room.id.clone(), guest.clone())
        .await
        .unwrap();
    guest_call.leave().await.unwrap();
    wait_for(&mut host_call, |s| s.remote_streams.is_empty()).await;

    // A fresh session for the same user negotiates from scratch.
    let (guest_ctx, _) = world.client();
    let mut guest_call = CallSession::join(guest_ctx, room.id, guest)
        .await
        .unwrap();
    wait_for(&mut guest_call, |s| connected(s, 1)).await;
    wait_for(&mut host_call, |s| connected(s, 1)).await;

    host_call.leave().await.unwrap();
    guest_call.leave().await.unwrap();
}

/// Store whose first status write parks until released. Used to hold a
/// guest inside its join, before it subscribes to signaling, while
/// another guest joins end to end.
struct StalledActivationStore {
    inner: MemoryStore,
    stalled: AtomicBool,
    gate: Notify,
}

impl StalledActivationStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            stalled: AtomicBool::new(false),
            gate: Notify::new(),
        }
    }

    fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait::async_trait]
impl RoomStore for StalledActivationStore {
    async fn create_room(&self, room: &Room) -> huddle_core::Result<()> {
        self.inner.create_room(room).await
    }

    async fn get_room(&self, room_id: &RoomId) -> huddle_core::Result<Option<Room>> {
        self.inner.get_room(room_id).await
    }

    async fn set_room_status(
        &self,
        room_id: &RoomId,
        status: RoomStatus,
    ) -> huddle_core::Result<()> {
        if !self.stalled.swap(true, Ordering::SeqCst) {
            self.gate.notified().await;
        }
        self.inner.set_room_status(room_id, status).await
    }

    async fn upsert_participant(
        &self,
        participant: &Participant,
    ) -> huddle_core::Result<Participant> {
        self.inner.upsert_participant(participant).await
    }

    async fn mark_connected(&self, room_id: &RoomId, user_id: &UserId) -> huddle_core::Result<()> {
        self.inner.mark_connected(room_id, user_id).await
    }

    async fn mark_left(&self, room_id: &RoomId, user_id: &UserId) -> huddle_core::Result<()> {
        self.inner.mark_left(room_id, user_id).await
    }

    async fn list_present(&self, room_id: &RoomId) -> huddle_core::Result<Vec<Participant>> {
        self.inner.list_present(room_id).await
    }
}

#[tokio::test]
async fn test_overlapping_joins_still_converge() {
    let store = Arc::new(StalledActivationStore::new());
    let hub = SignalingHub::new();
    let rooms = RoomService::new(store.clone());

    let client = |store: &Arc<StalledActivationStore>, hub: &SignalingHub| CallContext {
        rooms: RoomService::new(store.clone()),
        hub: hub.clone(),
        media: Arc::new(SyntheticMediaSource::new()),
        transports: Arc::new(SimulatedTransportFactory::default()),
        directory: Arc::new(StaticDirectory::new()),
        config: CallConfig::default(),
    };

    let host = UserId::from("hhh");
    let small = UserId::from("aaa");
    let large = UserId::from("zzz");
    let room = rooms
        .create_room(host.clone(), RoomMetadata::default())
        .await
        .unwrap();

    let mut host_call = CallSession::join(client(&store, &hub), room.id.clone(), host)
        .await
        .unwrap();

    // The first guest parks inside its join before subscribing; the
    // second joins end to end within that window, so its presence
    // notice and its offer to the first are broadcast to nobody.
    let small_join = tokio::spawn(CallSession::join(
        client(&store, &hub),
        room.id.clone(),
        small,
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut large_call = CallSession::join(client(&store, &hub), room.id.clone(), large)
        .await
        .unwrap();

    store.release();
    let mut small_call = small_join.await.unwrap().unwrap();

    // The lost broadcasts are compensated: the store-known membership
    // drives the late joiner's offers, and the parked guest's presence
    // notice triggers a fresh offer for the one that went unheard.
    for call in [&mut host_call, &mut small_call, &mut large_call] {
        let snapshot = wait_for(call, |s| connected(s, 2)).await;
        assert_eq!(snapshot.participants.len(), 2);
    }

    for call in [&host_call, &small_call, &large_call] {
        call.leave().await.unwrap();
    }
}

#[tokio::test]
async fn test_leave_mid_negotiation_still_tears_down() {
    let world = World::new();
    let host = UserId::new();
    let g1 = UserId::new();
    let g2 = UserId::new();
    let room = world.room(&host).await;

    let (host_ctx, _) = world.client();
    let (g1_ctx, _) = world.client();
    let mut host_call = CallSession::join(host_ctx, room.id.clone(), host)
        .await
        .unwrap();
    let mut g1_call = CallSession::join(g1_ctx, room.id.clone(), g1)
        .await
        .unwrap();
    wait_for(&mut host_call, |s| connected(s, 1)).await;
    wait_for(&mut g1_call, |s| connected(s, 1)).await;

    // Leave the instant join returns, with every negotiation toward
    // the existing pair still in flight.
    let (g2_ctx, _) = world.client();
    let g2_call = CallSession::join(g2_ctx, room.id.clone(), g2.clone())
        .await
        .unwrap();
    g2_call.leave().await.unwrap();

    // Abandoned negotiations are torn down like finished ones.
    let gone = g2_call.snapshot();
    assert!(!gone.in_call);
    assert!(gone.remote_streams.is_empty());
    assert!(gone.participants.is_empty());
    for track in gone.local_stream.tracks() {
        assert!(track.is_stopped());
    }
    let present = world.store.list_present(&room.id).await.unwrap();
    assert_eq!(present.len(), 2);
    assert_eq!(world.hub.subscriber_count(&room.id), 2);

    // The remaining pair is left exactly as it was.
    let host_view = wait_for(&mut host_call, |s| {
        s.remote_streams.len() == 1 && s.participants.len() == 1
    })
    .await;
    assert!(!host_view.remote_streams.contains_key(&g2));
    wait_for(&mut g1_call, |s| {
        s.remote_streams.len() == 1 && s.participants.len() == 1
    })
    .await;

    host_call.leave().await.unwrap();
    g1_call.leave().await.unwrap();
}

#[tokio::test]
async fn test_ended_room_rejects_joins() {
    let world = World::new();
    let host = UserId::new();
    let room = world.room(&host).await;

    world.rooms.end_room(&room.id, &host).await.unwrap();

    let (ctx, _) = world.client();
    let err = CallSession::join(ctx, room.id, UserId::new()).await;
    assert!(matches!(err, Err(Error::InvalidInput(_))));
}
