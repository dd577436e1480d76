//! Test harness for room session integration tests
//!
//! Provides an in-memory signaling server that relays named events the way
//! the production server does, plus media and connectivity backends whose
//! links report `Connected` once both descriptions are applied.

#![allow(dead_code)]

use async_trait::async_trait;
use meshcall_core::{
    CallKind, Connectivity, Error, IceCandidate, LinkEvent, LocalIdentity, LocalStream,
    LocalTrack, MediaConstraints, MediaKind, MediaSource, MeshCallConfig, ParticipantRef,
    PeerConnector, PeerId, PeerLink, PresenceRecord, PresenceStore, RemoteTrack, Result,
    RoomSnapshot, SessionDescription, SessionHandle, SessionManager, SignalingCommand,
    SignalingEvent, SignalingTransport, TrackFlags,
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Default wait for asynchronous conditions
pub const WAIT: Duration = Duration::from_secs(5);

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,meshcall_core=debug")
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Signaling
// ============================================================================

struct Client {
    events: mpsc::Sender<SignalingEvent>,
    room: Option<String>,
    user_name: Option<String>,
}

#[derive(Default)]
struct ServerState {
    clients: HashMap<PeerId, Client>,
    /// Join order per room
    rooms: HashMap<String, Vec<PeerId>>,
    log: Vec<(PeerId, SignalingCommand)>,
}

/// In-memory relay with the production server's routing rules
#[derive(Clone, Default)]
pub struct FakeSignalingServer {
    state: Arc<Mutex<ServerState>>,
    notify: Arc<Notify>,
}

impl FakeSignalingServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with a fixed id
    pub fn connect(&self, id: &str) -> (Arc<FakeTransport>, mpsc::Receiver<SignalingEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let peer_id = PeerId::from(id);
        self.state.lock().unwrap().clients.insert(
            peer_id.clone(),
            Client {
                events: tx,
                room: None,
                user_name: None,
            },
        );

        let transport = Arc::new(FakeTransport {
            peer_id,
            server: self.clone(),
            closed: AtomicBool::new(false),
        });
        (transport, rx)
    }

    /// Every command received so far, with its sender
    pub fn log(&self) -> Vec<(PeerId, SignalingCommand)> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn commands_from(&self, id: &str) -> Vec<SignalingCommand> {
        let id = PeerId::from(id);
        self.log()
            .into_iter()
            .filter(|(from, _)| from == &id)
            .map(|(_, c)| c)
            .collect()
    }

    /// Offers sent from `from` to `to`
    pub fn offers_between(&self, from: &str, to: &str) -> usize {
        self.commands_from(from)
            .iter()
            .filter(|c| matches!(c, SignalingCommand::Offer { to: t, .. } if t.as_str() == to))
            .count()
    }

    pub fn members(&self, room: &str) -> Vec<PeerId> {
        self.state
            .lock()
            .unwrap()
            .rooms
            .get(room)
            .cloned()
            .unwrap_or_default()
    }

    /// Inject an event for one client as if the server sent it
    pub fn inject(&self, id: &str, event: SignalingEvent) {
        let target = self
            .state
            .lock()
            .unwrap()
            .clients
            .get(&PeerId::from(id))
            .map(|c| c.events.clone());
        if let Some(target) = target {
            let _ = target.try_send(event);
        }
    }

    /// Wait until a command matching `pred` has been received
    pub async fn wait_for_command<F>(&self, pred: F) -> (PeerId, SignalingCommand)
    where
        F: Fn(&PeerId, &SignalingCommand) -> bool,
    {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if let Some(hit) = self.log().into_iter().find(|(from, c)| pred(from, c)) {
                    return hit;
                }
                notified.await;
            }
        };
        tokio::time::timeout(WAIT, wait)
            .await
            .expect("timed out waiting for signaling command")
    }

    fn route(&self, from: &PeerId, command: SignalingCommand) -> Result<()> {
        let mut deliveries: Vec<(mpsc::Sender<SignalingEvent>, SignalingEvent)> = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if !state.clients.contains_key(from) {
                return Err(Error::TransportDisconnected(format!("{} not connected", from)));
            }
            state.log.push((from.clone(), command.clone()));

            match command {
                SignalingCommand::JoinRoom {
                    room_id, user_name, ..
                } => {
                    let existing: Vec<PeerId> = state.rooms.get(&room_id).cloned().unwrap_or_default();
                    let refs: Vec<ParticipantRef> = existing
                        .iter()
                        .map(|id| ParticipantRef {
                            peer_id: id.clone(),
                            user_id: None,
                            user_name: state.clients.get(id).and_then(|c| c.user_name.clone()),
                        })
                        .collect();
                    if let Some(client) = state.clients.get_mut(from) {
                        client.room = Some(room_id.clone());
                        client.user_name = Some(user_name.clone());
                        deliveries.push((client.events.clone(), SignalingEvent::ExistingUsers(refs)));
                    }
                    for id in &existing {
                        if let Some(client) = state.clients.get(id) {
                            deliveries.push((
                                client.events.clone(),
                                SignalingEvent::UserJoined(ParticipantRef {
                                    peer_id: from.clone(),
                                    user_id: None,
                                    user_name: Some(user_name.clone()),
                                }),
                            ));
                        }
                    }
                    state.rooms.entry(room_id).or_default().push(from.clone());
                }
                SignalingCommand::Offer { offer, to, .. } => {
                    if let Some(client) = state.clients.get(&to) {
                        deliveries.push((
                            client.events.clone(),
                            SignalingEvent::Offer {
                                offer,
                                from: from.clone(),
                            },
                        ));
                    }
                }
                SignalingCommand::Answer { answer, to, .. } => {
                    if let Some(client) = state.clients.get(&to) {
                        deliveries.push((
                            client.events.clone(),
                            SignalingEvent::Answer {
                                answer,
                                from: from.clone(),
                            },
                        ));
                    }
                }
                SignalingCommand::IceCandidate { candidate, to, .. } => {
                    if let Some(client) = state.clients.get(&to) {
                        deliveries.push((
                            client.events.clone(),
                            SignalingEvent::IceCandidate {
                                candidate: Some(candidate),
                                from: from.clone(),
                            },
                        ));
                    }
                }
                SignalingCommand::ToggleAudio {
                    room_id,
                    is_enabled,
                } => {
                    for target in room_peers(&state, &room_id, from) {
                        deliveries.push((
                            target,
                            SignalingEvent::UserToggledAudio {
                                peer_id: from.clone(),
                                is_enabled,
                            },
                        ));
                    }
                }
                SignalingCommand::ToggleVideo {
                    room_id,
                    is_enabled,
                } => {
                    for target in room_peers(&state, &room_id, from) {
                        deliveries.push((
                            target,
                            SignalingEvent::UserToggledVideo {
                                peer_id: from.clone(),
                                is_enabled,
                            },
                        ));
                    }
                }
                SignalingCommand::LeaveRoom(room_id) => {
                    leave_room(&mut state, &room_id, from, &mut deliveries);
                }
            }
        }

        for (target, event) in deliveries {
            let _ = target.try_send(event);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    fn disconnect(&self, id: &PeerId) {
        let mut deliveries = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            let room = state.clients.get(id).and_then(|c| c.room.clone());
            if let Some(room) = room {
                leave_room(&mut state, &room, id, &mut deliveries);
            }
            state.clients.remove(id);
        }
        for (target, event) in deliveries {
            let _ = target.try_send(event);
        }
        self.notify.notify_waiters();
    }
}

fn room_peers(state: &ServerState, room: &str, except: &PeerId) -> Vec<mpsc::Sender<SignalingEvent>> {
    state
        .rooms
        .get(room)
        .map(|members| {
            members
                .iter()
                .filter(|id| *id != except)
                .filter_map(|id| state.clients.get(id).map(|c| c.events.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn leave_room(
    state: &mut ServerState,
    room: &str,
    id: &PeerId,
    deliveries: &mut Vec<(mpsc::Sender<SignalingEvent>, SignalingEvent)>,
) {
    if let Some(members) = state.rooms.get_mut(room) {
        members.retain(|m| m != id);
    }
    if let Some(client) = state.clients.get_mut(id) {
        client.room = None;
    }
    for target in room_peers(state, room, id) {
        deliveries.push((target, SignalingEvent::UserLeft(id.clone())));
    }
}

/// Client side of the fake server
pub struct FakeTransport {
    peer_id: PeerId,
    server: FakeSignalingServer,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SignalingTransport for FakeTransport {
    fn local_peer_id(&self) -> Option<PeerId> {
        Some(self.peer_id.clone())
    }

    async fn send(&self, command: SignalingCommand) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportDisconnected("transport closed".to_string()));
        }
        self.server.route(&self.peer_id, command)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.server.disconnect(&self.peer_id);
        }
        Ok(())
    }
}

// ============================================================================
// Media
// ============================================================================

#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: MediaKind,
    flags: TrackFlags,
}

impl LocalTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.flags.is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        self.flags.set_enabled(enabled)
    }

    fn stop(&self) {
        self.flags.stop()
    }

    fn is_stopped(&self) -> bool {
        self.flags.is_stopped()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockStream {
    id: String,
    audio: Vec<Arc<dyn LocalTrack>>,
    video: Vec<Arc<dyn LocalTrack>>,
}

impl LocalStream for MockStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn audio_tracks(&self) -> Vec<Arc<dyn LocalTrack>> {
        self.audio.clone()
    }

    fn video_tracks(&self) -> Vec<Arc<dyn LocalTrack>> {
        self.video.clone()
    }
}

/// Capture backend handing out flag-only tracks
#[derive(Default)]
pub struct MockMediaSource {
    deny: bool,
    acquired: Mutex<Vec<Arc<MockStream>>>,
}

impl MockMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that behaves like a denied permission prompt
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Default::default()
        }
    }

    pub fn acquisitions(&self) -> usize {
        self.acquired.lock().unwrap().len()
    }

    pub fn last_stream(&self) -> Option<Arc<MockStream>> {
        self.acquired.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MediaSource for MockMediaSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Arc<dyn LocalStream>> {
        if self.deny {
            return Err(Error::DeviceAcquisition("Permission denied".to_string()));
        }

        let n = self.acquisitions();
        let track = |kind: MediaKind| -> Arc<dyn LocalTrack> {
            Arc::new(MockTrack {
                id: format!("{}-{}", kind, n),
                kind,
                flags: TrackFlags::default(),
            })
        };
        let stream = Arc::new(MockStream {
            id: format!("stream-{}", n),
            audio: vec![track(MediaKind::Audio)],
            video: if constraints.video.is_some() {
                vec![track(MediaKind::Video)]
            } else {
                Vec::new()
            },
        });
        self.acquired.lock().unwrap().push(Arc::clone(&stream));
        Ok(stream)
    }
}

// ============================================================================
// Connectivity
// ============================================================================

#[derive(Debug)]
pub struct MockRemoteTrack {
    id: String,
    kind: MediaKind,
}

impl RemoteTrack for MockRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Link that "connects" once both descriptions are applied
pub struct MockLink {
    remote: PeerId,
    events: mpsc::UnboundedSender<LinkEvent>,
    local_set: AtomicBool,
    remote_set: AtomicBool,
    attached: Mutex<Vec<Arc<dyn LocalTrack>>>,
    candidates: Mutex<Vec<String>>,
    closed: AtomicBool,
    reject_remote: bool,
}

impl MockLink {
    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    pub fn attached(&self) -> Vec<Arc<dyn LocalTrack>> {
        self.attached.lock().unwrap().clone()
    }

    pub fn candidates(&self) -> Vec<String> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Simulate the connection reporting a state
    pub fn report(&self, connectivity: Connectivity) {
        let _ = self.events.send(LinkEvent::Connectivity(connectivity));
    }

    fn maybe_connected(&self) {
        if self.local_set.load(Ordering::Acquire) && self.remote_set.load(Ordering::Acquire) {
            self.report(Connectivity::Connected);
        }
    }
}

#[async_trait]
impl PeerLink for MockLink {
    async fn attach_track(&self, track: Arc<dyn LocalTrack>) -> Result<()> {
        self.attached.lock().unwrap().push(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(format!("offer-for-{}", self.remote)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer(format!("answer-for-{}", self.remote)))
    }

    async fn set_local_description(&self, _description: SessionDescription) -> Result<()> {
        self.local_set.store(true, Ordering::Release);
        let _ = self.events.send(LinkEvent::LocalCandidate(IceCandidate {
            candidate: format!("candidate:host-for-{}", self.remote),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }));
        self.maybe_connected();
        Ok(())
    }

    async fn set_remote_description(&self, _description: SessionDescription) -> Result<()> {
        if self.reject_remote {
            return Err(Error::Negotiation(format!(
                "remote description from {} rejected",
                self.remote
            )));
        }
        self.remote_set.store(true, Ordering::Release);
        let _ = self.events.send(LinkEvent::RemoteTrack {
            stream_id: format!("stream-of-{}", self.remote),
            track: Arc::new(MockRemoteTrack {
                id: format!("audio-of-{}", self.remote),
                kind: MediaKind::Audio,
            }),
        });
        self.maybe_connected();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if !self.remote_set.load(Ordering::Acquire) {
            return Err(Error::IceCandidateError(
                "candidate before remote description".to_string(),
            ));
        }
        self.candidates.lock().unwrap().push(candidate.candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Connector recording every link it creates
#[derive(Default)]
pub struct MockConnector {
    links: Mutex<Vec<Arc<MockLink>>>,
    created: AtomicUsize,
    reject_remote_from: Option<PeerId>,
    hold: bool,
    waiting: AtomicUsize,
    release: Notify,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links to `remote` fail to apply its description
    pub fn rejecting_remote_from(remote: &str) -> Self {
        Self {
            reject_remote_from: Some(PeerId::from(remote)),
            ..Default::default()
        }
    }

    /// `connect` parks until [`MockConnector::release`]
    pub fn held() -> Self {
        Self {
            hold: true,
            ..Default::default()
        }
    }

    /// Connects currently parked
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn release(&self) {
        self.release.notify_waiters();
    }

    pub fn links(&self) -> Vec<Arc<MockLink>> {
        self.links.lock().unwrap().clone()
    }

    pub fn link_to(&self, remote: &str) -> Option<Arc<MockLink>> {
        self.links()
            .into_iter()
            .rev()
            .find(|l| l.remote.as_str() == remote)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(
        &self,
        peer_id: &PeerId,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerLink>> {
        if self.hold {
            self.waiting.fetch_add(1, Ordering::AcqRel);
            let released = self.release.notified();
            let _parked = Parked(&self.waiting);
            released.await;
        }

        let link = Arc::new(MockLink {
            remote: peer_id.clone(),
            events,
            local_set: AtomicBool::new(false),
            remote_set: AtomicBool::new(false),
            attached: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            reject_remote: self.reject_remote_from.as_ref() == Some(peer_id),
        });
        self.links.lock().unwrap().push(Arc::clone(&link));
        self.created.fetch_add(1, Ordering::AcqRel);
        Ok(link)
    }
}

/// Decrements the parked count however `connect` ends
struct Parked<'a>(&'a AtomicUsize);

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// ============================================================================
// Presence
// ============================================================================

/// Store whose writes always fail
pub struct FailingPresenceStore;

#[async_trait]
impl PresenceStore for FailingPresenceStore {
    async fn record_join(
        &self,
        _meeting_url: &str,
        _room_id: &str,
        _caller_id: &str,
        _callee_ids: &[String],
        _caller_name: &str,
    ) -> Result<PresenceRecord> {
        Err(Error::Persistence("store unreachable".to_string()))
    }

    async fn mark_ended(&self, _caller_id: &str) -> Result<PresenceRecord> {
        Err(Error::Persistence("store unreachable".to_string()))
    }

    async fn list(&self, _room_id: Option<&str>) -> Result<Vec<PresenceRecord>> {
        Err(Error::Persistence("store unreachable".to_string()))
    }
}

/// In-memory store whose writes take `delay`
pub struct SlowPresenceStore {
    pub inner: meshcall_core::MemoryPresenceStore,
    pub delay: Duration,
}

impl SlowPresenceStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: meshcall_core::MemoryPresenceStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl PresenceStore for SlowPresenceStore {
    async fn record_join(
        &self,
        meeting_url: &str,
        room_id: &str,
        caller_id: &str,
        callee_ids: &[String],
        caller_name: &str,
    ) -> Result<PresenceRecord> {
        tokio::time::sleep(self.delay).await;
        self.inner
            .record_join(meeting_url, room_id, caller_id, callee_ids, caller_name)
            .await
    }

    async fn mark_ended(&self, caller_id: &str) -> Result<PresenceRecord> {
        self.inner.mark_ended(caller_id).await
    }

    async fn list(&self, room_id: Option<&str>) -> Result<Vec<PresenceRecord>> {
        self.inner.list(room_id).await
    }
}

// ============================================================================
// Participants
// ============================================================================

/// One joined participant with its backends
pub struct Participant {
    pub id: String,
    pub handle: SessionHandle,
    pub transport: Arc<FakeTransport>,
    pub media: Arc<MockMediaSource>,
    pub connector: Arc<MockConnector>,
}

impl Participant {
    /// Connect to `server` as `id`, then join `room`
    pub async fn join(
        server: &FakeSignalingServer,
        id: &str,
        room: &str,
        kind: CallKind,
    ) -> Result<Self> {
        Self::join_with(server, id, room, kind, MeshCallConfig::default()).await
    }

    pub async fn join_with(
        server: &FakeSignalingServer,
        id: &str,
        room: &str,
        kind: CallKind,
        config: MeshCallConfig,
    ) -> Result<Self> {
        Self::join_using(server, id, room, kind, config, MockConnector::new()).await
    }

    /// Join with a preconfigured connector
    pub async fn join_using(
        server: &FakeSignalingServer,
        id: &str,
        room: &str,
        kind: CallKind,
        config: MeshCallConfig,
        connector: MockConnector,
    ) -> Result<Self> {
        let (transport, events) = server.connect(id);
        let media = Arc::new(MockMediaSource::new());
        let connector = Arc::new(connector);

        let manager = SessionManager::new(
            config,
            transport.clone(),
            media.clone(),
            connector.clone(),
        );
        let handle = manager
            .start(
                room,
                LocalIdentity::new(format!("user-{}", id), format!("Name {}", id)),
                kind,
                events,
            )
            .await?;

        Ok(Self {
            id: id.to_string(),
            handle,
            transport,
            media,
            connector,
        })
    }

    /// Wait until the published room view satisfies `pred`
    pub async fn wait_for<F>(&self, pred: F) -> RoomSnapshot
    where
        F: Fn(&RoomSnapshot) -> bool,
    {
        wait_for_snapshot(&self.handle, pred).await
    }

    /// Wait until this participant is connected to every id in `peers`
    pub async fn wait_connected_to(&self, peers: &[&str]) -> RoomSnapshot {
        let expected: Vec<PeerId> = peers.iter().map(|p| PeerId::from(*p)).collect();
        self.wait_for(move |s| {
            s.peer_count() == expected.len()
                && expected.iter().all(|id| {
                    s.peer(id)
                        .map(|p| p.state == meshcall_core::ConnectionState::Connected)
                        .unwrap_or(false)
                })
        })
        .await
    }
}

/// Poll `check` until it holds
pub async fn eventually<F>(check: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

pub async fn wait_for_snapshot<F>(handle: &SessionHandle, pred: F) -> RoomSnapshot
where
    F: Fn(&RoomSnapshot) -> bool,
{
    let mut rx = handle.subscribe();
    let result = tokio::time::timeout(WAIT, async {
        rx.wait_for(|s| pred(s)).await.map(|s| s.clone())
    })
    .await;

    match result {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(_)) => panic!("session closed while waiting; last view {:?}", handle.snapshot()),
        Err(_) => panic!("timed out waiting; last view {:?}", handle.snapshot()),
    }
}
