//! Room session actor
//!
//! The [`SessionManager`] owns the local capture and the set of active peers
//! for one room membership. All inbound signaling, every peer report and every
//! UI command is applied by a single task, one at a time. Negotiation itself
//! runs on per-peer workers, so the actor never waits on a peer.

use super::handle::{SessionCommand, SessionHandle};
use super::snapshot::{PeerView, RoomPhase, RoomSnapshot};
use crate::config::MeshCallConfig;
use crate::identity::{CallKind, LocalIdentity, MediaKind, NegotiationRole, PeerId};
use crate::media::{LocalMediaState, LocalStream, MediaConstraints, MediaSource};
use crate::peer::session::initial_state;
use crate::peer::{
    spawn_peer_worker, ConnectionState, PeerConnector, PeerUpdate, PeerUpdateKind,
    PeerWorkerConfig, PeerWorkerHandle,
};
use crate::signaling::{
    NegotiationMessage, ParticipantRef, SignalingCommand, SignalingEvent, SignalingTransport,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

struct PeerEntry {
    view: PeerView,
    epoch: u64,
    worker: PeerWorkerHandle,
}

/// Orchestrates one room membership
pub struct SessionManager {
    config: MeshCallConfig,
    transport: Arc<dyn SignalingTransport>,
    media: Arc<dyn MediaSource>,
    connector: Arc<dyn PeerConnector>,

    phase: RoomPhase,
    room_id: Option<String>,
    identity: Option<LocalIdentity>,
    call_kind: CallKind,
    local_peer_id: Option<PeerId>,
    local_stream: Option<Arc<dyn LocalStream>>,
    local_media: LocalMediaState,
    signaling_connected: bool,

    peers: Vec<PeerEntry>,
    next_epoch: u64,
    updates_tx: mpsc::UnboundedSender<PeerUpdate>,
    updates_rx: Option<mpsc::UnboundedReceiver<PeerUpdate>>,
    snapshot_tx: watch::Sender<RoomSnapshot>,
}

impl SessionManager {
    pub fn new(
        config: MeshCallConfig,
        transport: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaSource>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(RoomSnapshot::idle(CallKind::Audio));

        Self {
            config,
            transport,
            media,
            connector,
            phase: RoomPhase::Idle,
            room_id: None,
            identity: None,
            call_kind: CallKind::Audio,
            local_peer_id: None,
            local_stream: None,
            local_media: LocalMediaState::for_call(CallKind::Audio),
            signaling_connected: false,
            peers: Vec::new(),
            next_epoch: 0,
            updates_tx,
            updates_rx: Some(updates_rx),
            snapshot_tx,
        }
    }

    /// Join the room and hand the membership to a background actor
    pub async fn start(
        mut self,
        room_id: &str,
        identity: LocalIdentity,
        call_kind: CallKind,
        events: mpsc::Receiver<SignalingEvent>,
    ) -> Result<SessionHandle> {
        self.join(room_id, identity, call_kind).await?;
        Ok(self.spawn(events))
    }

    /// Run the actor on its own task
    pub fn spawn(self, events: mpsc::Receiver<SignalingEvent>) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(self.config.event_buffer);
        let snapshot = self.snapshot_tx.subscribe();
        let local_stream = self.local_stream.clone();

        tokio::spawn(self.run(events, commands_rx));

        SessionHandle::new(commands_tx, snapshot, local_stream)
    }

    pub fn subscribe(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            phase: self.phase,
            room_id: self.room_id.clone(),
            local_peer_id: self.local_peer_id.clone(),
            call_kind: self.call_kind,
            local_media: self.local_media,
            signaling_connected: self.signaling_connected,
            peers: self.peers.iter().map(|p| p.view.clone()).collect(),
        }
    }

    /// Acquire local capture, then announce ourselves to the room
    ///
    /// # Errors
    ///
    /// `Error::DeviceAcquisition` when capture fails; nothing is sent to the
    /// signaling server in that case.
    #[instrument(skip_all, fields(room_id = %room_id, call_kind = %call_kind))]
    pub async fn join(
        &mut self,
        room_id: &str,
        identity: LocalIdentity,
        call_kind: CallKind,
    ) -> Result<()> {
        if self.phase != RoomPhase::Idle {
            return Err(Error::InternalError(format!(
                "join called in phase {:?}",
                self.phase
            )));
        }

        let constraints = MediaConstraints::for_call(call_kind, &self.config.video);
        let stream = self.media.acquire(&constraints).await.map_err(|e| match e {
            Error::DeviceAcquisition(_) => e,
            other => Error::DeviceAcquisition(other.to_string()),
        })?;

        if !call_kind.has_video() {
            for track in stream.video_tracks() {
                track.set_enabled(false);
            }
        }

        let local_peer_id = match self.transport.local_peer_id() {
            Some(id) => id,
            None => {
                stream.stop();
                return Err(Error::SignalingError(
                    "signaling handshake has not completed".to_string(),
                ));
            }
        };

        let join = SignalingCommand::JoinRoom {
            room_id: room_id.to_string(),
            user_id: identity.participant_id.clone(),
            user_name: identity.display_name.clone(),
        };
        if let Err(e) = self.transport.send(join).await {
            stream.stop();
            return Err(e);
        }

        info!(
            "Joined room {} as {} (peer {}, {} call)",
            room_id, identity.display_name, local_peer_id, call_kind
        );

        self.phase = RoomPhase::Joined;
        self.room_id = Some(room_id.to_string());
        self.identity = Some(identity);
        self.call_kind = call_kind;
        self.local_peer_id = Some(local_peer_id);
        self.local_stream = Some(stream);
        self.local_media = LocalMediaState::for_call(call_kind);
        self.signaling_connected = true;
        self.publish();

        Ok(())
    }

    /// Route one inbound signaling event
    pub async fn dispatch(&mut self, event: SignalingEvent) {
        if self.phase != RoomPhase::Joined {
            debug!("Dropping {} outside the room", event.event_name());
            return;
        }

        match event {
            SignalingEvent::Connected { peer_id } => {
                if self.local_peer_id.as_ref() != Some(&peer_id) {
                    warn!(
                        "Signaling reconnected as {}; room identity stays {:?}",
                        peer_id, self.local_peer_id
                    );
                }
                self.signaling_connected = true;
                self.publish();
            }
            SignalingEvent::ExistingUsers(users) => self.on_existing_participants(&users),
            SignalingEvent::UserJoined(user) => self.on_participant_joined(&user),
            SignalingEvent::Offer { offer, from } => {
                self.on_signaling_message(&from, NegotiationMessage::Offer(offer))
            }
            SignalingEvent::Answer { answer, from } => {
                self.on_signaling_message(&from, NegotiationMessage::Answer(answer))
            }
            SignalingEvent::IceCandidate {
                candidate: Some(candidate),
                from,
            } => self.on_signaling_message(&from, NegotiationMessage::IceCandidate(candidate)),
            SignalingEvent::IceCandidate {
                candidate: None,
                from,
            } => debug!("End of candidates from peer {}", from),
            SignalingEvent::UserLeft(peer_id) => self.on_participant_left(&peer_id),
            SignalingEvent::UserToggledAudio {
                peer_id,
                is_enabled,
            } => self.on_remote_toggle(&peer_id, MediaKind::Audio, is_enabled),
            SignalingEvent::UserToggledVideo {
                peer_id,
                is_enabled,
            } => self.on_remote_toggle(&peer_id, MediaKind::Video, is_enabled),
            SignalingEvent::Disconnected { reason } => {
                warn!("Signaling disconnected: {}", reason);
                self.signaling_connected = false;
                self.publish();
            }
        }
    }

    /// Members already in the room when we joined
    pub fn on_existing_participants(&mut self, participants: &[ParticipantRef]) {
        debug!("{} existing participants", participants.len());
        for participant in participants {
            if self.is_local(&participant.peer_id) {
                debug!("Skipping own entry in existing participants");
                continue;
            }
            if self.find(&participant.peer_id).is_some() {
                debug!("Peer {} already known", participant.peer_id);
                continue;
            }
            self.add_peer(participant);
        }
        self.publish();
    }

    /// A member joined after us
    pub fn on_participant_joined(&mut self, participant: &ParticipantRef) {
        if self.is_local(&participant.peer_id) {
            debug!("Ignoring own join announcement");
            return;
        }
        if self.find(&participant.peer_id).is_some() {
            warn!(
                "Duplicate join for peer {}; keeping existing session",
                participant.peer_id
            );
            return;
        }
        self.add_peer(participant);
        self.publish();
    }

    /// Route offer/answer/candidate traffic to the addressed peer
    pub fn on_signaling_message(&mut self, from: &PeerId, message: NegotiationMessage) {
        let Some(index) = self.find(from) else {
            warn!("Dropping {} from unknown peer {}", message.kind(), from);
            return;
        };

        if let Err(e) = self.peers[index].worker.deliver(message) {
            warn!("Peer {} stopped accepting messages: {}", from, e);
            self.remove_peer(index);
            self.publish();
        }
    }

    /// Tear down one peer; unknown ids are a no-op
    pub fn on_participant_left(&mut self, peer_id: &PeerId) {
        match self.find(peer_id) {
            Some(index) => {
                info!("Peer {} left", peer_id);
                self.remove_peer(index);
                self.publish();
            }
            None => debug!("Peer {} left but was not active", peer_id),
        }
    }

    /// Remote participant flipped a track
    pub fn on_remote_toggle(&mut self, peer_id: &PeerId, kind: MediaKind, enabled: bool) {
        let Some(index) = self.find(peer_id) else {
            debug!("Ignoring {} toggle from unknown peer {}", kind, peer_id);
            return;
        };

        let view = &mut self.peers[index].view;
        match kind {
            MediaKind::Audio => view.remote_audio_enabled = enabled,
            MediaKind::Video => view.remote_video_enabled = enabled,
        }
        debug!("Peer {} {} enabled={}", peer_id, kind, enabled);
        self.publish();
    }

    /// Enable or mute the local microphone for every peer at once
    pub async fn set_local_audio_enabled(&mut self, enabled: bool) -> Result<()> {
        self.set_local_enabled(MediaKind::Audio, enabled).await
    }

    /// Enable or blank the local camera; a no-op on audio calls
    pub async fn set_local_video_enabled(&mut self, enabled: bool) -> Result<()> {
        if !self.call_kind.has_video() {
            debug!("Ignoring video toggle on audio call");
            return Ok(());
        }
        self.set_local_enabled(MediaKind::Video, enabled).await
    }

    async fn set_local_enabled(&mut self, kind: MediaKind, enabled: bool) -> Result<()> {
        let room_id = match (&self.phase, &self.room_id) {
            (RoomPhase::Joined, Some(room_id)) => room_id.clone(),
            _ => {
                return Err(Error::SessionClosed(format!(
                    "cannot toggle {} outside the room",
                    kind
                )))
            }
        };
        let stream = self
            .local_stream
            .as_ref()
            .ok_or_else(|| Error::MediaTrackError("no local capture".to_string()))?;

        let tracks = match kind {
            MediaKind::Audio => stream.audio_tracks(),
            MediaKind::Video => stream.video_tracks(),
        };
        if tracks.is_empty() {
            return Err(Error::MediaTrackError(format!("no local {} track", kind)));
        }
        for track in &tracks {
            track.set_enabled(enabled);
        }

        let command = match kind {
            MediaKind::Audio => {
                self.local_media.audio_enabled = enabled;
                SignalingCommand::ToggleAudio {
                    room_id,
                    is_enabled: enabled,
                }
            }
            MediaKind::Video => {
                self.local_media.video_enabled = enabled;
                SignalingCommand::ToggleVideo {
                    room_id,
                    is_enabled: enabled,
                }
            }
        };
        info!("Local {} enabled={}", kind, enabled);
        self.publish();

        // Peers catch up from the next toggle or from their own join
        if let Err(e) = self.transport.send(command).await {
            warn!("Failed to broadcast {} toggle: {}", kind, e);
        }
        Ok(())
    }

    /// Flip the local microphone, returning the new state
    pub async fn toggle_audio(&mut self) -> Result<bool> {
        let next = !self.local_media.audio_enabled;
        self.set_local_audio_enabled(next).await?;
        Ok(next)
    }

    /// Flip the local camera, returning the new state
    pub async fn toggle_video(&mut self) -> Result<bool> {
        if !self.call_kind.has_video() {
            return Ok(false);
        }
        let next = !self.local_media.video_enabled;
        self.set_local_video_enabled(next).await?;
        Ok(next)
    }

    /// Leave the room and release everything; repeated calls are no-ops
    pub async fn leave(&mut self) -> Result<()> {
        if self.phase == RoomPhase::Left {
            debug!("leave() called again; nothing to do");
            return Ok(());
        }
        let was_joined = self.phase == RoomPhase::Joined;
        self.phase = RoomPhase::Left;

        let peers = std::mem::take(&mut self.peers);
        let closing = peers.len();
        futures::future::join_all(peers.into_iter().map(|p| p.worker.shutdown())).await;

        if let Some(stream) = self.local_stream.take() {
            stream.stop();
        }

        if was_joined {
            if let Some(room_id) = &self.room_id {
                if let Err(e) = self
                    .transport
                    .send(SignalingCommand::LeaveRoom(room_id.clone()))
                    .await
                {
                    warn!("Failed to announce leave: {}", e);
                }
            }
        }
        if let Err(e) = self.transport.close().await {
            warn!("Failed to close signaling transport: {}", e);
        }

        self.signaling_connected = false;
        self.publish();
        info!(
            "{} left room {} ({} peer sessions closed)",
            self.identity
                .as_ref()
                .map(|i| i.display_name.as_str())
                .unwrap_or("Local user"),
            self.room_id.as_deref().unwrap_or("-"),
            closing
        );

        Ok(())
    }

    /// Apply a report from a peer worker
    pub fn handle_peer_update(&mut self, update: PeerUpdate) {
        let Some(index) = self.find(&update.peer_id) else {
            debug!("Update for inactive peer {}", update.peer_id);
            return;
        };
        if self.peers[index].epoch != update.epoch {
            debug!(
                "Stale update for peer {} (epoch {} != {})",
                update.peer_id, update.epoch, self.peers[index].epoch
            );
            return;
        }

        match update.kind {
            PeerUpdateKind::State(ConnectionState::Closed) => {
                info!("Peer session {} closed", update.peer_id);
                self.remove_peer(index);
            }
            PeerUpdateKind::State(state) => {
                if state == ConnectionState::Connected {
                    info!("Peer {} connected", update.peer_id);
                }
                self.peers[index].view.state = state;
            }
            PeerUpdateKind::Stream(stream) => {
                self.peers[index].view.remote_stream = Some(stream);
            }
            PeerUpdateKind::Failed(reason) => {
                warn!("Dropping peer {}: {}", update.peer_id, reason);
                self.remove_peer(index);
            }
        }
        self.publish();
    }

    #[instrument(skip_all, fields(peer_id = %participant.peer_id))]
    fn add_peer(&mut self, participant: &ParticipantRef) {
        let Some(local_peer_id) = self.local_peer_id.clone() else {
            error!("Cannot add peer {} before join", participant.peer_id);
            return;
        };
        let Some(tracks) = self.local_stream.as_ref().map(|s| s.tracks()) else {
            error!("Cannot add peer {} without local capture", participant.peer_id);
            return;
        };
        if self.peers.len() >= self.config.max_peers {
            warn!(
                "Maximum peer limit reached ({}); ignoring {}",
                self.config.max_peers, participant.peer_id
            );
            return;
        }

        let peer_id = participant.peer_id.clone();
        let role = NegotiationRole::for_pair(&local_peer_id, &peer_id);
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        info!("Adding peer {} as {:?}", peer_id, role);

        let worker = spawn_peer_worker(PeerWorkerConfig {
            peer_id: peer_id.clone(),
            local_peer_id,
            epoch,
            tracks,
            connector: Arc::clone(&self.connector),
            transport: Arc::clone(&self.transport),
            updates: self.updates_tx.clone(),
        });

        self.peers.push(PeerEntry {
            view: PeerView {
                peer_id,
                display_name: participant.user_name.clone(),
                role,
                state: initial_state(role),
                remote_stream: None,
                remote_audio_enabled: true,
                remote_video_enabled: self.call_kind.has_video(),
            },
            epoch,
            worker,
        });
    }

    fn remove_peer(&mut self, index: usize) {
        let entry = self.peers.remove(index);
        entry.worker.close();
    }

    fn find(&self, peer_id: &PeerId) -> Option<usize> {
        self.peers.iter().position(|p| &p.view.peer_id == peer_id)
    }

    fn is_local(&self, peer_id: &PeerId) -> bool {
        self.local_peer_id.as_ref() == Some(peer_id)
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::SetAudio { enabled, reply } => {
                let _ = reply.send(self.set_local_audio_enabled(enabled).await);
            }
            SessionCommand::SetVideo { enabled, reply } => {
                let _ = reply.send(self.set_local_video_enabled(enabled).await);
            }
            SessionCommand::ToggleAudio { reply } => {
                let _ = reply.send(self.toggle_audio().await);
            }
            SessionCommand::ToggleVideo { reply } => {
                let _ = reply.send(self.toggle_video().await);
            }
            SessionCommand::Leave { reply } => {
                let _ = reply.send(self.leave().await);
                return true;
            }
        }
        false
    }

    async fn run(
        mut self,
        mut events: mpsc::Receiver<SignalingEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) {
        let Some(mut updates) = self.updates_rx.take() else {
            error!("Session actor started twice");
            return;
        };
        let mut events_open = true;

        loop {
            let input = tokio::select! {
                biased;
                command = commands.recv() => ActorInput::Command(command),
                Some(update) = updates.recv() => ActorInput::Peer(update),
                event = events.recv(), if events_open => ActorInput::Signaling(event),
            };

            match input {
                ActorInput::Command(Some(command)) => {
                    if self.handle_command(command).await {
                        break;
                    }
                }
                ActorInput::Command(None) => {
                    debug!("All session handles dropped; leaving");
                    if let Err(e) = self.leave().await {
                        warn!("Leave failed: {}", e);
                    }
                    break;
                }
                ActorInput::Peer(update) => self.handle_peer_update(update),
                ActorInput::Signaling(Some(event)) => self.dispatch(event).await,
                ActorInput::Signaling(None) => {
                    warn!("Signaling event stream ended");
                    events_open = false;
                    self.signaling_connected = false;
                    self.publish();
                }
            }
        }

        debug!("Session actor exited");
    }
}

enum ActorInput {
    Command(Option<SessionCommand>),
    Peer(PeerUpdate),
    Signaling(Option<SignalingEvent>),
}
