//! Per-peer negotiation state machine
//!
//! A [`PeerSession`] owns one [`PeerLink`] and runs the offer/answer exchange
//! with one remote participant. It is driven by exactly one worker task, so
//! every method takes `&mut self` and negotiation messages for the same peer
//! are applied strictly in arrival order.

use super::link::{Connectivity, LinkEvent, PeerLink};
use crate::identity::{NegotiationRole, PeerId};
use crate::media::{LocalTrack, RemoteStream};
use crate::signaling::{
    IceCandidate, NegotiationMessage, SessionDescription, SignalingCommand, SignalingTransport,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Negotiation state of one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the remote offer
    Connecting,
    /// Offer/answer exchange in progress
    Negotiating,
    /// Connectivity reported usable
    Connected,
    /// Terminal
    Closed,
}

impl ConnectionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

/// Report from a peer session to the room
#[derive(Debug, Clone)]
pub struct PeerUpdate {
    pub peer_id: PeerId,
    /// Generation of the session that produced the update
    pub epoch: u64,
    pub kind: PeerUpdateKind,
}

#[derive(Debug, Clone)]
pub enum PeerUpdateKind {
    State(ConnectionState),
    Stream(RemoteStream),
    /// Negotiation failed; the session closes itself afterwards
    Failed(String),
}

/// Negotiation with one remote participant
pub struct PeerSession {
    peer_id: PeerId,
    local_peer_id: PeerId,
    role: NegotiationRole,
    epoch: u64,
    state: ConnectionState,
    link: Arc<dyn PeerLink>,
    transport: Arc<dyn SignalingTransport>,
    updates: mpsc::UnboundedSender<PeerUpdate>,

    /// Set once the remote description has been applied
    remote_description_set: bool,
    /// Candidates that arrived before the remote description
    pending_candidates: Vec<IceCandidate>,
    remote_stream: Option<RemoteStream>,
}

impl PeerSession {
    pub fn new(
        peer_id: PeerId,
        local_peer_id: PeerId,
        epoch: u64,
        link: Arc<dyn PeerLink>,
        transport: Arc<dyn SignalingTransport>,
        updates: mpsc::UnboundedSender<PeerUpdate>,
    ) -> Self {
        let role = NegotiationRole::for_pair(&local_peer_id, &peer_id);
        let state = initial_state(role);

        Self {
            peer_id,
            local_peer_id,
            role,
            epoch,
            state,
            link,
            transport,
            updates,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            remote_stream: None,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    /// Attach the shared local tracks; the initiator then sends its offer
    pub async fn start(&mut self, tracks: &[Arc<dyn LocalTrack>]) -> Result<()> {
        for track in tracks {
            self.link.attach_track(Arc::clone(track)).await?;
        }

        if self.role == NegotiationRole::Initiator {
            let offer = self.link.create_offer().await?;
            self.link.set_local_description(offer.clone()).await?;
            self.send(SignalingCommand::Offer {
                offer,
                to: self.peer_id.clone(),
                from: self.local_peer_id.clone(),
            })
            .await?;
            info!("Sent offer to peer {}", self.peer_id);
        } else {
            debug!("Waiting for offer from peer {}", self.peer_id);
        }

        Ok(())
    }

    /// Apply one negotiation message from the remote peer
    pub async fn handle_negotiation(&mut self, message: NegotiationMessage) -> Result<()> {
        if self.is_closed() {
            debug!(
                "Ignoring {} for closed session {}",
                message.kind(),
                self.peer_id
            );
            return Ok(());
        }

        match message {
            NegotiationMessage::Offer(offer) => self.handle_offer(offer).await,
            NegotiationMessage::Answer(answer) => self.handle_answer(answer).await,
            NegotiationMessage::IceCandidate(candidate) => self.handle_candidate(candidate).await,
        }
    }

    async fn handle_offer(&mut self, offer: SessionDescription) -> Result<()> {
        if self.role == NegotiationRole::Initiator {
            warn!(
                "Ignoring offer from peer {}: local side initiates this pair",
                self.peer_id
            );
            return Ok(());
        }
        if self.remote_description_set {
            warn!("Ignoring repeated offer from peer {}", self.peer_id);
            return Ok(());
        }

        self.set_state(ConnectionState::Negotiating);
        self.apply_remote_description(offer).await?;

        let answer = self.link.create_answer().await?;
        self.link.set_local_description(answer.clone()).await?;
        self.send(SignalingCommand::Answer {
            answer,
            to: self.peer_id.clone(),
            from: self.local_peer_id.clone(),
        })
        .await?;
        info!("Sent answer to peer {}", self.peer_id);

        Ok(())
    }

    async fn handle_answer(&mut self, answer: SessionDescription) -> Result<()> {
        if self.role == NegotiationRole::Responder {
            warn!(
                "Ignoring answer from peer {}: no offer was sent",
                self.peer_id
            );
            return Ok(());
        }
        if self.remote_description_set {
            warn!("Ignoring repeated answer from peer {}", self.peer_id);
            return Ok(());
        }

        self.apply_remote_description(answer).await?;
        debug!("Applied answer from peer {}", self.peer_id);
        Ok(())
    }

    async fn handle_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if !self.remote_description_set {
            debug!(
                "Buffering candidate from peer {} ({} pending)",
                self.peer_id,
                self.pending_candidates.len() + 1
            );
            self.pending_candidates.push(candidate);
            return Ok(());
        }

        self.link
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| Error::IceCandidateError(format!("peer {}: {}", self.peer_id, e)))
    }

    /// Apply the remote description then replay buffered candidates in order
    async fn apply_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        self.link.set_remote_description(description).await?;
        self.remote_description_set = true;

        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            debug!(
                "Replaying {} buffered candidates for peer {}",
                pending.len(),
                self.peer_id
            );
        }
        for candidate in pending {
            self.link
                .add_ice_candidate(candidate)
                .await
                .map_err(|e| Error::IceCandidateError(format!("peer {}: {}", self.peer_id, e)))?;
        }

        Ok(())
    }

    /// React to a callback from the underlying connection
    pub async fn handle_link_event(&mut self, event: LinkEvent) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        match event {
            LinkEvent::LocalCandidate(candidate) => {
                self.send(SignalingCommand::IceCandidate {
                    candidate,
                    to: self.peer_id.clone(),
                    from: self.local_peer_id.clone(),
                })
                .await?;
            }
            LinkEvent::Connectivity(connectivity) => {
                info!("Peer {} connectivity: {:?}", self.peer_id, connectivity);
                match connectivity {
                    Connectivity::Connected => self.set_state(ConnectionState::Connected),
                    Connectivity::Failed => {
                        return Err(Error::Negotiation(format!(
                            "connectivity to peer {} failed",
                            self.peer_id
                        )));
                    }
                    Connectivity::Closed => self.close().await,
                    Connectivity::New | Connectivity::Connecting | Connectivity::Disconnected => {}
                }
            }
            LinkEvent::RemoteTrack { stream_id, track } => {
                debug!(
                    "Remote {} track {} from peer {}",
                    track.kind(),
                    track.id(),
                    self.peer_id
                );
                let stream = match self.remote_stream.take() {
                    Some(mut stream) if stream.stream_id == stream_id => {
                        stream.add_track(track);
                        stream
                    }
                    _ => RemoteStream::new(stream_id, track),
                };
                self.remote_stream = Some(stream.clone());
                self.report(PeerUpdateKind::Stream(stream));
            }
        }

        Ok(())
    }

    /// Report a terminal failure, then close
    pub async fn fail(&mut self, error: Error) {
        if self.is_closed() {
            return;
        }
        warn!("Peer session {} failed: {}", self.peer_id, error);
        self.report(PeerUpdateKind::Failed(error.to_string()));
        self.close().await;
    }

    /// Release the connection; idempotent
    pub async fn close(&mut self) {
        if self.is_closed() {
            return;
        }

        self.pending_candidates.clear();
        if let Err(e) = self.link.close().await {
            warn!("Failed to close connection to peer {}: {}", self.peer_id, e);
        }
        self.set_state(ConnectionState::Closed);
        debug!("Peer session {} closed", self.peer_id);
    }

    async fn send(&self, command: SignalingCommand) -> Result<()> {
        self.transport.send(command).await
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(
            "Peer {} state {:?} -> {:?}",
            self.peer_id, self.state, state
        );
        self.state = state;
        self.report(PeerUpdateKind::State(state));
    }

    fn report(&self, kind: PeerUpdateKind) {
        // Receiver is gone only while the room is shutting down
        let _ = self.updates.send(PeerUpdate {
            peer_id: self.peer_id.clone(),
            epoch: self.epoch,
            kind,
        });
    }
}

/// State a new session starts in for the given role
pub fn initial_state(role: NegotiationRole) -> ConnectionState {
    match role {
        NegotiationRole::Initiator => ConnectionState::Negotiating,
        NegotiationRole::Responder => ConnectionState::Connecting,
    }
}
