//! Read-only room view published to the UI

use crate::identity::{CallKind, NegotiationRole, PeerId};
use crate::media::{LocalMediaState, RemoteStream};
use crate::peer::ConnectionState;

/// Room membership phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Idle,
    Joined,
    /// Terminal; the snapshot no longer changes
    Left,
}

/// One remote participant as seen by the UI
#[derive(Debug, Clone)]
pub struct PeerView {
    pub peer_id: PeerId,
    pub display_name: Option<String>,
    pub role: NegotiationRole,
    pub state: ConnectionState,
    pub remote_stream: Option<RemoteStream>,
    pub remote_audio_enabled: bool,
    pub remote_video_enabled: bool,
}

impl PeerView {
    /// Label for the participant tile
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or_else(|| self.peer_id.as_str())
    }
}

/// Consistent picture of the room at one instant
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub phase: RoomPhase,
    pub room_id: Option<String>,
    pub local_peer_id: Option<PeerId>,
    pub call_kind: CallKind,
    pub local_media: LocalMediaState,
    pub signaling_connected: bool,
    /// Active peers in discovery order
    pub peers: Vec<PeerView>,
}

impl RoomSnapshot {
    pub fn idle(call_kind: CallKind) -> Self {
        Self {
            phase: RoomPhase::Idle,
            room_id: None,
            local_peer_id: None,
            call_kind,
            local_media: LocalMediaState::for_call(call_kind),
            signaling_connected: false,
            peers: Vec::new(),
        }
    }

    pub fn peer(&self, peer_id: &PeerId) -> Option<&PeerView> {
        self.peers.iter().find(|p| &p.peer_id == peer_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn connected_count(&self) -> usize {
        self.peers
            .iter()
            .filter(|p| p.state == ConnectionState::Connected)
            .count()
    }

    /// No remote peers while joined
    pub fn is_solo(&self) -> bool {
        self.phase == RoomPhase::Joined && self.peers.is_empty()
    }
}
