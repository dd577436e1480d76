//! Named-event signaling protocol
//!
//! Every frame is `{"event": <name>, "data": <payload>}`. Inbound and
//! outbound events are closed enums so dispatch is an exhaustive match.

use crate::identity::PeerId;
use serde::{Deserialize, Serialize};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description as exchanged between browsers (`{type, sdp}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,

    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate (`RTCIceCandidateInit` shape)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Room member reference in presence events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRef {
    /// Signaling connection id
    #[serde(alias = "socketId")]
    pub peer_id: PeerId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl ParticipantRef {
    pub fn new(peer_id: impl Into<PeerId>) -> Self {
        Self {
            peer_id: peer_id.into(),
            user_id: None,
            user_name: None,
        }
    }
}

/// Events delivered by the signaling server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SignalingEvent {
    /// Handshake: the connection id the server assigned to us
    #[serde(rename_all = "camelCase")]
    Connected { peer_id: PeerId },

    /// Room members present before we joined
    ExistingUsers(Vec<ParticipantRef>),

    /// A member joined after us
    UserJoined(ParticipantRef),

    Offer {
        offer: SessionDescription,
        from: PeerId,
    },

    Answer {
        answer: SessionDescription,
        from: PeerId,
    },

    IceCandidate {
        /// `null` marks end of candidates
        candidate: Option<IceCandidate>,
        from: PeerId,
    },

    UserLeft(PeerId),

    #[serde(rename_all = "camelCase")]
    UserToggledAudio {
        #[serde(alias = "socketId")]
        peer_id: PeerId,
        is_enabled: bool,
    },

    #[serde(rename_all = "camelCase")]
    UserToggledVideo {
        #[serde(alias = "socketId")]
        peer_id: PeerId,
        is_enabled: bool,
    },

    /// Raised locally by the transport when the channel drops
    Disconnected { reason: String },
}

impl SignalingEvent {
    /// Parse an event frame
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to deserialize signaling event: {}",
                e
            ))
        })
    }

    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize signaling event: {}", e))
        })
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            SignalingEvent::Connected { .. } => "connected",
            SignalingEvent::ExistingUsers(_) => "existing-users",
            SignalingEvent::UserJoined(_) => "user-joined",
            SignalingEvent::Offer { .. } => "offer",
            SignalingEvent::Answer { .. } => "answer",
            SignalingEvent::IceCandidate { .. } => "ice-candidate",
            SignalingEvent::UserLeft(_) => "user-left",
            SignalingEvent::UserToggledAudio { .. } => "user-toggled-audio",
            SignalingEvent::UserToggledVideo { .. } => "user-toggled-video",
            SignalingEvent::Disconnected { .. } => "disconnected",
        }
    }
}

/// Negotiation payload routed to one peer session
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl NegotiationMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            NegotiationMessage::Offer(_) => "offer",
            NegotiationMessage::Answer(_) => "answer",
            NegotiationMessage::IceCandidate(_) => "ice-candidate",
        }
    }
}

/// Events sent to the signaling server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SignalingCommand {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        user_id: String,
        user_name: String,
    },

    Offer {
        offer: SessionDescription,
        to: PeerId,
        from: PeerId,
    },

    Answer {
        answer: SessionDescription,
        to: PeerId,
        from: PeerId,
    },

    IceCandidate {
        candidate: IceCandidate,
        to: PeerId,
        from: PeerId,
    },

    #[serde(rename_all = "camelCase")]
    ToggleAudio { room_id: String, is_enabled: bool },

    #[serde(rename_all = "camelCase")]
    ToggleVideo { room_id: String, is_enabled: bool },

    LeaveRoom(String),
}

impl SignalingCommand {
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to serialize signaling command: {}",
                e
            ))
        })
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to deserialize signaling command: {}",
                e
            ))
        })
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            SignalingCommand::JoinRoom { .. } => "join-room",
            SignalingCommand::Offer { .. } => "offer",
            SignalingCommand::Answer { .. } => "answer",
            SignalingCommand::IceCandidate { .. } => "ice-candidate",
            SignalingCommand::ToggleAudio { .. } => "toggle-audio",
            SignalingCommand::ToggleVideo { .. } => "toggle-video",
            SignalingCommand::LeaveRoom(_) => "leave-room",
        }
    }
}
