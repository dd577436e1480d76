//! MeshCall core - mesh audio/video room orchestration
//!
//! This crate coordinates a small multi-party call in which every participant
//! holds a direct media connection to every other participant. It owns the
//! room membership, one negotiation per remote peer, the local capture toggles
//! and the rules for ending a call. Media and connectivity backends plug in
//! through traits; the `meshcall-webrtc` crate provides the real ones.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  UI / CLI                                               │
//! │  ├─ CallHandle  (end request, confirm, back navigation) │
//! │  └─ SessionHandle (toggles, RoomSnapshot watch)         │
//! │     ↓                                                   │
//! │  CallController  (solo timer, presence records)         │
//! │  SessionManager actor                                   │
//! │  ├─ SignalingTransport (named events, join/leave)       │
//! │  ├─ MediaSource (local capture, shared tracks)          │
//! │  └─ per-peer workers                                    │
//! │      └─ PeerSession → PeerLink (PeerConnector)          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use meshcall_core::{MeshCallConfig, RoomLink};
//!
//! let config = MeshCallConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let link = RoomLink::parse("/call?callType=video&roomId=room-1&userName=Ada").unwrap();
//! assert_eq!(link.room_id, "room-1");
//! assert!(link.call_kind.has_video());
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod link;
pub mod media;
pub mod peer;
pub mod presence;
pub mod session;
pub mod signaling;

pub use config::{IceServerConfig, MeshCallConfig, PresenceConfig, VideoConstraints};
pub use error::{Error, Result};
pub use identity::{CallKind, LocalIdentity, MediaKind, NegotiationRole, PeerId};
pub use lifecycle::{CallController, CallHandle, CallInput, CallPhase, CallRecord, CallStatus, EndReason};
pub use link::RoomLink;
pub use media::{
    LocalMediaState, LocalStream, LocalTrack, MediaConstraints, MediaSource, RemoteStream,
    RemoteTrack, TrackFlags,
};
pub use peer::{ConnectionState, Connectivity, LinkEvent, PeerConnector, PeerLink};
pub use presence::{MemoryPresenceStore, PresenceRecord, PresenceStore};
pub use session::{PeerView, RoomPhase, RoomSnapshot, SessionHandle, SessionManager};
pub use signaling::{
    IceCandidate, NegotiationMessage, ParticipantRef, SessionDescription, SignalingCommand,
    SignalingEvent, SignalingTransport,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
