//! MeshCall WebRTC transport
//!
//! Production collaborators for [`meshcall_core`]:
//!
//! - [`WebRtcConnector`]: one webrtc-rs `RTCPeerConnection` per remote
//!   participant, with trickled ICE and per-peer connectivity reports
//! - [`SampleMediaSource`]: sample-fed Opus/VP8 tracks shared by the whole
//!   mesh
//! - [`WsSignalingTransport`]: the named-event room protocol over a
//!   WebSocket
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  meshcall CLI                                │
//! │     ↓                                        │
//! │  meshcall_core::SessionManager               │
//! │  ├─ WsSignalingTransport (tokio-tungstenite) │
//! │  ├─ SampleMediaSource (static sample tracks) │
//! │  └─ WebRtcConnector → WebRtcLink (webrtc-rs) │
//! └──────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod connector;
pub mod media;
pub mod signaling;

pub use connector::{WebRtcConnector, WebRtcLink, WebRtcRemoteTrack};
pub use media::{SampleMediaSource, SampleStream, SampleTrack, AUDIO_FRAME};
pub use signaling::WsSignalingTransport;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
