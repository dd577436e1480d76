//! Connectivity backend seam
//!
//! A [`PeerLink`] is one underlying peer connection (ICE/DTLS/SRTP stack).
//! The core only drives it; everything the connection reports back arrives as
//! [`LinkEvent`]s on the channel handed to [`PeerConnector::connect`].

use crate::identity::PeerId;
use crate::media::{LocalTrack, RemoteTrack};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transport-level connectivity as reported by the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    New,
    Connecting,
    Connected,
    /// Transient loss; may recover without intervention
    Disconnected,
    Failed,
    Closed,
}

/// Callback traffic from a peer connection
#[derive(Debug)]
pub enum LinkEvent {
    /// Locally gathered candidate to trickle to the remote side
    LocalCandidate(IceCandidate),

    Connectivity(Connectivity),

    /// Inbound media arrived
    RemoteTrack {
        stream_id: String,
        track: Arc<dyn RemoteTrack>,
    },
}

/// One underlying peer connection
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Attach a shared local track for sending
    async fn attach_track(&self, track: Arc<dyn LocalTrack>) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Release connectivity resources
    async fn close(&self) -> Result<()>;
}

/// Factory for peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Open a connection towards `peer_id`, reporting through `events`
    async fn connect(
        &self,
        peer_id: &PeerId,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerLink>>;
}
