//! Signaling transport contract and wire protocol
//!
//! The transport is an external collaborator: a persistent, ordered,
//! bidirectional named-event channel. Inbound events reach the session actor
//! through an `mpsc` receiver handed over by the transport; outbound events go
//! through [`SignalingTransport::send`].

pub mod protocol;

pub use protocol::{
    IceCandidate, NegotiationMessage, ParticipantRef, SdpKind, SessionDescription,
    SignalingCommand, SignalingEvent,
};

use crate::identity::PeerId;
use crate::Result;
use async_trait::async_trait;

/// Outbound half of the signaling channel
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Connection id assigned by the server, once the handshake completed
    fn local_peer_id(&self) -> Option<PeerId>;

    /// Queue an event for delivery
    async fn send(&self, command: SignalingCommand) -> Result<()>;

    /// Release the connection; later sends fail
    async fn close(&self) -> Result<()>;
}
