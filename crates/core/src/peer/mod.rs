//! Peer sessions: one negotiation per remote participant

pub mod link;
pub mod session;
pub mod worker;

pub use link::{Connectivity, LinkEvent, PeerConnector, PeerLink};
pub use session::{ConnectionState, PeerSession, PeerUpdate, PeerUpdateKind};
pub use worker::{spawn_peer_worker, PeerWorkerConfig, PeerWorkerHandle};
