//! Error types for the call session core

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a room session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Room link could not be parsed or is incomplete
    #[error("Invalid room link: {0}")]
    InvalidLink(String),

    /// Local capture could not be acquired (permission denied, no device)
    #[error("Media device unavailable: {0}")]
    DeviceAcquisition(String),

    /// Signaling send/receive error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Signaling channel is gone
    #[error("Signaling transport disconnected: {0}")]
    TransportDisconnected(String),

    /// Event referenced a peer that is not in the active set
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Offer/answer production or application failed
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// ICE candidate could not be parsed or added
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Local or remote media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Presence record create/update failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Session actor has already shut down
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error must interrupt the user flow
    ///
    /// Everything else degrades gracefully: a failed peer disappears from the
    /// room, a failed presence write is only logged.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DeviceAcquisition(_) | Error::InvalidConfig(_) | Error::InvalidLink(_)
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_)
                | Error::TransportDisconnected(_)
                | Error::Persistence(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is scoped to a single peer
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerNotFound(_) | Error::Negotiation(_) | Error::IceCandidateError(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
