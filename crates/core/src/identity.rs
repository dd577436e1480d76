//! Participant identifiers, call kinds and the glare tie-break

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Connection identifier assigned by the signaling layer
///
/// Unique per signaling connection. The application never mints these; it
/// only compares them (self-exclusion, glare resolution) and uses them as
/// addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier ordering used for glare resolution
    ///
    /// Two purely numeric identifiers compare numerically, anything else
    /// compares lexicographically. Both ends of a pair evaluate the same
    /// ordering, so they always agree on who initiates.
    pub fn negotiation_order(&self, other: &PeerId) -> Ordering {
        match (self.0.parse::<u128>(), other.0.parse::<u128>()) {
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Who produces the offer for a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// Produces the offer
    Initiator,
    /// Waits for the offer and answers it
    Responder,
}

impl NegotiationRole {
    /// Role of `local` towards `remote`: the lower identifier initiates
    pub fn for_pair(local: &PeerId, remote: &PeerId) -> Self {
        match local.negotiation_order(remote) {
            Ordering::Less => NegotiationRole::Initiator,
            _ => NegotiationRole::Responder,
        }
    }
}

/// Application-level identity of the local participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    /// Application user id (`userId` on the wire)
    pub participant_id: String,

    /// Display name (`userName` on the wire)
    pub display_name: String,
}

impl LocalIdentity {
    pub fn new(participant_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Call type chosen when the room is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    /// Microphone only
    Audio,
    /// Microphone and camera
    Video,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Audio => "audio",
            CallKind::Video => "video",
        }
    }

    pub fn has_video(&self) -> bool {
        matches!(self, CallKind::Video)
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" => Ok(CallKind::Audio),
            "video" => Ok(CallKind::Video),
            other => Err(Error::InvalidLink(format!(
                "callType must be 'audio' or 'video', got '{}'",
                other
            ))),
        }
    }
}

/// Track kind addressed by a toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}
