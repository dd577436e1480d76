//! Local capture and remote stream contracts

use crate::config::VideoConstraints;
use crate::identity::{CallKind, MediaKind};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Capture request derived from the call kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    /// `None` for audio-only calls
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    pub fn for_call(kind: CallKind, video: &VideoConstraints) -> Self {
        Self {
            audio: true,
            video: kind.has_video().then_some(*video),
        }
    }
}

/// One local capture track
///
/// Tracks are attached read-only to every peer; flipping `enabled` is seen by
/// all of them at once and never triggers renegotiation.
pub trait LocalTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// Release the capture; a stopped track never resumes
    fn stop(&self);

    fn is_stopped(&self) -> bool;

    /// Concrete track access for the connector that attaches it
    fn as_any(&self) -> &dyn Any;
}

/// Acquired local capture
pub trait LocalStream: Send + Sync {
    fn id(&self) -> &str;

    fn audio_tracks(&self) -> Vec<Arc<dyn LocalTrack>>;

    fn video_tracks(&self) -> Vec<Arc<dyn LocalTrack>>;

    fn tracks(&self) -> Vec<Arc<dyn LocalTrack>> {
        let mut tracks = self.audio_tracks();
        tracks.extend(self.video_tracks());
        tracks
    }

    fn stop(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

/// Device access
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire local capture
    ///
    /// # Errors
    ///
    /// `Error::DeviceAcquisition` when permission is denied or no device
    /// matches. Callers surface it and never retry on their own.
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Arc<dyn LocalStream>>;
}

/// Enable/stop flags shared by track implementations
#[derive(Debug)]
pub struct TrackFlags {
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl TrackFlags {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Media should be sent only while enabled and not stopped
    pub fn is_live(&self) -> bool {
        self.is_enabled() && !self.is_stopped()
    }
}

impl Default for TrackFlags {
    fn default() -> Self {
        Self::new(true)
    }
}

/// One inbound track from a remote participant
pub trait RemoteTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn as_any(&self) -> &dyn Any;
}

/// Inbound media from one peer, grouped by remote stream id
#[derive(Clone)]
pub struct RemoteStream {
    pub stream_id: String,
    pub tracks: Vec<Arc<dyn RemoteTrack>>,
}

impl RemoteStream {
    pub fn new(stream_id: impl Into<String>, first: Arc<dyn RemoteTrack>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: vec![first],
        }
    }

    /// Add a track unless one with the same id is already present
    pub fn add_track(&mut self, track: Arc<dyn RemoteTrack>) {
        if !self.tracks.iter().any(|t| t.id() == track.id()) {
            self.tracks.push(track);
        }
    }

    pub fn has_kind(&self, kind: MediaKind) -> bool {
        self.tracks.iter().any(|t| t.kind() == kind)
    }
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("stream_id", &self.stream_id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Local toggle flags surfaced to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMediaState {
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl LocalMediaState {
    pub fn for_call(kind: CallKind) -> Self {
        Self {
            audio_enabled: true,
            video_enabled: kind.has_video(),
        }
    }
}
