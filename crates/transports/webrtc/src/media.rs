//! Sample-fed local capture
//!
//! Each [`SampleTrack`] wraps a `TrackLocalStaticSample` that is attached to
//! every peer connection at once. Writes go through the track's enable flag,
//! so muting stops media for the whole mesh without renegotiation.
//!
//! [`SampleMediaSource`] has no capture device behind it: it produces Opus
//! silence on the audio track and leaves video to whoever feeds
//! [`SampleTrack::write_sample`].

use async_trait::async_trait;
use bytes::Bytes;
use meshcall_core::{
    Error, LocalStream, LocalTrack, MediaConstraints, MediaKind, MediaSource, Result, TrackFlags,
};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Opus frame length used for the silence feed
pub const AUDIO_FRAME: Duration = Duration::from_millis(20);

/// Single Opus packet decoding to 20ms of silence
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Local track shared by every peer connection
pub struct SampleTrack {
    id: String,
    kind: MediaKind,
    track: Arc<TrackLocalStaticSample>,
    flags: TrackFlags,
}

impl SampleTrack {
    /// Opus, 48kHz stereo
    pub fn audio(stream_id: &str) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        };
        Self::new(MediaKind::Audio, capability, stream_id)
    }

    /// VP8 at the RTP video clock
    pub fn video(stream_id: &str) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        };
        Self::new(MediaKind::Video, capability, stream_id)
    }

    fn new(kind: MediaKind, capability: RTCRtpCodecCapability, stream_id: &str) -> Self {
        let id = format!("{}-{}", kind, uuid::Uuid::new_v4());
        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            id.clone(),
            stream_id.to_owned(),
        ));
        Self {
            id,
            kind,
            track,
            flags: TrackFlags::default(),
        }
    }

    /// The RTP track handed to `add_track`
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    /// Write one encoded frame to every attached connection
    ///
    /// Returns `false` without writing while the track is muted or stopped.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use bytes::Bytes;
    /// use meshcall_core::LocalTrack;
    /// use meshcall_webrtc::{SampleTrack, AUDIO_FRAME};
    ///
    /// let track = SampleTrack::audio("stream-1");
    /// track.set_enabled(false);
    /// let frame = Bytes::from_static(&[0xf8, 0xff, 0xfe]);
    /// assert!(!track.write_sample(frame, AUDIO_FRAME).await.unwrap());
    /// # });
    /// ```
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<bool> {
        if !self.flags.is_live() {
            return Ok(false);
        }

        let sample = Sample {
            data,
            duration,
            timestamp: SystemTime::now(),
            ..Default::default()
        };
        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write sample: {}", e)))?;
        Ok(true)
    }
}

impl std::fmt::Debug for SampleTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .finish()
    }
}

impl LocalTrack for SampleTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.flags.is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        debug!("Track {} enabled={}", self.id, enabled);
        self.flags.set_enabled(enabled);
    }

    fn stop(&self) {
        self.flags.stop();
    }

    fn is_stopped(&self) -> bool {
        self.flags.is_stopped()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Acquired sample tracks plus the feed task writing into them
pub struct SampleStream {
    id: String,
    audio: Vec<Arc<SampleTrack>>,
    video: Vec<Arc<SampleTrack>>,
    feed: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SampleStream {
    pub fn audio_track(&self) -> Option<&Arc<SampleTrack>> {
        self.audio.first()
    }

    pub fn video_track(&self) -> Option<&Arc<SampleTrack>> {
        self.video.first()
    }
}

impl LocalStream for SampleStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn audio_tracks(&self) -> Vec<Arc<dyn LocalTrack>> {
        self.audio
            .iter()
            .map(|t| Arc::clone(t) as Arc<dyn LocalTrack>)
            .collect()
    }

    fn video_tracks(&self) -> Vec<Arc<dyn LocalTrack>> {
        self.video
            .iter()
            .map(|t| Arc::clone(t) as Arc<dyn LocalTrack>)
            .collect()
    }

    fn stop(&self) {
        for track in self.audio.iter().chain(self.video.iter()) {
            track.stop();
        }
        if let Ok(mut feed) = self.feed.lock() {
            if let Some(task) = feed.take() {
                task.abort();
            }
        }
        info!("Local stream {} stopped", self.id);
    }
}

/// Device-less media source
#[derive(Debug, Clone, Default)]
pub struct SampleMediaSource {
    feed_silence: bool,
}

impl SampleMediaSource {
    /// Tracks only; frames come from the application
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the audio track busy with Opus silence
    pub fn with_silence() -> Self {
        Self { feed_silence: true }
    }
}

#[async_trait]
impl MediaSource for SampleMediaSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Arc<dyn LocalStream>> {
        if !constraints.audio && constraints.video.is_none() {
            return Err(Error::DeviceAcquisition(
                "Nothing requested from the media source".to_string(),
            ));
        }

        let stream_id = format!("stream-{}", uuid::Uuid::new_v4());
        let audio: Vec<_> = constraints
            .audio
            .then(|| Arc::new(SampleTrack::audio(&stream_id)))
            .into_iter()
            .collect();
        let video: Vec<_> = constraints
            .video
            .map(|v| {
                debug!(
                    "Video track {}x{}@{}fps requested",
                    v.width, v.height, v.frame_rate
                );
                Arc::new(SampleTrack::video(&stream_id))
            })
            .into_iter()
            .collect();

        let feed = match (self.feed_silence, audio.first()) {
            (true, Some(track)) => Some(tokio::spawn(feed_silence(Arc::clone(track)))),
            _ => None,
        };

        info!(
            "Acquired local stream {} (audio: {}, video: {})",
            stream_id,
            audio.len(),
            video.len()
        );

        Ok(Arc::new(SampleStream {
            id: stream_id,
            audio,
            video,
            feed: std::sync::Mutex::new(feed),
        }))
    }
}

async fn feed_silence(track: Arc<SampleTrack>) {
    let mut ticker = tokio::time::interval(AUDIO_FRAME);
    loop {
        ticker.tick().await;
        if track.is_stopped() {
            break;
        }
        if let Err(e) = track
            .write_sample(Bytes::from_static(&OPUS_SILENCE), AUDIO_FRAME)
            .await
        {
            warn!("Silence feed stopped: {}", e);
            break;
        }
    }
    debug!("Silence feed for {} exited", track.id());
}
