//! webrtc-rs backed peer connections
//!
//! [`WebRtcConnector`] builds one `RTCPeerConnection` per remote participant
//! and turns its callbacks into [`LinkEvent`]s. [`WebRtcLink`] drives the
//! connection on behalf of the peer session.

use crate::media::SampleTrack;
use async_trait::async_trait;
use meshcall_core::signaling::SdpKind;
use meshcall_core::{
    Connectivity, Error, IceCandidate, IceServerConfig, LinkEvent, LocalTrack, MediaKind,
    PeerConnector, PeerId, PeerLink, RemoteTrack, Result, SessionDescription,
};
use std::any::Any;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Opens webrtc-rs peer connections with a shared media engine
pub struct WebRtcConnector {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcConnector {
    /// Build the media engine and interceptors once for every peer
    pub fn new(ice_servers: &[IceServerConfig]) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::InternalError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            Error::InternalError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect();

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    #[instrument(skip_all, fields(peer_id = %peer_id))]
    async fn connect(
        &self,
        peer_id: &PeerId,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerLink>> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = Arc::new(self.api.new_peer_connection(config).await.map_err(|e| {
            Error::Negotiation(format!("Failed to create peer connection: {}", e))
        })?);

        wire_callbacks(&peer_connection, peer_id, events);
        info!("Created peer connection for {}", peer_id);

        Ok(Arc::new(WebRtcLink {
            peer_id: peer_id.clone(),
            peer_connection,
        }))
    }
}

fn wire_callbacks(
    peer_connection: &Arc<RTCPeerConnection>,
    peer_id: &PeerId,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let state_events = events.clone();
    let state_peer = peer_id.clone();
    peer_connection.on_peer_connection_state_change(Box::new(
        move |state: RTCPeerConnectionState| {
            let events = state_events.clone();
            let peer_id = state_peer.clone();
            Box::pin(async move {
                debug!("Peer {} connection state: {:?}", peer_id, state);
                let _ = events.send(LinkEvent::Connectivity(connectivity_from(state)));
            })
        },
    ));

    let ice_peer = peer_id.clone();
    peer_connection.on_ice_connection_state_change(Box::new(
        move |state: RTCIceConnectionState| {
            let peer_id = ice_peer.clone();
            Box::pin(async move {
                debug!("Peer {} ICE connection state: {}", peer_id, state);
            })
        },
    ));

    let candidate_events = events.clone();
    let candidate_peer = peer_id.clone();
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        let peer_id = candidate_peer.clone();
        Box::pin(async move {
            // None marks the end of gathering; nothing to trickle
            let Some(candidate) = candidate else {
                debug!("ICE gathering complete for {}", peer_id);
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events.send(LinkEvent::LocalCandidate(candidate_from(init)));
                }
                Err(e) => warn!("Failed to serialize local candidate for {}: {}", peer_id, e),
            }
        })
    }));

    let track_peer = peer_id.clone();
    peer_connection.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let events = events.clone();
            let peer_id = track_peer.clone();
            Box::pin(async move {
                let Some(kind) = media_kind(track.kind()) else {
                    warn!("Ignoring remote track of unspecified kind from {}", peer_id);
                    return;
                };
                info!("Remote {} track from {}: {}", kind, peer_id, track.id());
                let stream_id = track.stream_id();
                let track = Arc::new(WebRtcRemoteTrack::new(track, kind));
                let _ = events.send(LinkEvent::RemoteTrack { stream_id, track });
            })
        },
    ));
}

/// One webrtc-rs peer connection
pub struct WebRtcLink {
    peer_id: PeerId,
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcLink {
    /// Underlying connection, for stats or data channels
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn attach_track(&self, track: Arc<dyn LocalTrack>) -> Result<()> {
        let sample = track.as_any().downcast_ref::<SampleTrack>().ok_or_else(|| {
            Error::MediaTrackError(format!("Track {} is not a sample track", track.id()))
        })?;

        let sender = self
            .peer_connection
            .add_track(sample.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to add track: {}", e)))?;

        // RTCP has to be read for the interceptors to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        debug!("Attached {} track {} for {}", track.kind(), track.id(), self.peer_id);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create offer: {}", e)))?;
        description_from(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create answer: {}", e)))?;
        description_from(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(description_to(description)?)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(description_to(description)?)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate_to(candidate))
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection for {}", self.peer_id);
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::InternalError(format!("Failed to close peer connection: {}", e)))
    }
}

/// Inbound webrtc-rs track
pub struct WebRtcRemoteTrack {
    id: String,
    kind: MediaKind,
    track: Arc<TrackRemote>,
}

impl WebRtcRemoteTrack {
    fn new(track: Arc<TrackRemote>, kind: MediaKind) -> Self {
        Self {
            id: track.id(),
            kind,
            track,
        }
    }

    /// RTP source for a renderer
    pub fn rtp(&self) -> &Arc<TrackRemote> {
        &self.track
    }
}

impl std::fmt::Debug for WebRtcRemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcRemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl RemoteTrack for WebRtcRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn connectivity_from(state: RTCPeerConnectionState) -> Connectivity {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => Connectivity::New,
        RTCPeerConnectionState::Connecting => Connectivity::Connecting,
        RTCPeerConnectionState::Connected => Connectivity::Connected,
        RTCPeerConnectionState::Disconnected => Connectivity::Disconnected,
        RTCPeerConnectionState::Failed => Connectivity::Failed,
        RTCPeerConnectionState::Closed => Connectivity::Closed,
    }
}

fn media_kind(kind: RTPCodecType) -> Option<MediaKind> {
    match kind {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        RTPCodecType::Unspecified => None,
    }
}

fn description_from(description: RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::Negotiation(
                "Session description without a type".to_string(),
            ))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

fn description_to(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpKind::Rollback => {
            return Err(Error::Negotiation(
                "Rollback descriptions are not supported".to_string(),
            ))
        }
    };
    parsed.map_err(|e| Error::Negotiation(format!("Invalid session description: {}", e)))
}

fn candidate_from(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn candidate_to(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: candidate.username_fragment,
    }
}
