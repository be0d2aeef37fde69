//! [`PeerConnection`] backed by webrtc-rs.

use std::sync::Arc;

use async_trait::async_trait;
use checkout_common::{IceCandidate, Role, SdpType, SessionDescription};
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::{AgentError, AgentResult};
use crate::peer::{PeerConnection, PeerEvent, PeerEvents, PeerFactory, PeerState};

fn peer_err(err: webrtc::Error) -> AgentError {
    AgentError::Peer(err.to_string())
}

fn map_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        _ => PeerState::New,
    }
}

pub struct WebRtcPeerFactory {
    ice_servers: Vec<String>,
}

impl WebRtcPeerFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(&self, role: Role, events: PeerEvents) -> AgentResult<Arc<dyn PeerConnection>> {
        let mut m = MediaEngine::default();
        m.register_default_codecs().map_err(peer_err)?;
        let api = APIBuilder::new().with_media_engine(m).build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await.map_err(peer_err)?);

        if role.is_offerer() {
            // The kiosk only receives the phone's camera.
            pc.add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(peer_err)?;
        } else {
            // The CLI has no encoder yet; frames still go through the relay.
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_H264.to_string(),
                    ..Default::default()
                },
                "camera".to_string(),
                "checkout-phone".to_string(),
            ));
            pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| AgentError::CameraUnavailable(e.to_string()))?;
        }

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |c| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = c else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(PeerEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("failed to serialize local candidate: {}", e),
                }
            })
        }));

        pc.on_peer_connection_state_change(Box::new(move |state| {
            let events = events.clone();
            Box::pin(async move {
                info!("peer connection state: {}", state);
                let _ = events.send(PeerEvent::StateChanged(map_state(state)));
            })
        }));

        Ok(Arc::new(WebRtcPeer { pc }))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_offer(&self) -> AgentResult<SessionDescription> {
        let offer = self.pc.create_offer(None).await.map_err(peer_err)?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(peer_err)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn accept_offer(&self, offer: &SessionDescription) -> AgentResult<SessionDescription> {
        if offer.sdp_type != SdpType::Offer {
            return Err(AgentError::Peer("remote description is not an offer".into()));
        }
        let remote = RTCSessionDescription::offer(offer.sdp.clone()).map_err(peer_err)?;
        self.pc.set_remote_description(remote).await.map_err(peer_err)?;
        let answer = self.pc.create_answer(None).await.map_err(peer_err)?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(peer_err)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn apply_answer(&self, answer: &SessionDescription) -> AgentResult<()> {
        let remote = RTCSessionDescription::answer(answer.sdp.clone()).map_err(peer_err)?;
        self.pc.set_remote_description(remote).await.map_err(peer_err)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> AgentResult<()> {
        debug!("applying remote candidate");
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone(),
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment.clone(),
            })
            .await
            .map_err(peer_err)
    }

    async fn close(&self) -> AgentResult<()> {
        self.pc.close().await.map_err(peer_err)
    }
}
