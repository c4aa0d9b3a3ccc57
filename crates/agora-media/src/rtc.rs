//! Native WebRTC backend built on `webrtc-rs`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use agora_shared::constants::STUN_SERVERS;

use crate::error::MediaError;
use crate::peer::{
    IceCandidate, PeerConnection, PeerConnector, PeerEventKind, PeerEventSink, RemoteTrack,
    SdpKind, SessionDescription, SignalingState,
};
use crate::stream::{MediaTrack, TrackKind};

pub struct NativeConnector {
    api: API,
    ice_servers: Vec<String>,
}

impl NativeConnector {
    pub fn new(ice_servers: Vec<String>) -> Result<Self, MediaError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }

    /// Connector using the public STUN servers.
    pub fn with_default_stun() -> Result<Self, MediaError> {
        Self::new(STUN_SERVERS.iter().map(|s| s.to_string()).collect())
    }
}

fn wire_events(pc: &RTCPeerConnection, sink: PeerEventSink) {
    let ice_sink = sink.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = ice_sink.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => sink.emit(PeerEventKind::IceCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                })),
                Err(e) => debug!(error = %e, "Unserializable local candidate"),
            }
        })
    }));

    let track_sink = sink.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let sink = track_sink.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                sink.emit(PeerEventKind::Track(RemoteTrack {
                    id: track.id(),
                    kind,
                    stream_id: track.stream_id(),
                }));
            })
        },
    ));

    let negotiation_sink = sink.clone();
    pc.on_negotiation_needed(Box::new(move || {
        let sink = negotiation_sink.clone();
        Box::pin(async move { sink.emit(PeerEventKind::NegotiationNeeded) })
    }));

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let sink = sink.clone();
        Box::pin(async move {
            debug!(peer = %sink.remote().short(), %state, "Peer connection state");
            match state {
                RTCPeerConnectionState::Connected => sink.emit(PeerEventKind::Connected),
                RTCPeerConnectionState::Failed => sink.emit(PeerEventKind::Failed),
                _ => {}
            }
        })
    }));
}

#[async_trait]
impl PeerConnector for NativeConnector {
    async fn connect(&self, sink: PeerEventSink) -> Result<Box<dyn PeerConnection>, MediaError> {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = self.api.new_peer_connection(config).await?;
        info!(peer = %sink.remote().short(), "Created native peer connection");
        wire_events(&pc, sink);

        Ok(Box::new(NativeConnection {
            pc: Arc::new(pc),
            senders: Mutex::new(HashMap::new()),
        }))
    }
}

pub struct NativeConnection {
    pc: Arc<RTCPeerConnection>,
    /// Local track id → sender, for removal.
    senders: Mutex<HashMap<String, Arc<RTCRtpSender>>>,
}

fn to_native(description: SessionDescription) -> Result<RTCSessionDescription, MediaError> {
    let native = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
    };
    Ok(native)
}

#[async_trait]
impl PeerConnection for NativeConnection {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.pc.set_remote_description(to_native(description)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: None,
            })
            .await?;
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), MediaError> {
        let mime_type = match track.kind() {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let local: Arc<dyn TrackLocal + Send + Sync> = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_owned(),
            stream_id.to_owned(),
        ));

        let sender = self.pc.add_track(local).await?;
        self.senders
            .lock()
            .map_err(|_| MediaError::WebRtc("sender table poisoned".into()))?
            .insert(track.id().to_owned(), sender);
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<(), MediaError> {
        let sender = self
            .senders
            .lock()
            .map_err(|_| MediaError::WebRtc("sender table poisoned".into()))?
            .remove(track_id);
        if let Some(sender) = sender {
            self.pc.remove_track(&sender).await?;
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), MediaError> {
        let mut rollback = RTCSessionDescription::default();
        rollback.sdp_type = RTCSdpType::Rollback;
        self.pc.set_local_description(rollback).await?;
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveLocalPranswer => {
                SignalingState::HaveLocalOffer
            }
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveRemotePranswer => {
                SignalingState::HaveRemoteOffer
            }
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "Error closing peer connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_shared::UserPub;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn native_offer_answer_reaches_stable() {
        let connector = NativeConnector::new(Vec::new()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = connector
            .connect(PeerEventSink::new(UserPub([2; 32]), 1, tx.clone()))
            .await
            .unwrap();
        let b = connector
            .connect(PeerEventSink::new(UserPub([1; 32]), 2, tx))
            .await
            .unwrap();

        a.add_track(&MediaTrack::new(TrackKind::Audio, "mic"), "a-stream")
            .await
            .unwrap();
        b.add_track(&MediaTrack::new(TrackKind::Audio, "mic"), "b-stream")
            .await
            .unwrap();

        let offer = a.create_offer().await.unwrap();
        assert_eq!(a.signaling_state(), SignalingState::HaveLocalOffer);
        b.set_remote_description(offer).await.unwrap();
        assert_eq!(b.signaling_state(), SignalingState::HaveRemoteOffer);

        let answer = b.create_answer().await.unwrap();
        a.set_remote_description(answer).await.unwrap();
        assert_eq!(a.signaling_state(), SignalingState::Stable);
        assert_eq!(b.signaling_state(), SignalingState::Stable);

        a.close().await;
        b.close().await;
    }
}
