//! Capability interface over a WebRTC peer connection.
//!
//! The voice session only talks to these traits. [`crate::rtc`] implements
//! them with the native `webrtc` stack and [`crate::loopback`] with an
//! in-process fake for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use agora_shared::UserPub;

use crate::error::MediaError;
use crate::stream::{MediaTrack, TrackKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate init, carried as JSON inside signal records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

/// A track received from the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEventKind {
    IceCandidate(IceCandidate),
    Track(RemoteTrack),
    TrackRemoved(String),
    NegotiationNeeded,
    Connected,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerEvent {
    pub remote: UserPub,
    /// Identifies the connection object that raised the event, so events
    /// from a torn-down connection can be told apart from its replacement.
    pub link_id: u64,
    pub kind: PeerEventKind,
}

/// Where a connection reports its asynchronous events.
#[derive(Clone)]
pub struct PeerEventSink {
    remote: UserPub,
    link_id: u64,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    pub fn new(remote: UserPub, link_id: u64, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            remote,
            link_id,
            tx,
        }
    }

    pub fn remote(&self) -> &UserPub {
        &self.remote
    }

    pub fn emit(&self, kind: PeerEventKind) {
        let _ = self.tx.send(PeerEvent {
            remote: self.remote,
            link_id: self.link_id,
            kind,
        });
    }
}

/// One peer connection. `create_offer` and `create_answer` also apply the
/// result as the local description.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), MediaError>;

    async fn remove_track(&self, track_id: &str) -> Result<(), MediaError>;

    /// Discard a pending local offer.
    async fn rollback(&self) -> Result<(), MediaError>;

    fn signaling_state(&self) -> SignalingState;

    async fn close(&self);
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, sink: PeerEventSink) -> Result<Box<dyn PeerConnection>, MediaError>;
}
