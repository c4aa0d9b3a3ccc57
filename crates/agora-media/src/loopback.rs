//! In-process media backend.
//!
//! Loopback connections carry no packets. Their session descriptions list
//! the local tracks as `a=track:<id> <kind> <stream>` lines, so applying a
//! remote description is enough to surface the sender's tracks on the
//! receiving side. Used by tests and headless replicas.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::error::MediaError;
use crate::peer::{
    IceCandidate, PeerConnection, PeerConnector, PeerEventKind, PeerEventSink, RemoteTrack,
    SdpKind, SessionDescription, SignalingState,
};
use crate::stream::{CaptureSource, MediaDevices, MediaStream, MediaTrack, TrackKind};

#[derive(Default)]
pub struct LoopbackConnector {
    created: AtomicUsize,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections created so far.
    pub fn connections_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnector for LoopbackConnector {
    async fn connect(&self, sink: PeerEventSink) -> Result<Box<dyn PeerConnection>, MediaError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        debug!(remote = %sink.remote().short(), "Loopback connection created");
        Ok(Box::new(LoopbackConnection {
            sink,
            port: 40_000 + (n % 20_000) as u16,
            inner: Mutex::new(Inner::default()),
        }))
    }
}

#[derive(Default)]
struct Inner {
    /// id → (kind, stream id)
    local_tracks: BTreeMap<String, (TrackKind, String)>,
    remote_tracks: HashSet<String>,
    state: Option<SignalingState>,
    has_remote: bool,
    negotiated: bool,
    connected: bool,
}

impl Inner {
    fn state(&self) -> SignalingState {
        self.state.unwrap_or(SignalingState::Stable)
    }

    fn render(&self, kind: SdpKind) -> String {
        let mut sdp = format!(
            "v=0\r\no=loopback 0 0 IN IP4 127.0.0.1\r\ns={}\r\n",
            match kind {
                SdpKind::Offer => "offer",
                SdpKind::Answer => "answer",
            }
        );
        for (id, (kind, stream)) in &self.local_tracks {
            sdp.push_str(&format!("a=track:{id} {} {stream}\r\n", kind.as_str()));
        }
        sdp
    }
}

pub struct LoopbackConnection {
    sink: PeerEventSink,
    port: u16,
    inner: Mutex<Inner>,
}

fn parse_tracks(sdp: &str) -> Vec<RemoteTrack> {
    sdp.lines()
        .filter_map(|line| line.strip_prefix("a=track:"))
        .filter_map(|rest| {
            let mut parts = rest.split_whitespace();
            let id = parts.next()?.to_string();
            let kind = TrackKind::parse(parts.next()?)?;
            let stream_id = parts.next()?.to_string();
            Some(RemoteTrack { id, kind, stream_id })
        })
        .collect()
}

impl LoopbackConnection {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, MediaError> {
        self.inner
            .lock()
            .map_err(|_| MediaError::WebRtc("loopback state poisoned".into()))
    }

    fn candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:1 1 udp 2122260223 127.0.0.1 {} typ host", self.port),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }
    }

    /// Emit track changes and, on the first completed exchange, `Connected`.
    fn apply_remote(&self, inner: &mut Inner, sdp: &str) {
        let tracks = parse_tracks(sdp);
        let seen: HashSet<String> = tracks.iter().map(|t| t.id.clone()).collect();

        for gone in inner.remote_tracks.difference(&seen) {
            self.sink.emit(PeerEventKind::TrackRemoved(gone.clone()));
        }
        for track in tracks {
            if !inner.remote_tracks.contains(&track.id) {
                self.sink.emit(PeerEventKind::Track(track));
            }
        }
        inner.remote_tracks = seen;
        inner.has_remote = true;
    }

    fn settle(&self, inner: &mut Inner) {
        inner.state = Some(SignalingState::Stable);
        inner.negotiated = true;
        if !inner.connected {
            inner.connected = true;
            self.sink.emit(PeerEventKind::Connected);
        }
    }

    fn ensure_open(inner: &Inner) -> Result<(), MediaError> {
        if inner.state() == SignalingState::Closed {
            return Err(MediaError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let sdp = {
            let mut inner = self.lock()?;
            Self::ensure_open(&inner)?;
            if inner.state() != SignalingState::Stable {
                return Err(MediaError::WebRtc("offer requires a stable state".into()));
            }
            inner.state = Some(SignalingState::HaveLocalOffer);
            inner.render(SdpKind::Offer)
        };
        self.sink.emit(PeerEventKind::IceCandidate(self.candidate()));
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let sdp = {
            let mut inner = self.lock()?;
            Self::ensure_open(&inner)?;
            if inner.state() != SignalingState::HaveRemoteOffer {
                return Err(MediaError::WebRtc("answer requires a remote offer".into()));
            }
            let sdp = inner.render(SdpKind::Answer);
            self.settle(&mut inner);
            sdp
        };
        self.sink.emit(PeerEventKind::IceCandidate(self.candidate()));
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let mut inner = self.lock()?;
        Self::ensure_open(&inner)?;
        match (description.kind, inner.state()) {
            (SdpKind::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                inner.state = Some(SignalingState::HaveRemoteOffer);
                self.apply_remote(&mut inner, &description.sdp);
                Ok(())
            }
            (SdpKind::Answer, SignalingState::HaveLocalOffer) => {
                self.apply_remote(&mut inner, &description.sdp);
                self.settle(&mut inner);
                Ok(())
            }
            (kind, state) => Err(MediaError::WebRtc(format!(
                "cannot apply remote {kind:?} in {state:?}"
            ))),
        }
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        let inner = self.lock()?;
        if !inner.has_remote {
            return Err(MediaError::WebRtc("no remote description".into()));
        }
        if !candidate.candidate.starts_with("candidate:") {
            return Err(MediaError::WebRtc("malformed candidate".into()));
        }
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), MediaError> {
        let negotiated = {
            let mut inner = self.lock()?;
            Self::ensure_open(&inner)?;
            inner
                .local_tracks
                .insert(track.id().to_string(), (track.kind(), stream_id.to_string()));
            inner.negotiated
        };
        if negotiated {
            self.sink.emit(PeerEventKind::NegotiationNeeded);
        }
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<(), MediaError> {
        let (removed, negotiated) = {
            let mut inner = self.lock()?;
            Self::ensure_open(&inner)?;
            (inner.local_tracks.remove(track_id).is_some(), inner.negotiated)
        };
        if removed && negotiated {
            self.sink.emit(PeerEventKind::NegotiationNeeded);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), MediaError> {
        let mut inner = self.lock()?;
        if inner.state() == SignalingState::HaveLocalOffer {
            inner.state = Some(SignalingState::Stable);
        }
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.inner
            .lock()
            .map(|inner| inner.state())
            .unwrap_or(SignalingState::Closed)
    }

    async fn close(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = Some(SignalingState::Closed);
        }
    }
}

/// Synthetic capture devices.
pub struct LoopbackDevices {
    allow_audio: AtomicBool,
    allow_display: AtomicBool,
    /// Screen capture prompts are never answered.
    hold_display: AtomicBool,
}

impl Default for LoopbackDevices {
    fn default() -> Self {
        Self {
            allow_audio: AtomicBool::new(true),
            allow_display: AtomicBool::new(true),
            hold_display: AtomicBool::new(false),
        }
    }
}

impl LoopbackDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices whose permission prompts are all dismissed.
    pub fn denied() -> Arc<Self> {
        let devices = Self::default();
        devices.allow_audio.store(false, Ordering::SeqCst);
        devices.allow_display.store(false, Ordering::SeqCst);
        Arc::new(devices)
    }

    /// Devices whose screen capture prompt stays open forever.
    pub fn unanswered_display() -> Arc<Self> {
        let devices = Self::default();
        devices.hold_display.store(true, Ordering::SeqCst);
        Arc::new(devices)
    }
}

#[async_trait]
impl MediaDevices for LoopbackDevices {
    async fn user_audio(&self) -> Result<MediaStream, MediaError> {
        if !self.allow_audio.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        Ok(MediaStream::new(vec![MediaTrack::new(TrackKind::Audio, "Loopback microphone")]))
    }

    async fn display(&self, source: Option<&str>) -> Result<MediaStream, MediaError> {
        if self.hold_display.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.allow_display.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        let sources = self.capture_sources().await?;
        let label = match source {
            None => sources.first().map(|s| s.name.clone()).unwrap_or_default(),
            Some(id) => sources
                .iter()
                .find(|s| s.id == id)
                .map(|s| s.name.clone())
                .ok_or_else(|| MediaError::DeviceUnavailable(format!("no capture source {id}")))?,
        };
        Ok(MediaStream::new(vec![MediaTrack::new(TrackKind::Video, label)]))
    }

    async fn capture_sources(&self) -> Result<Vec<CaptureSource>, MediaError> {
        Ok(vec![
            CaptureSource {
                id: "screen:0".into(),
                name: "Entire screen".into(),
                thumbnail: "data:image/png;base64,".into(),
            },
            CaptureSource {
                id: "window:1".into(),
                name: "Loopback window".into(),
                thumbnail: "data:image/png;base64,".into(),
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_shared::UserPub;
    use tokio::sync::mpsc;

    async fn pair() -> (
        Box<dyn PeerConnection>,
        mpsc::UnboundedReceiver<crate::peer::PeerEvent>,
        Box<dyn PeerConnection>,
        mpsc::UnboundedReceiver<crate::peer::PeerEvent>,
    ) {
        let connector = LoopbackConnector::new();
        let (atx, arx) = mpsc::unbounded_channel();
        let (btx, brx) = mpsc::unbounded_channel();
        let a = connector
            .connect(PeerEventSink::new(UserPub([2; 32]), 1, atx))
            .await
            .unwrap();
        let b = connector
            .connect(PeerEventSink::new(UserPub([1; 32]), 2, btx))
            .await
            .unwrap();
        assert_eq!(connector.connections_created(), 2);
        (a, arx, b, brx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<crate::peer::PeerEvent>) -> Vec<PeerEventKind> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.kind);
        }
        out
    }

    #[tokio::test]
    async fn offer_answer_surfaces_tracks() {
        let (a, mut a_events, b, mut b_events) = pair().await;
        let mic = MediaTrack::new(TrackKind::Audio, "mic");
        a.add_track(&mic, "s1").await.unwrap();

        let offer = a.create_offer().await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        a.set_remote_description(answer).await.unwrap();

        assert_eq!(a.signaling_state(), SignalingState::Stable);
        let b_seen = drain(&mut b_events);
        assert!(b_seen.iter().any(|e| matches!(e, PeerEventKind::Track(t) if t.id == mic.id())));
        assert!(b_seen.contains(&PeerEventKind::Connected));
        assert!(drain(&mut a_events).contains(&PeerEventKind::Connected));
    }

    #[tokio::test]
    async fn answer_without_offer_is_rejected() {
        let (a, _a_events, _b, _b_events) = pair().await;
        let err = a
            .set_remote_description(SessionDescription::answer("v=0"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::WebRtc(_)));
    }

    #[tokio::test]
    async fn denied_devices_refuse_capture() {
        let devices = LoopbackDevices::denied();
        assert_eq!(devices.user_audio().await.unwrap_err(), MediaError::PermissionDenied);

        let allowed = LoopbackDevices::new();
        let screen = allowed.display(Some("window:1")).await.unwrap();
        assert_eq!(screen.tracks()[0].label(), "Loopback window");
        assert!(allowed.display(Some("window:9")).await.is_err());
    }
}
