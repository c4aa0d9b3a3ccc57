//! Local media streams and the device capability that produces them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(TrackKind::Audio),
            "video" => Some(TrackKind::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Live,
    Ended,
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    ended: AtomicBool,
}

/// A local capture track. Clones share state.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: random_id(kind.as_str()),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                ended: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// A disabled track keeps flowing silence or black frames; no
    /// renegotiation happens.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn ready_state(&self) -> ReadyState {
        if self.inner.ended.load(Ordering::SeqCst) {
            ReadyState::Ended
        } else {
            ReadyState::Live
        }
    }

    pub fn stop(&self) {
        self.inner.ended.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("state", &self.ready_state())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: random_id("stream"),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// A screen or window the user may pick for screen sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSource {
    pub id: String,
    pub name: String,
    /// `data:image/...` preview.
    pub thumbnail: String,
}

/// Capture devices. Acquisition may wait on a user permission prompt, so
/// callers bound it with a timeout.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Microphone stream with one audio track.
    async fn user_audio(&self) -> Result<MediaStream, MediaError>;

    /// Screen capture. `source` picks one of [`MediaDevices::capture_sources`];
    /// `None` lets the platform choose.
    async fn display(&self, source: Option<&str>) -> Result<MediaStream, MediaError>;

    async fn capture_sources(&self) -> Result<Vec<CaptureSource>, MediaError>;
}

fn random_id(prefix: &str) -> String {
    let n: u64 = rand::thread_rng().gen();
    format!("{prefix}-{n:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_enabled_and_ended() {
        let track = MediaTrack::new(TrackKind::Audio, "mic");
        let clone = track.clone();

        clone.set_enabled(false);
        assert!(!track.is_enabled());

        let stream = MediaStream::new(vec![track.clone()]);
        stream.stop();
        assert_eq!(clone.ready_state(), ReadyState::Ended);
    }

    #[test]
    fn kind_parses_wire_names() {
        assert_eq!(TrackKind::parse("video"), Some(TrackKind::Video));
        assert_eq!(TrackKind::parse("data"), None);
        assert_eq!(TrackKind::Audio.as_str(), "audio");
    }
}
