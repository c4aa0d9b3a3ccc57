use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Media device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Permission to capture media was denied")]
    PermissionDenied,

    #[error("Media request was cancelled")]
    Cancelled,

    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Voice session has ended")]
    Closed,
}

impl From<webrtc::Error> for MediaError {
    fn from(e: webrtc::Error) -> Self {
        MediaError::WebRtc(e.to_string())
    }
}
