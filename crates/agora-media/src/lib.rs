//! Voice and screen-share sessions over the replicated graph.
//!
//! Signaling records travel through the graph; media flows over peer
//! connections behind the [`peer::PeerConnector`] capability, implemented
//! natively in [`rtc`] and in-process in [`loopback`].

pub mod error;
pub mod loopback;
pub mod mesh;
pub mod peer;
pub mod rtc;
pub mod signaling;
pub mod stream;
pub mod voice;

pub use error::MediaError;
pub use mesh::VoicePeer;
pub use peer::{PeerConnection, PeerConnector};
pub use signaling::LinkPhase;
pub use stream::{CaptureSource, MediaDevices, MediaStream, MediaTrack, ReadyState, TrackKind};
pub use voice::{join_voice_channel, Participant, VoiceConfig, VoiceHandle};
