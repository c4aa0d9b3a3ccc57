//! # agora-client
//!
//! Account and session layer of an Agora client.
//!
//! A [`Client`] wraps a graph replica. Registering, logging in or restoring
//! from a recovery phrase yields a [`Session`], the context every social and
//! voice operation runs in:
//! - encrypted direct, group and server channel messages
//! - friend requests and friend lists
//! - servers with channels, members and bans
//! - groups with auto-accepted invites
//! - profile pictures and user lookup
//! - voice channels with screen sharing

pub mod auth;
pub mod config;
pub mod conversation;
pub mod error;
pub mod friends;
pub mod groups;
pub mod live;
pub mod network;
pub mod profile;
pub mod secrets;
pub mod servers;
pub mod session;
pub mod voice;

use tracing_subscriber::{fmt, EnvFilter};

pub use auth::{AuthPhase, Client, Registration};
pub use config::ClientConfig;
pub use conversation::{Message, Scope};
pub use error::{ClientError, Result};
pub use groups::GroupSummary;
pub use live::LiveView;
pub use network::{start_replica, Replica};
pub use profile::UserInfo;
pub use secrets::{KeyAgreement, X25519Agreement};
pub use servers::{ServerMember, ServerSummary};
pub use session::Session;
pub use voice::{voice_channel_path, ChannelOccupant, MediaBackend};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("agora_client=debug,agora_graph=info,agora_media=info,agora_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
