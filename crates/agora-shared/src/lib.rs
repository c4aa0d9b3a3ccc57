//! Types, cryptography and wire records shared by every Agora crate.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod path;
pub mod paths;
pub mod protocol;
pub mod recovery;
pub mod types;

pub use identity::Identity;
pub use path::Path;
pub use types::{ChannelId, ChannelKind, EncryptionPub, GroupId, MemberRole, ServerId, UserPub};
