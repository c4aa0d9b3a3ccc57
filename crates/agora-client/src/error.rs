use thiserror::Error;

use agora_shared::error::{CryptoError, IdentityError, RecoveryError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Alias is already registered")]
    AliasTaken,

    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("Wrong alias or password")]
    WrongCredentials,

    #[error("Invalid recovery phrase")]
    InvalidMnemonic,

    #[error("Recovery phrase error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("No account matches the recovery phrase")]
    AccountNotFound,

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Another login is in progress")]
    AuthInProgress,

    #[error("Could not derive a shared secret with {0}")]
    SecretUnavailable(String),

    #[error("Timed out looking up {0}")]
    LookupTimeout(String),

    #[error("Only the server owner can do this")]
    NotServerOwner,

    #[error("The server owner cannot be banned")]
    CannotBanOwner,

    #[error("You are banned from this server")]
    Banned,

    #[error("Not in a voice channel")]
    NotInVoiceChannel,

    #[error("Avatar must be a data:image URL")]
    InvalidAvatar,

    #[error("Avatar is {0} bytes, the limit is {1}")]
    AvatarTooLarge(usize, usize),

    #[error("Media error: {0}")]
    Media(#[from] agora_media::MediaError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Graph error: {0}")]
    Graph(#[from] agora_graph::GraphError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
