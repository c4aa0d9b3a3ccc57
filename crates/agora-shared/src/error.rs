use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Invalid encoding: {0}")]
    Encoding(String),

    #[error("Key derivation failed: {0}")]
    Kdf(String),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Wrong password for sealed identity")]
    WrongPassword,

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Invalid recovery phrase: {0}")]
    InvalidMnemonic(String),

    #[error("Failed to generate recovery phrase: {0}")]
    Generation(String),
}

/// Raised when a textual id cannot be parsed.
#[derive(Error, Debug, PartialEq)]
pub enum ParseIdError {
    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}
