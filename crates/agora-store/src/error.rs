use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Journal database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No platform data directory to put the default journal in.
    #[error("Could not determine application data directory")]
    NoDataDir,

    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Journal migration failed: {0}")]
    Migration(String),

    /// A journal row whose path or value does not decode.
    #[error("Corrupt journal row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
