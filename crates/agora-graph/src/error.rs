use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Graph replica has shut down")]
    Closed,

    #[error("Journal error: {0}")]
    Journal(#[from] agora_store::StoreError),

    #[error("Sync frame encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}
