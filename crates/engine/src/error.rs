use network::{CodecError, ConduitError};
use thiserror::Error;

/// Errors from the block store collaborator. `NotFound` is an expected
/// outcome the handlers branch on, not a failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("block not found")]
    NotFound,
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Errors from the finalized state collaborator.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("finalized state unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input handed to `process_encoded`; returned synchronously to the
    /// caller, nothing is queued.
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] CodecError),
    #[error("could not read finalized state: {0}")]
    State(#[from] StateError),
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
    #[error("network send failed: {0}")]
    Network(#[from] ConduitError),
}
