//! Error types for the local state store.

use thiserror::Error;

/// Errors produced by the sled-backed state store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to open store at {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: sled::Error,
    },

    #[error("sled operation failed: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("no default account configured")]
    NoDefaultAccount,

    #[error("item not found: {0}")]
    NotFound(String),

    #[error("thumbnail store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}
