//! Error types for cache operations.

use thiserror::Error;

/// Errors returned by cache operations.
///
/// Every error is returned synchronously from the call that failed. The cache
/// never logs-and-swallows an error and never aborts the process.
#[derive(Debug, Error)]
pub enum CacheError {
    /// `add` was called on a key that holds a live (non-expired) entry
    #[error("item {0} already exists")]
    AlreadyExists(String),

    /// The key is absent or its entry has expired
    #[error("item {0} not found")]
    NotFound(String),

    /// A value could not be encoded, or a snapshot payload is malformed
    #[error("serialization failure: {0}")]
    Serialization(#[from] bincode::Error),

    /// Reading or writing a snapshot file failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;
