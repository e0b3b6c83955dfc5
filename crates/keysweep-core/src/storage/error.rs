//! Storage error types.
//!
//! Defines errors that can occur during storage operations:
//! - `NotFound`: Referenced block or key doesn't exist
//! - `Invariant`: Persisted state contradicts the matching invariants
//! - `Serialization`: Failed to encode/decode a stored row
//! - `Io`: Underlying storage system errors
//! - `Lock`: A lock could not be acquired

use thiserror::Error;

use crate::types::BlockId;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Block referenced by a match does not exist
    #[error("block not found: {0}")]
    NotFound(BlockId),

    /// Stored state violates an invariant (missing cursor row, rematched
    /// block, cursor moving backwards).
    ///
    /// Not recoverable by retrying. The pass must abort and surface it.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Lock acquisition failed
    #[error("lock error: {0}")]
    Lock(String),
}

impl StoreError {
    /// True for errors where re-running the whole pass may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Lock(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
