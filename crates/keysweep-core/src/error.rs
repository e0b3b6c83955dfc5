//! Engine error types.

use thiserror::Error;

use crate::storage::StoreError;

/// Errors that abort a matching pass
///
/// Every error rolls the pass back. [`EngineError::is_transient`] tells the
/// caller whether re-running the pass may succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The engine observed state that breaks the matching invariants
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    /// True when retrying the whole pass is expected to help.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::Invariant(_) => false,
        }
    }
}
