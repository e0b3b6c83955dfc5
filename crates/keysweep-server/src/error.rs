//! Server error types.

use keysweep_core::{EngineError, StoreError};
use thiserror::Error;

/// Errors surfaced by the scheduler and the command-line front end.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (bad interval, page size, key argument).
    ///
    /// Fatal at startup. Fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Store error outside a pass (ingestion, inspection, open).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A matching pass aborted.
    ///
    /// Transient if [`EngineError::is_transient`] says so; the scheduler
    /// retries those on its next tick.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// A key file line could not be parsed.
    #[error("key file line {line}: {reason}")]
    Import {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The OS random source failed.
    #[error("randomness unavailable: {0}")]
    Randomness(String),

    /// A pass worker died (panicked or was cancelled).
    ///
    /// The pass rolled back. Indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// True when the failed operation may succeed if simply re-run.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Engine(e) => e.is_transient(),
            _ => false,
        }
    }
}
