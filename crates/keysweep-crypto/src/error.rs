//! Error types for key parsing and block opening.

use thiserror::Error;

/// Errors produced by the cryptographic primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Sealed block is shorter than nonce plus tag.
    #[error("sealed block truncated: {len} bytes, need at least {min}")]
    Truncated {
        /// Actual length
        len: usize,
        /// Minimum length of a sealed block
        min: usize,
    },

    /// Authentication tag did not verify (wrong key or tampered block).
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Key material could not be parsed.
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// Why the input was rejected
        reason: String,
    },
}
