//! keysweep cryptographic primitives
//!
//! Candidate key material and the decrypt-and-verify building blocks used by
//! the matching engine's oracle. Pure functions with deterministic outputs.
//! Callers provide nonces so sealing is reproducible in tests.
//!
//! # Sealed block layout
//!
//! ```text
//! KeyMaterial (128 bits, four 32-bit words)
//!        │
//!        ▼
//! HKDF-SHA256 → Cipher Key (256 bits)
//!        │
//!        ▼
//! XChaCha20-Poly1305 → nonce (24 bytes) || ciphertext || tag (16 bytes)
//! ```
//!
//! A block "validates" under a key exactly when the Poly1305 tag verifies.
//! The tag is what makes the check definite: a wrong key is rejected with
//! overwhelming probability instead of producing garbage plaintext.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod checksum;
mod error;
mod key;
mod seal;

pub use checksum::crc32;
pub use error::CryptoError;
pub use key::{KEY_SIZE, KeyMaterial};
pub use seal::{
    CipherKey, NONCE_SIZE, SEALED_OVERHEAD, TAG_SIZE, derive_cipher_key, open_block, seal_block,
};
