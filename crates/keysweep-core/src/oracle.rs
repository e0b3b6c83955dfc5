//! Decrypt-and-verify oracle.
//!
//! The engine treats the oracle as total: every call ends in a definite match
//! or no-match. Decoding faults inside an implementation map to `None` and
//! never escape the pass loop.

use keysweep_crypto::{KeyMaterial, crc32, open_block};

/// Result of a successful validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validated {
    /// Length of the decoded contents
    pub length: u32,
    /// CRC-32 of the decoded contents
    pub checksum: u32,
}

/// Decides whether `key` decrypts `ciphertext` into valid content.
///
/// Must be deterministic and free of side effects that affect the answer.
/// `Send + Sync` so one oracle can serve passes running on worker threads.
pub trait ValidationOracle: Send + Sync {
    /// Attempt to validate `ciphertext` under `key`.
    fn attempt_match(&self, ciphertext: &[u8], key: &KeyMaterial) -> Option<Validated>;
}

impl<F> ValidationOracle for F
where
    F: Fn(&[u8], &KeyMaterial) -> Option<Validated> + Send + Sync,
{
    fn attempt_match(&self, ciphertext: &[u8], key: &KeyMaterial) -> Option<Validated> {
        self(ciphertext, key)
    }
}

/// Oracle for blocks sealed with [`keysweep_crypto::seal_block`].
///
/// A key validates when the AEAD tag verifies. The reported length and
/// checksum describe the opened plaintext.
#[derive(Debug, Clone, Copy, Default)]
pub struct AeadOracle;

impl ValidationOracle for AeadOracle {
    fn attempt_match(&self, ciphertext: &[u8], key: &KeyMaterial) -> Option<Validated> {
        let plaintext = open_block(ciphertext, key).ok()?;
        let length = u32::try_from(plaintext.len()).ok()?;

        Some(Validated { length, checksum: crc32(&plaintext) })
    }
}
