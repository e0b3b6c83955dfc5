//! Block sealing and opening with `XChaCha20-Poly1305`.
//!
//! All functions are pure. The nonce is provided by the caller, which keeps
//! sealing deterministic under test.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{CryptoError, KeyMaterial};

/// Size of the `XChaCha20` nonce prefix (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Bytes a sealed block carries on top of its plaintext.
pub const SEALED_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// HKDF info label for cipher key derivation
const CIPHER_KEY_LABEL: &[u8] = b"keysweepBlockV1";

/// 256-bit cipher key derived from 128-bit key material.
///
/// Zeroized on drop.
pub struct CipherKey {
    key: [u8; 32],
}

impl CipherKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for CipherKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Derive the block cipher key for `material`.
///
/// Deterministic: the same material always yields the same cipher key.
pub fn derive_cipher_key(material: &KeyMaterial) -> CipherKey {
    let hkdf = Hkdf::<Sha256>::new(None, &material.to_bytes());

    let mut key = [0u8; 32];
    let Ok(()) = hkdf.expand(CIPHER_KEY_LABEL, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    CipherKey { key }
}

/// Seal `plaintext` under `material`.
///
/// Output layout: `nonce (24) || ciphertext || tag (16)`.
///
/// # Security
///
/// The nonce must never repeat for the same key. Production callers draw it
/// from the OS RNG.
pub fn seal_block(plaintext: &[u8], material: &KeyMaterial, nonce: [u8; NONCE_SIZE]) -> Vec<u8> {
    let key = derive_cipher_key(material);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    sealed
}

/// Open a sealed block with `material`.
///
/// # Errors
///
/// - `Truncated`: shorter than [`SEALED_OVERHEAD`]
/// - `AuthenticationFailed`: wrong key or tampered contents
pub fn open_block(sealed: &[u8], material: &KeyMaterial) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEALED_OVERHEAD {
        return Err(CryptoError::Truncated { len: sealed.len(), min: SEALED_OVERHEAD });
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let key = derive_cipher_key(material);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}
