//! Fuzz target for block opening
//!
//! # Invariants
//!
//! - `open_block` and the AEAD oracle NEVER panic on arbitrary bytes
//! - A sealed block opens under its key and reports the plaintext length and
//!   CRC-32
//! - Flipping any byte of a sealed block makes it fail to open

#![no_main]

use arbitrary::Arbitrary;
use keysweep_core::{AeadOracle, ValidationOracle};
use keysweep_crypto::{KeyMaterial, crc32, open_block, seal_block};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    key: [u32; 4],
    other_key: [u32; 4],
    nonce: [u8; 24],
    plaintext: Vec<u8>,
    garbage: Vec<u8>,
    flip_at: u16,
}

fuzz_target!(|input: Input| {
    let key = KeyMaterial::from_words(input.key);

    // Arbitrary bytes: any answer is fine, panics are not
    let _ = open_block(&input.garbage, &key);
    let _ = AeadOracle.attempt_match(&input.garbage, &key);

    let sealed = seal_block(&input.plaintext, &key, input.nonce);
    let validated = AeadOracle.attempt_match(&sealed, &key).expect("sealed block must open");
    assert_eq!(validated.length as usize, input.plaintext.len());
    assert_eq!(validated.checksum, crc32(&input.plaintext));

    if input.other_key != input.key {
        assert!(AeadOracle.attempt_match(&sealed, &KeyMaterial::from_words(input.other_key)).is_none());
    }

    let mut tampered = sealed;
    let at = usize::from(input.flip_at) % tampered.len();
    tampered[at] ^= 0x01;
    assert!(open_block(&tampered, &key).is_err());
});
