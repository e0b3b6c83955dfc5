//! Shared fixtures for engine tests.
//!
//! Test blocks carry a label and the word of the key that opens them:
//! `label (u32 BE) || opener (u32 BE)`. An opener of 0 means no key opens the
//! block. Keys are identified by their first word.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use keysweep_core::{MatchStore, Validated, ValidationOracle};
use keysweep_crypto::KeyMaterial;

/// Opener word meaning "no key validates this block".
pub const NO_KEY: u32 = 0;

/// Encode a test block.
pub fn block_bytes(label: u32, opener: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8);
    bytes.extend_from_slice(&label.to_be_bytes());
    bytes.extend_from_slice(&opener.to_be_bytes());
    bytes
}

/// Key material identified by `word`.
pub fn key(word: u32) -> KeyMaterial {
    KeyMaterial::from_words([word, 0x5eed, 0, word])
}

/// Oracle that opens a test block when the key's first word equals the
/// block's opener, and records every call as `(label, key word)`.
///
/// Clones share the call log.
#[derive(Clone, Default)]
pub struct RecordingOracle {
    calls: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl RecordingOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(u32, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl ValidationOracle for RecordingOracle {
    fn attempt_match(&self, ciphertext: &[u8], key: &KeyMaterial) -> Option<Validated> {
        let label = u32::from_be_bytes(ciphertext.get(0..4)?.try_into().ok()?);
        let opener = u32::from_be_bytes(ciphertext.get(4..8)?.try_into().ok()?);
        let word = key.words()[0];

        self.calls.lock().unwrap().push((label, word));

        (opener != NO_KEY && opener == word).then_some(Validated { length: label, checksum: word })
    }
}

/// Append a test block, returning its id.
pub fn add_block<S: MatchStore>(store: &S, label: u32, opener: u32) -> keysweep_core::BlockId {
    store.append_block(&block_bytes(label, opener), true).unwrap()
}

/// Append one key by word, returning its id.
pub fn add_key<S: MatchStore>(store: &S, word: u32) -> keysweep_core::KeyId {
    store.append_keys(&[key(word)]).unwrap()[0]
}
