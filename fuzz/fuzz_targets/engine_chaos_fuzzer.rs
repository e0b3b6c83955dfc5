//! Fuzz target for the matching engine under store failures
//!
//! Replays an arbitrary history of inserts and passes twice: once against a
//! healthy `MemoryStore`, once against a `ChaoticStore` whose passes are
//! retried until they commit.
//!
//! # Invariants
//!
//! - Store failures surface as transient errors, never panics
//! - An aborted pass leaves no matches and no cursor movement behind
//! - Retried passes end in exactly the healthy run's state
//! - No (block, key) pair is tested twice by committed passes

#![no_main]

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use arbitrary::Arbitrary;
use keysweep_core::{
    BlockId, ChaoticStore, EngineConfig, MatchStore, MatchingEngine, MemoryStore, Validated,
    ValidationOracle,
};
use keysweep_crypto::KeyMaterial;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    chaos_seed: u64,
    /// Failure rate 0-4 maps to 0%-40%
    failure_rate_tenth: u8,
    page_size: u8,
    operations: Vec<Operation>,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Operation {
    /// Block opened by the key whose first word is `opener` (0: none)
    AddBlock { opener: u8, encrypted: bool },
    AddKey { word: u8 },
    Pass,
}

/// Logs every call as `(block label, key word)`.
#[derive(Clone, Default)]
struct Oracle {
    calls: Arc<Mutex<Vec<(u64, u32)>>>,
}

impl ValidationOracle for Oracle {
    fn attempt_match(&self, ciphertext: &[u8], key: &KeyMaterial) -> Option<Validated> {
        let label = u64::from_be_bytes(ciphertext.get(1..9)?.try_into().ok()?);
        let opener = u32::from(*ciphertext.first()?);
        let word = key.words()[0];

        self.calls.lock().unwrap().push((label, word));
        (opener != 0 && opener == word).then_some(Validated { length: 9, checksum: word })
    }
}

fn block_bytes(opener: u8, label: u64) -> Vec<u8> {
    let mut bytes = vec![opener];
    bytes.extend_from_slice(&label.to_be_bytes());
    bytes
}

fn snapshot(store: &MemoryStore) -> (keysweep_core::ProgressCursor, Vec<bool>) {
    let blocks = store.stats().unwrap().blocks;
    let matched = (1..=blocks)
        .map(|id| store.load_block(BlockId(id)).unwrap().unwrap().matched.is_some())
        .collect();
    (store.load_cursor().unwrap(), matched)
}

fuzz_target!(|scenario: Scenario| {
    if scenario.operations.len() > 64 {
        return;
    }

    let failure_rate = f64::from(scenario.failure_rate_tenth % 5) / 10.0;
    let config = EngineConfig { page_size: usize::from(scenario.page_size % 8) + 1 };

    let healthy = MemoryStore::new();
    let healthy_oracle = Oracle::default();
    let healthy_engine =
        MatchingEngine::with_config(healthy.clone(), healthy_oracle.clone(), config.clone());

    let inner = MemoryStore::new();
    let chaos_oracle = Oracle::default();
    let chaotic_engine = MatchingEngine::with_config(
        ChaoticStore::with_seed(inner.clone(), failure_rate, scenario.chaos_seed),
        chaos_oracle.clone(),
        config,
    );

    let mut label = 0u64;
    for operation in scenario.operations.iter().chain(std::iter::once(&Operation::Pass)) {
        match *operation {
            Operation::AddBlock { opener, encrypted } => {
                label += 1;
                healthy.append_block(&block_bytes(opener, label), encrypted).unwrap();
                inner.append_block(&block_bytes(opener, label), encrypted).unwrap();
            },
            Operation::AddKey { word } => {
                let key = KeyMaterial::from_words([u32::from(word), 1, 2, 3]);
                healthy.append_keys(&[key]).unwrap();
                inner.append_keys(&[key]).unwrap();
            },
            Operation::Pass => {
                healthy_engine.run_pass().unwrap();

                loop {
                    let before = snapshot(&inner);
                    let calls_before = chaos_oracle.calls.lock().unwrap().len();
                    match chaotic_engine.run_pass() {
                        Ok(_) => break,
                        Err(e) => {
                            assert!(e.is_transient(), "unexpected failure: {e:?}");
                            assert_eq!(snapshot(&inner), before, "aborted pass left effects");
                            chaos_oracle.calls.lock().unwrap().truncate(calls_before);
                        },
                    }
                }
            },
        }
    }

    assert_eq!(snapshot(&inner), snapshot(&healthy));

    let calls = chaos_oracle.calls.lock().unwrap().clone();
    let unique: HashSet<_> = calls.iter().copied().collect();
    assert_eq!(unique.len(), calls.len(), "a pair was tested twice");
    assert_eq!(calls, *healthy_oracle.calls.lock().unwrap());
});
