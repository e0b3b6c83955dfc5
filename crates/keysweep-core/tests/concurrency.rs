//! Ingestion running alongside passes.
//!
//! Appends take the allocator role and passes the matcher role, so a pass
//! never sees an id appear mid-sweep. Whatever the interleaving, a final
//! pass must leave every pair tested exactly once.

mod common;

use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use common::{NO_KEY, RecordingOracle, add_block, add_key};
use keysweep_core::{MatchStore, MatchingEngine, MemoryStore};

#[test]
fn passes_and_ingestion_interleave_safely() {
    let store = MemoryStore::new();
    let oracle = RecordingOracle::new();
    let engine = MatchingEngine::new(store.clone(), oracle.clone());
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let matcher = scope.spawn(|| {
            let mut passes = 0;
            while !done.load(Ordering::Acquire) {
                engine.run_pass().unwrap();
                passes += 1;
            }
            passes
        });

        let blocks = scope.spawn(|| {
            for label in 1..=200u32 {
                let opener = if label % 3 == 0 { NO_KEY } else { label % 17 + 1 };
                add_block(&store, label, opener);
            }
        });

        let keys = scope.spawn(|| {
            for word in 1..=18u32 {
                add_key(&store, word);
                thread::yield_now();
            }
        });

        blocks.join().unwrap();
        keys.join().unwrap();
        done.store(true, Ordering::Release);
        assert!(matcher.join().unwrap() > 0);
    });

    engine.run_pass().unwrap();

    let calls = oracle.calls();
    let unique: HashSet<_> = calls.iter().copied().collect();
    assert_eq!(unique.len(), calls.len(), "a pair was tested twice");

    let stats = store.stats().unwrap();
    assert_eq!(stats.blocks, 200);
    assert_eq!(stats.keys, 18);
    // Every block whose label isn't a multiple of 3 has its opener present
    assert_eq!(stats.matched, 200 - 66);
}

#[test]
fn concurrent_passes_never_double_test() {
    let store = MemoryStore::new();
    let oracle = RecordingOracle::new();

    for label in 1..=50u32 {
        add_block(&store, label, NO_KEY);
    }
    for word in 1..=10u32 {
        add_key(&store, word);
    }

    thread::scope(|scope| {
        for _ in 0..4 {
            let engine = MatchingEngine::new(store.clone(), oracle.clone());
            scope.spawn(move || engine.run_pass().unwrap());
        }
    });

    assert_eq!(oracle.call_count(), 500);
}
