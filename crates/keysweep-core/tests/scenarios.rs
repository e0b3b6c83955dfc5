//! Engine behaviour on small, hand-checked histories.

mod common;

use common::{NO_KEY, RecordingOracle, add_block, add_key};
use keysweep_core::{
    AeadOracle, BlockId, KeyId, KeyMatch, MatchStore, MatchingEngine, MemoryStore, ProgressCursor,
};
use keysweep_crypto::{KeyMaterial, crc32, seal_block};

fn engine() -> (MemoryStore, RecordingOracle, MatchingEngine<MemoryStore, RecordingOracle>) {
    let store = MemoryStore::new();
    let oracle = RecordingOracle::new();
    let engine = MatchingEngine::new(store.clone(), oracle.clone());
    (store, oracle, engine)
}

#[test]
fn empty_store_pass_leaves_cursor_unset() {
    let (store, oracle, engine) = engine();

    let report = engine.run_pass().unwrap();

    assert_eq!(report.cursor_after, ProgressCursor::new(None, None));
    assert_eq!(store.load_cursor().unwrap(), ProgressCursor::new(None, None));
    assert_eq!(oracle.call_count(), 0);
}

#[test]
fn key_present_before_pass_matches_in_phase_one() {
    let (store, oracle, engine) = engine();
    let block = add_block(&store, 1, 77);
    let key = add_key(&store, 77);

    let report = engine.run_pass().unwrap();

    assert_eq!(oracle.calls(), vec![(1, 77)]);
    assert_eq!(report.matches.len(), 1);
    assert_eq!(
        store.load_block(block).unwrap().unwrap().matched,
        Some(KeyMatch { key_id: key, decoded_length: 1, decoded_checksum: 77 })
    );
    assert_eq!(store.load_cursor().unwrap(), ProgressCursor::new(Some(BlockId(1)), Some(KeyId(1))));
}

#[test]
fn key_inserted_before_block_matches_in_phase_one() {
    let (store, oracle, engine) = engine();
    let key = add_key(&store, 5);
    let block = add_block(&store, 1, 5);

    engine.run_pass().unwrap();

    assert_eq!(oracle.calls(), vec![(1, 5)]);
    assert_eq!(store.load_block(block).unwrap().unwrap().matched.unwrap().key_id, key);
}

#[test]
fn key_arriving_after_block_was_swept_is_tested_next_pass() {
    let (store, oracle, engine) = engine();
    add_key(&store, 3);
    let block = add_block(&store, 1, 9);

    let first = engine.run_pass().unwrap();
    assert_eq!(first.cursor_after, ProgressCursor::new(Some(BlockId(1)), Some(KeyId(1))));
    assert!(store.load_block(block).unwrap().unwrap().matched.is_none());

    let key = add_key(&store, 9);
    assert_eq!(key, KeyId(2));
    oracle.clear();

    let second = engine.run_pass().unwrap();

    // The block at the watermark meets the new key exactly once
    assert_eq!(oracle.calls(), vec![(1, 9)]);
    assert_eq!(second.keys_swept, 1);
    assert_eq!(store.load_block(block).unwrap().unwrap().matched.unwrap().key_id, key);
    assert_eq!(second.cursor_after, ProgressCursor::new(Some(BlockId(1)), Some(KeyId(2))));
}

#[test]
fn watermark_block_is_not_retested_in_the_pass_that_swept_it() {
    let (store, oracle, engine) = engine();
    add_block(&store, 1, NO_KEY);
    add_key(&store, 4);

    engine.run_pass().unwrap();

    // Phase 1 tested block 1 against key 4; phase 2 must not repeat it
    assert_eq!(oracle.calls(), vec![(1, 4)]);
}

#[test]
fn blocks_and_keys_inserted_together_take_one_call_per_pair() {
    let (store, oracle, engine) = engine();
    add_block(&store, 1, NO_KEY);
    add_block(&store, 2, NO_KEY);
    add_key(&store, 10);
    add_key(&store, 20);

    let report = engine.run_pass().unwrap();

    assert_eq!(oracle.calls(), vec![(1, 10), (1, 20), (2, 10), (2, 20)]);
    assert_eq!(report.oracle_calls, 4);
    assert_eq!(report.cursor_after, ProgressCursor::new(Some(BlockId(2)), Some(KeyId(2))));

    // Nothing new: the next pass makes no calls
    engine.run_pass().unwrap();
    assert_eq!(oracle.call_count(), 4);
}

#[test]
fn first_key_in_id_order_wins_when_two_validate() {
    let store = MemoryStore::new();
    let block = add_block(&store, 1, NO_KEY);
    let low = add_key(&store, 1);
    add_key(&store, 2);

    let engine = MatchingEngine::new(store.clone(), |_: &[u8], _: &KeyMaterial| {
        Some(keysweep_core::Validated { length: 0, checksum: 0 })
    });
    engine.run_pass().unwrap();

    assert_eq!(store.load_block(block).unwrap().unwrap().matched.unwrap().key_id, low);
}

#[test]
fn matched_block_is_never_overwritten() {
    let (store, oracle, engine) = engine();
    let block = add_block(&store, 1, 8);
    let first = add_key(&store, 8);
    engine.run_pass().unwrap();

    // A second copy of the same opener word under different material
    store.append_keys(&[KeyMaterial::from_words([8, 1, 1, 1])]).unwrap();
    oracle.clear();
    engine.run_pass().unwrap();

    assert_eq!(oracle.call_count(), 0);
    assert_eq!(store.load_block(block).unwrap().unwrap().matched.unwrap().key_id, first);
}

#[test]
fn plaintext_blocks_are_never_tested() {
    let (store, oracle, engine) = engine();
    let plain = store.append_block(&common::block_bytes(1, 6), false).unwrap();
    add_key(&store, 6);

    let report = engine.run_pass().unwrap();

    assert_eq!(oracle.call_count(), 0);
    assert_eq!(report.blocks_swept, 0);
    assert!(store.load_block(plain).unwrap().unwrap().matched.is_none());
}

#[test]
fn interleaved_arrivals_match_everything_once() {
    let (store, oracle, engine) = engine();

    add_block(&store, 1, 100);
    engine.run_pass().unwrap();
    add_key(&store, 200);
    add_block(&store, 2, 200);
    engine.run_pass().unwrap();
    add_key(&store, 100);
    add_block(&store, 3, 300);
    add_key(&store, 300);
    engine.run_pass().unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.matched, 3);
    assert_eq!(stats.unmatched(), 0);

    let mut calls = oracle.calls();
    let total = calls.len();
    calls.sort_unstable();
    calls.dedup();
    assert_eq!(calls.len(), total, "a pair was tested twice");
}

#[test]
fn sealed_blocks_match_under_the_aead_oracle() {
    let store = MemoryStore::new();
    let right = KeyMaterial::from_words([0xdead_beef, 1, 2, 3]);
    let wrong = KeyMaterial::from_words([0x1234_5678, 4, 5, 6]);
    let payload = b"archive group 7 payload".to_vec();

    store.append_keys(&[wrong]).unwrap();
    let block = store.append_block(&seal_block(&payload, &right, [7u8; 24]), true).unwrap();
    let engine = MatchingEngine::new(store.clone(), AeadOracle);
    engine.run_pass().unwrap();
    assert!(store.load_block(block).unwrap().unwrap().matched.is_none());

    let key_id = store.append_keys(&[right]).unwrap()[0];
    engine.run_pass().unwrap();

    let matched = store.load_block(block).unwrap().unwrap().matched.unwrap();
    assert_eq!(matched.key_id, key_id);
    assert_eq!(matched.decoded_length, payload.len() as u32);
    assert_eq!(matched.decoded_checksum, crc32(&payload));
}
