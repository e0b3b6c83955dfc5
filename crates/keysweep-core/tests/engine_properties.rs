//! Property tests for the matching engine
//!
//! Random histories of block inserts, key inserts and passes, checked
//! against brute force:
//! - No (block, key) pair is tested twice across committed passes
//! - Once inserts stop, one more pass leaves no untested pair
//! - A block is matched exactly when some key opens it, and never rematched
//! - The cursor never moves backwards

mod common;

use std::collections::{BTreeMap, HashSet};

use common::{NO_KEY, RecordingOracle, add_block, add_key};
use keysweep_core::{EngineConfig, MatchStore, MatchingEngine, MemoryStore, ProgressCursor};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Step {
    /// Block opened by the key with this word, or by nothing
    Block(u32),
    /// Key with this word (repeats are de-duplicated by the store)
    Key(u32),
    Pass,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => prop_oneof![Just(NO_KEY), 1u32..12].prop_map(Step::Block),
        3 => (1u32..12).prop_map(Step::Key),
        2 => Just(Step::Pass),
    ]
}

/// Outcome of replaying a history: block label -> opener, and key words.
struct Replay {
    store: MemoryStore,
    oracle: RecordingOracle,
    openers: BTreeMap<u32, u32>,
    words: HashSet<u32>,
    cursors: Vec<ProgressCursor>,
}

fn replay(steps: &[Step], page_size: usize) -> Replay {
    let store = MemoryStore::new();
    let oracle = RecordingOracle::new();
    let engine = MatchingEngine::with_config(
        store.clone(),
        oracle.clone(),
        EngineConfig { page_size },
    );

    let mut openers = BTreeMap::new();
    let mut words = HashSet::new();
    let mut cursors = vec![store.load_cursor().unwrap()];

    for step in steps {
        match step {
            Step::Block(opener) => {
                let label = openers.len() as u32 + 1;
                add_block(&store, label, *opener);
                openers.insert(label, *opener);
            },
            Step::Key(word) => {
                add_key(&store, *word);
                words.insert(*word);
            },
            Step::Pass => {
                cursors.push(engine.run_pass().unwrap().cursor_after);
            },
        }
    }

    // Inserts have stopped: one pass must cover the rest
    cursors.push(engine.run_pass().unwrap().cursor_after);

    Replay { store, oracle, openers, words, cursors }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: every pair is tested at most once
    #[test]
    fn prop_no_pair_tested_twice(
        steps in prop::collection::vec(step(), 0..40),
        page_size in 1usize..6,
    ) {
        let replay = replay(&steps, page_size);

        let calls = replay.oracle.calls();
        let unique: HashSet<_> = calls.iter().copied().collect();
        prop_assert_eq!(unique.len(), calls.len());
    }

    /// Property: after a final pass, unmatched blocks have met every key
    #[test]
    fn prop_no_pair_missed(
        steps in prop::collection::vec(step(), 0..40),
        page_size in 1usize..6,
    ) {
        let replay = replay(&steps, page_size);
        let tested: HashSet<_> = replay.oracle.calls().into_iter().collect();

        for (&label, &opener) in &replay.openers {
            let matched = replay.words.contains(&opener);
            if !matched {
                for &word in &replay.words {
                    prop_assert!(
                        tested.contains(&(label, word)),
                        "block {} never met key {}", label, word
                    );
                }
            }
        }
    }

    /// Property: a block is matched iff a key opens it, and by that key
    #[test]
    fn prop_matches_agree_with_brute_force(
        steps in prop::collection::vec(step(), 0..40),
        page_size in 1usize..6,
    ) {
        let replay = replay(&steps, page_size);

        for (id, (&label, &opener)) in (1u64..).zip(&replay.openers) {
            let block = replay.store.load_block(keysweep_core::BlockId(id)).unwrap().unwrap();
            match block.matched {
                Some(found) => {
                    prop_assert!(replay.words.contains(&opener));
                    prop_assert_eq!(found.decoded_length, label);
                    prop_assert_eq!(found.decoded_checksum, opener);
                },
                None => prop_assert!(!replay.words.contains(&opener)),
            }
        }

        let stats = replay.store.stats().unwrap();
        let expected = replay.openers.values().filter(|o| replay.words.contains(o)).count();
        prop_assert_eq!(stats.matched, expected as u64);
    }

    /// Property: cursor watermarks never decrease
    #[test]
    fn prop_cursor_monotonic(
        steps in prop::collection::vec(step(), 0..40),
        page_size in 1usize..6,
    ) {
        let replay = replay(&steps, page_size);

        for pair in replay.cursors.windows(2) {
            prop_assert!(pair[1].last_block_id >= pair[0].last_block_id);
            prop_assert!(pair[1].last_key_id >= pair[0].last_key_id);
        }
    }
}
