//! Chaotic store wrapper for fault injection testing
//!
//! Store wrapper that randomly fails operations, including pass commits, to
//! test that an aborted pass leaves no trace and that re-running it is
//! always safe.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex};

use keysweep_crypto::KeyMaterial;

use super::{MatchStore, PassTransaction, StoreError};
use crate::types::{
    Block, BlockId, BlockMatch, CursorUpdate, Key, KeyId, PendingBlock, ProgressCursor, StoreStats,
};

/// Chaotic store wrapper that randomly injects failures
///
/// Delegates to an underlying store but fails each operation with the
/// configured probability. Uses Arc<Mutex<>> for the RNG state, making it
/// Clone and thread-safe.
#[derive(Clone)]
pub struct ChaoticStore<S: MatchStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operation counter
    operation_count: Arc<Mutex<usize>>,
}

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator, so chaos runs are reproducible by seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    /// Check if we should fail (returns true with probability = `failure_rate`)
    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: MatchStore> ChaoticStore<S> {
    /// Create a new chaotic store wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of store operations attempted, pass operations included.
    pub fn operation_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        *self.operation_count.lock().expect("operation_count mutex poisoned")
    }

    /// Count the operation and decide whether it fails.
    fn inject(&self) -> Result<(), StoreError> {
        #[allow(clippy::expect_used)]
        {
            *self.operation_count.lock().expect("operation_count mutex poisoned") += 1;
        }

        #[allow(clippy::expect_used)]
        let fail =
            self.rng.lock().expect("ChaoticRng mutex poisoned").should_fail(self.failure_rate);

        if fail { Err(StoreError::Io("chaotic failure injection".to_string())) } else { Ok(()) }
    }
}

impl<S: MatchStore> MatchStore for ChaoticStore<S> {
    type Pass<'a>
        = ChaoticPass<'a, S>
    where
        Self: 'a;

    fn begin_pass(&self) -> Result<ChaoticPass<'_, S>, StoreError> {
        self.inject()?;
        Ok(ChaoticPass { inner: self.inner.begin_pass()?, chaos: self })
    }

    fn append_block(&self, ciphertext: &[u8], encrypted: bool) -> Result<BlockId, StoreError> {
        self.inject()?;
        self.inner.append_block(ciphertext, encrypted)
    }

    fn append_keys(&self, keys: &[KeyMaterial]) -> Result<Vec<KeyId>, StoreError> {
        self.inject()?;
        self.inner.append_keys(keys)
    }

    fn load_block(&self, id: BlockId) -> Result<Option<Block>, StoreError> {
        self.inject()?;
        self.inner.load_block(id)
    }

    fn load_cursor(&self) -> Result<ProgressCursor, StoreError> {
        self.inject()?;
        self.inner.load_cursor()
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inject()?;
        self.inner.stats()
    }
}

/// Pass transaction that fails randomly, commit included.
pub struct ChaoticPass<'a, S: MatchStore + 'a> {
    inner: S::Pass<'a>,
    chaos: &'a ChaoticStore<S>,
}

impl<S: MatchStore> PassTransaction for ChaoticPass<'_, S> {
    fn read_cursor_for_update(&mut self) -> Result<ProgressCursor, StoreError> {
        self.chaos.inject()?;
        self.inner.read_cursor_for_update()
    }

    fn unmatched_blocks_after(
        &self,
        after: Option<BlockId>,
        limit: usize,
    ) -> Result<Vec<PendingBlock>, StoreError> {
        self.chaos.inject()?;
        self.inner.unmatched_blocks_after(after, limit)
    }

    fn unmatched_blocks_through(
        &self,
        through: BlockId,
        after: Option<BlockId>,
        limit: usize,
    ) -> Result<Vec<PendingBlock>, StoreError> {
        self.chaos.inject()?;
        self.inner.unmatched_blocks_through(through, after, limit)
    }

    fn keys_after(&self, after: Option<KeyId>, limit: usize) -> Result<Vec<Key>, StoreError> {
        self.chaos.inject()?;
        self.inner.keys_after(after, limit)
    }

    fn apply_matches(&mut self, matches: &[BlockMatch]) -> Result<(), StoreError> {
        self.chaos.inject()?;
        self.inner.apply_matches(matches)
    }

    fn write_cursor(&mut self, update: CursorUpdate) -> Result<(), StoreError> {
        self.chaos.inject()?;
        self.inner.write_cursor(update)
    }

    fn commit(self) -> Result<(), StoreError> {
        // Failing here drops the inner pass uncommitted
        self.chaos.inject()?;
        self.inner.commit()
    }
}
