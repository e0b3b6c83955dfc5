//! Two-phase incremental matching.
//!
//! Blocks and keys are only ever appended, with ids allocated in arrival
//! order, so the set of (block, key) pairs already tested is always a
//! rectangle described by two watermarks:
//!
//! ```text
//!              blocks ->
//!          ┌──────────────┬─────────┐
//!        k │##############│         │
//!        e │##############│    A    │
//!        y │##############│         │
//!        s ├──────────────┼─────────┤  <- last_key_id
//!        │ │      C       │    B    │
//!        v │              │         │
//!          └──────────────┴─────────┘
//!                         ^
//!                   last_block_id
//! ```
//!
//! A pass covers the new area in two phases:
//!
//! 1. New blocks (columns A and B) are each tested against every key that
//!    exists, stopping at the first key that validates.
//! 2. New keys (row C) are tested against the blocks at or below the
//!    watermark the pass started from. Those blocks have never met a key
//!    past `last_key_id`. Blocks swept by phase 1 of the same pass are
//!    excluded, so quadrant B is tested once.
//!
//! The pass runs in one store transaction under the matcher role of the
//! table lock, so no id can appear mid-pass. Each phase writes its watermark
//! once, after its loop; nothing is durable until the pass commits.

use crate::{
    error::EngineError,
    oracle::ValidationOracle,
    pager::{DEFAULT_PAGE_SIZE, Pager},
    storage::{MatchStore, PassTransaction},
    types::{BlockId, BlockMatch, CursorUpdate, PendingBlock, ProgressCursor},
};

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Rows per page when streaming blocks and keys
    pub page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { page_size: DEFAULT_PAGE_SIZE }
    }
}

/// What one committed pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Cursor when the pass started
    pub cursor_before: ProgressCursor,
    /// Cursor the pass committed
    pub cursor_after: ProgressCursor,
    /// Blocks visited in phase 1
    pub blocks_swept: u64,
    /// Keys visited in phase 2
    pub keys_swept: u64,
    /// Oracle invocations across both phases
    pub oracle_calls: u64,
    /// Matches applied, in discovery order
    pub matches: Vec<BlockMatch>,
}

impl PassReport {
    /// True if the pass neither visited anything nor found anything.
    pub fn is_idle(&self) -> bool {
        self.blocks_swept == 0 && self.keys_swept == 0 && self.matches.is_empty()
    }
}

/// Runs matching passes against a store.
pub struct MatchingEngine<S, O> {
    store: S,
    oracle: O,
    config: EngineConfig,
}

impl<S: MatchStore, O: ValidationOracle> MatchingEngine<S, O> {
    /// Engine with default configuration.
    pub fn new(store: S, oracle: O) -> Self {
        Self::with_config(store, oracle, EngineConfig::default())
    }

    /// Engine with explicit configuration.
    pub fn with_config(store: S, oracle: O, config: EngineConfig) -> Self {
        Self { store, oracle, config }
    }

    /// The store passes run against.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The oracle passes consult.
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Run one pass and commit it.
    ///
    /// On error nothing the pass did is persisted; re-running is always
    /// safe.
    ///
    /// # Errors
    ///
    /// - `Store`: storage failure, transient or invariant
    /// - `Invariant`: the store returned rows out of order or out of bounds
    pub fn run_pass(&self) -> Result<PassReport, EngineError> {
        let result = self.try_run_pass();

        match &result {
            Ok(report) if report.is_idle() => {
                tracing::debug!(cursor = ?report.cursor_after, "Pass found nothing new");
            },
            Ok(report) => {
                tracing::info!(
                    blocks_swept = report.blocks_swept,
                    keys_swept = report.keys_swept,
                    oracle_calls = report.oracle_calls,
                    matches = report.matches.len(),
                    last_block_id = ?report.cursor_after.last_block_id,
                    last_key_id = ?report.cursor_after.last_key_id,
                    "Pass committed"
                );
            },
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "Pass aborted, will retry");
            },
            Err(e) => {
                tracing::error!(error = %e, "Pass aborted on invariant violation");
            },
        }

        result
    }

    fn try_run_pass(&self) -> Result<PassReport, EngineError> {
        let mut pass = self.store.begin_pass()?;

        let cursor_before = pass.read_cursor_for_update()?;
        let mut report =
            PassReport { cursor_before, cursor_after: cursor_before, ..PassReport::default() };

        self.sweep_new_blocks(&mut pass, &mut report)?;
        self.sweep_new_keys(&mut pass, cursor_before.last_block_id, &mut report)?;

        report.cursor_after = pass.read_cursor_for_update()?;
        debug_assert!(report.cursor_after.last_block_id >= cursor_before.last_block_id);
        debug_assert!(report.cursor_after.last_key_id >= cursor_before.last_key_id);

        pass.commit()?;
        Ok(report)
    }

    /// Phase 1: every block past the watermark against every key.
    fn sweep_new_blocks<P: PassTransaction>(
        &self,
        pass: &mut P,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        let cursor = pass.read_cursor_for_update()?;
        let mut last_block_id = cursor.last_block_id;

        let mut blocks = Pager::new(cursor.last_block_id, self.config.page_size);
        while let Some(block) = blocks.next(|after, limit| pass.unmatched_blocks_after(after, limit))? {
            if let Some(found) = self.first_matching_key(pass, &block, report)? {
                tracing::debug!(
                    block_id = %found.block_id,
                    key_id = %found.key_id,
                    length = found.length,
                    "Key found for new block"
                );
                pass.apply_matches(&[found])?;
                report.matches.push(found);
            }

            last_block_id = Some(block.id);
            report.blocks_swept += 1;
        }

        pass.write_cursor(CursorUpdate::Blocks(last_block_id))?;
        Ok(())
    }

    /// First key, in id order, that validates `block`.
    ///
    /// At most one key is expected to validate a block. Should two ever do,
    /// the lower key id wins.
    fn first_matching_key<P: PassTransaction>(
        &self,
        pass: &P,
        block: &PendingBlock,
        report: &mut PassReport,
    ) -> Result<Option<BlockMatch>, EngineError> {
        let mut keys = Pager::new(None, self.config.page_size);
        while let Some(key) = keys.next(|after, limit| pass.keys_after(after, limit))? {
            report.oracle_calls += 1;
            if let Some(validated) = self.oracle.attempt_match(&block.ciphertext, &key.material) {
                return Ok(Some(BlockMatch {
                    block_id: block.id,
                    key_id: key.id,
                    length: validated.length,
                    checksum: validated.checksum,
                }));
            }
        }

        Ok(None)
    }

    /// Phase 2: every key past the watermark against the blocks that
    /// predate this pass.
    ///
    /// `swept_before` is `last_block_id` as it stood before phase 1. Blocks
    /// at or below it predate the pass; anything above it was swept by
    /// phase 1 against the full key set. `None` leaves no block to scan, but
    /// the keys still advance.
    fn sweep_new_keys<P: PassTransaction>(
        &self,
        pass: &mut P,
        swept_before: Option<BlockId>,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        let cursor = pass.read_cursor_for_update()?;
        if cursor.last_block_id.is_none() {
            // No block has ever been swept, so no key has anything to meet
            // yet. Phase 1 will test these keys when blocks arrive.
            return Ok(());
        }

        let mut last_key_id = cursor.last_key_id;

        let mut keys = Pager::new(cursor.last_key_id, self.config.page_size);
        while let Some(key) = keys.next(|after, limit| pass.keys_after(after, limit))? {
            let mut found = Vec::new();

            if let Some(through) = swept_before {
                let mut blocks = Pager::new(None, self.config.page_size);
                while let Some(block) =
                    blocks.next(|after, limit| pass.unmatched_blocks_through(through, after, limit))?
                {
                    if block.id > through {
                        return Err(EngineError::Invariant(format!(
                            "block {} returned past {through}",
                            block.id
                        )));
                    }

                    // One key may open several old blocks, so keep scanning
                    report.oracle_calls += 1;
                    if let Some(validated) =
                        self.oracle.attempt_match(&block.ciphertext, &key.material)
                    {
                        found.push(BlockMatch {
                            block_id: block.id,
                            key_id: key.id,
                            length: validated.length,
                            checksum: validated.checksum,
                        });
                    }
                }
            }

            if !found.is_empty() {
                tracing::debug!(key_id = %key.id, matches = found.len(), "New key opened old blocks");
                pass.apply_matches(&found)?;
                report.matches.extend(found);
            }

            last_key_id = Some(key.id);
            report.keys_swept += 1;
        }

        pass.write_cursor(CursorUpdate::Keys(last_key_id))?;
        Ok(())
    }
}
