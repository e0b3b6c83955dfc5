//! Storage abstraction for blocks, keys and the progress cursor
//!
//! Two traits split the surface by caller:
//!
//! - [`MatchStore`]: the store handle. Ingestion appends through it (taking
//!   the allocator role of the [`TableLock`](crate::TableLock)) and the
//!   engine opens one [`PassTransaction`] per pass from it.
//! - [`PassTransaction`]: everything a pass reads and writes. Holds the
//!   matcher role for its whole lifetime. Nothing it writes is visible to
//!   other handles until [`PassTransaction::commit`]; dropping it rolls every
//!   effect back.
//!
//! Both traits are synchronous. Production callers run passes on a blocking
//! thread.

mod chaotic;
mod error;
mod memory;

pub use chaotic::{ChaoticPass, ChaoticStore};
pub use error::StoreError;
use keysweep_crypto::KeyMaterial;
pub use memory::{MemoryPass, MemoryStore};

use crate::types::{
    Block, BlockId, BlockMatch, CursorUpdate, Key, KeyId, PendingBlock, ProgressCursor, StoreStats,
};

/// Store handle for blocks, keys and the cursor row
///
/// Must be Clone (handed to the scheduler and ingestion), Send + Sync, and
/// synchronous. Implementations share internal state via Arc, so clones
/// access the same underlying storage.
pub trait MatchStore: Clone + Send + Sync + 'static {
    /// Transaction type for one matching pass.
    type Pass<'a>: PassTransaction
    where
        Self: 'a;

    /// Begin a pass: acquire the matcher role and open a transaction.
    ///
    /// Blocks while ingestion holds the allocator role.
    fn begin_pass(&self) -> Result<Self::Pass<'_>, StoreError>;

    /// Append one block, allocating the next block id.
    ///
    /// Takes the allocator role, so it waits for in-flight passes.
    fn append_block(&self, ciphertext: &[u8], encrypted: bool) -> Result<BlockId, StoreError>;

    /// Append keys, allocating ids in input order.
    ///
    /// Key material already present returns its existing id and allocates
    /// nothing. All keys are inserted atomically.
    fn append_keys(&self, keys: &[KeyMaterial]) -> Result<Vec<KeyId>, StoreError>;

    /// Load a block by id. `None` if it doesn't exist.
    fn load_block(&self, id: BlockId) -> Result<Option<Block>, StoreError>;

    /// Committed cursor, without taking the row lock.
    fn load_cursor(&self) -> Result<ProgressCursor, StoreError>;

    /// Row counts.
    fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// One matching pass against a store
///
/// # Invariants
///
/// - Reads observe this transaction's own writes.
/// - Every page is ascending by id and bounded by `limit`.
/// - Block pages contain only encrypted blocks with no match, committed or
///   staged.
pub trait PassTransaction {
    /// Read the cursor row and hold its exclusive lock until the transaction
    /// ends.
    ///
    /// # Errors
    ///
    /// - `Invariant`: the cursor row is missing
    fn read_cursor_for_update(&mut self) -> Result<ProgressCursor, StoreError>;

    /// Unmatched encrypted blocks with id strictly greater than `after`.
    fn unmatched_blocks_after(
        &self,
        after: Option<BlockId>,
        limit: usize,
    ) -> Result<Vec<PendingBlock>, StoreError>;

    /// Unmatched encrypted blocks with `after < id <= through`.
    fn unmatched_blocks_through(
        &self,
        through: BlockId,
        after: Option<BlockId>,
        limit: usize,
    ) -> Result<Vec<PendingBlock>, StoreError>;

    /// Keys with id strictly greater than `after`.
    fn keys_after(&self, after: Option<KeyId>, limit: usize) -> Result<Vec<Key>, StoreError>;

    /// Record matches as one batch.
    ///
    /// # Errors
    ///
    /// - `NotFound`: a block doesn't exist
    /// - `Invariant`: a block is already matched or not encrypted; nothing
    ///   from the batch is applied
    fn apply_matches(&mut self, matches: &[BlockMatch]) -> Result<(), StoreError>;

    /// Update the cursor row.
    ///
    /// # Errors
    ///
    /// - `Invariant`: a watermark would move backwards, or the row is missing
    fn write_cursor(&mut self, update: CursorUpdate) -> Result<(), StoreError>;

    /// Make all effects of the pass durable at once.
    fn commit(self) -> Result<(), StoreError>;
}
