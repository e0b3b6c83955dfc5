//! Redb-backed durable store.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. A pass
//! is one write transaction: its matches and cursor update become durable
//! together at commit, or not at all.
//!
//! Redb locks the database file for as long as a [`Database`] is open.
//! [`RedbStore`] keeps it open and owns the file; [`RedbFile`] opens it per
//! pass or append, so other processes can ingest in between.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use keysweep_core::{
    Block, BlockId, BlockMatch, CursorUpdate, Key, KeyId, KeyMatch, MatchStore, PassTransaction,
    PendingBlock, ProgressCursor, ShareGuard, StoreError, StoreStats, TableLock,
};
use keysweep_crypto::KeyMaterial;
use redb::{Database, DatabaseError, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};

/// Table: blocks
/// Key: block id
/// Value: ciphertext bytes
const BLOCKS: TableDefinition<u64, &[u8]> = TableDefinition::new("blocks");

/// Table: block_meta
/// Key: block id
/// Value: CBOR-encoded StoredBlockMeta
const BLOCK_META: TableDefinition<u64, &[u8]> = TableDefinition::new("block_meta");

/// Table: unmatched
/// Key: id of an encrypted block with no match yet
/// Value: none
const UNMATCHED: TableDefinition<u64, ()> = TableDefinition::new("unmatched");

/// Table: keys
/// Key: key id
/// Value: key material, 16 bytes big-endian
const KEYS: TableDefinition<u64, &[u8]> = TableDefinition::new("keys");

/// Table: key_index
/// Key: key material, 16 bytes big-endian
/// Value: key id
const KEY_INDEX: TableDefinition<&[u8], u64> = TableDefinition::new("key_index");

/// Table: cursor
/// Key: [`CURSOR_ROW`]
/// Value: CBOR-encoded ProgressCursor
const CURSOR: TableDefinition<&str, &[u8]> = TableDefinition::new("cursor");

/// The cursor table's only row.
const CURSOR_ROW: &str = "progress";

/// Per-block fields that change after insert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StoredBlockMeta {
    encrypted: bool,
    matched: Option<KeyMatch>,
}

/// Durable store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc). Redb
/// admits one write transaction at a time, so passes and appends are
/// serialized by the database as well as by the [`TableLock`].
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    table_lock: Arc<TableLock>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates missing tables. A database with no blocks and no keys gets a
    /// fresh `(None, None)` cursor row; an existing database missing its
    /// cursor row is left alone and every pass on it fails.
    ///
    /// # Errors
    ///
    /// - `Lock`: another handle, in this process or another, has the file open
    /// - `Io`: the database cannot be opened or created
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => {
                StoreError::Lock(format!("{} is open elsewhere", path.as_ref().display()))
            },
            other => StoreError::Io(other.to_string()),
        })?;

        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let blocks = txn.open_table(BLOCKS).map_err(|e| StoreError::Io(e.to_string()))?;
            let _ = txn.open_table(BLOCK_META).map_err(|e| StoreError::Io(e.to_string()))?;
            let _ = txn.open_table(UNMATCHED).map_err(|e| StoreError::Io(e.to_string()))?;
            let keys = txn.open_table(KEYS).map_err(|e| StoreError::Io(e.to_string()))?;
            let _ = txn.open_table(KEY_INDEX).map_err(|e| StoreError::Io(e.to_string()))?;
            let mut cursor = txn.open_table(CURSOR).map_err(|e| StoreError::Io(e.to_string()))?;

            let fresh = blocks.is_empty().map_err(|e| StoreError::Io(e.to_string()))?
                && keys.is_empty().map_err(|e| StoreError::Io(e.to_string()))?;
            let has_cursor =
                cursor.get(CURSOR_ROW).map_err(|e| StoreError::Io(e.to_string()))?.is_some();

            if fresh && !has_cursor {
                let bytes = encode_cbor(&ProgressCursor::default())?;
                cursor
                    .insert(CURSOR_ROW, bytes.as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), "Opened store");

        Ok(Self { db: Arc::new(db), table_lock: Arc::new(TableLock::new()) })
    }

    /// The allocator/matcher lock.
    pub fn table_lock(&self) -> &TableLock {
        &self.table_lock
    }

    /// Delete the cursor row.
    ///
    /// Fault injection: every later pass must fail with an invariant
    /// violation.
    pub fn remove_cursor_row(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(CURSOR).map_err(|e| StoreError::Io(e.to_string()))?;
            table.remove(CURSOR_ROW).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(())
    }
}

impl MatchStore for RedbStore {
    type Pass<'a>
        = RedbPass<'a>
    where
        Self: 'a;

    fn begin_pass(&self) -> Result<RedbPass<'_>, StoreError> {
        RedbPass::begin(Arc::clone(&self.db), self.table_lock.share())
    }

    fn append_block(&self, ciphertext: &[u8], encrypted: bool) -> Result<BlockId, StoreError> {
        let _allocator = self.table_lock.exclusive();
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;

        let id = {
            let mut blocks = txn.open_table(BLOCKS).map_err(|e| StoreError::Io(e.to_string()))?;
            let mut meta =
                txn.open_table(BLOCK_META).map_err(|e| StoreError::Io(e.to_string()))?;

            let id = next_id(&blocks)?;
            blocks.insert(id, ciphertext).map_err(|e| StoreError::Io(e.to_string()))?;

            let bytes = encode_cbor(&StoredBlockMeta { encrypted, matched: None })?;
            meta.insert(id, bytes.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;

            if encrypted {
                let mut unmatched =
                    txn.open_table(UNMATCHED).map_err(|e| StoreError::Io(e.to_string()))?;
                unmatched.insert(id, ()).map_err(|e| StoreError::Io(e.to_string()))?;
            }

            id
        };

        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(BlockId(id))
    }

    fn append_keys(&self, keys: &[KeyMaterial]) -> Result<Vec<KeyId>, StoreError> {
        let _allocator = self.table_lock.exclusive();
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;

        let ids = {
            let mut table = txn.open_table(KEYS).map_err(|e| StoreError::Io(e.to_string()))?;
            let mut index =
                txn.open_table(KEY_INDEX).map_err(|e| StoreError::Io(e.to_string()))?;

            let mut next = next_id(&table)?;
            let mut ids = Vec::with_capacity(keys.len());

            for material in keys {
                let bytes = material.to_bytes();

                let existing = index
                    .get(bytes.as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?
                    .map(|id| id.value());

                if let Some(id) = existing {
                    ids.push(KeyId(id));
                    continue;
                }

                table.insert(next, bytes.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
                index.insert(bytes.as_slice(), next).map_err(|e| StoreError::Io(e.to_string()))?;
                ids.push(KeyId(next));
                next += 1;
            }

            ids
        };

        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(ids)
    }

    fn load_block(&self, id: BlockId) -> Result<Option<Block>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let blocks = txn.open_table(BLOCKS).map_err(|e| StoreError::Io(e.to_string()))?;
        let meta = txn.open_table(BLOCK_META).map_err(|e| StoreError::Io(e.to_string()))?;

        let Some(ciphertext) = blocks.get(id.0).map_err(|e| StoreError::Io(e.to_string()))? else {
            return Ok(None);
        };

        let stored = meta
            .get(id.0)
            .map_err(|e| StoreError::Io(e.to_string()))?
            .ok_or_else(|| StoreError::Invariant(format!("block {id} has no metadata")))?;
        let stored: StoredBlockMeta = decode_cbor(stored.value())?;

        Ok(Some(Block {
            id,
            ciphertext: Bytes::copy_from_slice(ciphertext.value()),
            encrypted: stored.encrypted,
            matched: stored.matched,
        }))
    }

    fn load_cursor(&self) -> Result<ProgressCursor, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(CURSOR).map_err(|e| StoreError::Io(e.to_string()))?;

        match table.get(CURSOR_ROW).map_err(|e| StoreError::Io(e.to_string()))? {
            Some(value) => decode_cbor(value.value()),
            None => Err(StoreError::Invariant("cursor row missing".to_string())),
        }
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let meta = txn.open_table(BLOCK_META).map_err(|e| StoreError::Io(e.to_string()))?;
        let keys = txn.open_table(KEYS).map_err(|e| StoreError::Io(e.to_string()))?;

        let mut stats = StoreStats {
            keys: keys.len().map_err(|e| StoreError::Io(e.to_string()))?,
            ..StoreStats::default()
        };

        for result in meta.iter().map_err(|e| StoreError::Io(e.to_string()))? {
            let (_, value) = result.map_err(|e| StoreError::Io(e.to_string()))?;
            let stored: StoredBlockMeta = decode_cbor(value.value())?;

            stats.blocks += 1;
            if stored.encrypted {
                stats.encrypted += 1;
            }
            if stored.matched.is_some() {
                stats.matched += 1;
            }
        }

        Ok(stats)
    }
}

/// Redb database file opened per operation.
///
/// Each pass opens the file, holds it until the pass commits or aborts, and
/// closes it. Appends and reads do the same. Between operations the file is
/// free, so a separate ingestion process can open it with [`RedbStore`] and
/// append. Redb's file lock then orders passes against appends across
/// processes the way the [`TableLock`] does within one.
///
/// Operations that find the file open elsewhere fail with
/// `StoreError::Lock`, which is transient: a scheduled pass retries on the
/// next tick.
#[derive(Clone)]
pub struct RedbFile {
    path: Arc<PathBuf>,
    table_lock: Arc<TableLock>,
}

impl RedbFile {
    /// Handle for the database at `path`. Nothing is opened until the first
    /// operation, which creates the database if it is missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: Arc::new(path.into()), table_lock: Arc::new(TableLock::new()) }
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<RedbStore, StoreError> {
        RedbStore::open(self.path.as_path())
    }
}

impl MatchStore for RedbFile {
    type Pass<'a>
        = RedbPass<'a>
    where
        Self: 'a;

    fn begin_pass(&self) -> Result<RedbPass<'_>, StoreError> {
        let share = self.table_lock.share();
        let store = self.open()?;
        RedbPass::begin(store.db, share)
    }

    fn append_block(&self, ciphertext: &[u8], encrypted: bool) -> Result<BlockId, StoreError> {
        let _allocator = self.table_lock.exclusive();
        self.open()?.append_block(ciphertext, encrypted)
    }

    fn append_keys(&self, keys: &[KeyMaterial]) -> Result<Vec<KeyId>, StoreError> {
        let _allocator = self.table_lock.exclusive();
        self.open()?.append_keys(keys)
    }

    fn load_block(&self, id: BlockId) -> Result<Option<Block>, StoreError> {
        self.open()?.load_block(id)
    }

    fn load_cursor(&self) -> Result<ProgressCursor, StoreError> {
        self.open()?.load_cursor()
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        self.open()?.stats()
    }
}

/// One matching pass: a Redb write transaction under the matcher role.
///
/// Keeps its database open until dropped. Dropping it without
/// [`PassTransaction::commit`] aborts the transaction.
pub struct RedbPass<'a> {
    txn: WriteTransaction,
    _db: Arc<Database>,
    _share: ShareGuard<'a>,
}

impl<'a> RedbPass<'a> {
    fn begin(db: Arc<Database>, share: ShareGuard<'a>) -> Result<Self, StoreError> {
        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { txn, _db: db, _share: share })
    }

    fn read_cursor(&self) -> Result<ProgressCursor, StoreError> {
        let table = self.txn.open_table(CURSOR).map_err(|e| StoreError::Io(e.to_string()))?;

        match table.get(CURSOR_ROW).map_err(|e| StoreError::Io(e.to_string()))? {
            Some(value) => decode_cbor(value.value()),
            None => Err(StoreError::Invariant("cursor row missing".to_string())),
        }
    }

    /// Unmatched block ids in `[start, through]`, at most `limit`, with their
    /// ciphertext.
    fn unmatched_range(
        &self,
        start: u64,
        through: Option<u64>,
        limit: usize,
    ) -> Result<Vec<PendingBlock>, StoreError> {
        let unmatched =
            self.txn.open_table(UNMATCHED).map_err(|e| StoreError::Io(e.to_string()))?;
        let blocks = self.txn.open_table(BLOCKS).map_err(|e| StoreError::Io(e.to_string()))?;

        let range = match through {
            Some(through) if through < start => return Ok(Vec::new()),
            Some(through) => unmatched.range(start..=through),
            None => unmatched.range(start..),
        }
        .map_err(|e| StoreError::Io(e.to_string()))?;

        let mut page = Vec::with_capacity(limit.min(1024));
        for result in range.take(limit) {
            let (id, _) = result.map_err(|e| StoreError::Io(e.to_string()))?;
            let id = id.value();

            let ciphertext = blocks
                .get(id)
                .map_err(|e| StoreError::Io(e.to_string()))?
                .ok_or_else(|| StoreError::Invariant(format!("unmatched block {id} has no row")))?;

            page.push(PendingBlock {
                id: BlockId(id),
                ciphertext: Bytes::copy_from_slice(ciphertext.value()),
            });
        }

        Ok(page)
    }
}

impl PassTransaction for RedbPass<'_> {
    fn read_cursor_for_update(&mut self) -> Result<ProgressCursor, StoreError> {
        // The write transaction is exclusive, so the row is already locked
        self.read_cursor()
    }

    fn unmatched_blocks_after(
        &self,
        after: Option<BlockId>,
        limit: usize,
    ) -> Result<Vec<PendingBlock>, StoreError> {
        match start_after(after.map(|id| id.0)) {
            Some(start) => self.unmatched_range(start, None, limit),
            None => Ok(Vec::new()),
        }
    }

    fn unmatched_blocks_through(
        &self,
        through: BlockId,
        after: Option<BlockId>,
        limit: usize,
    ) -> Result<Vec<PendingBlock>, StoreError> {
        match start_after(after.map(|id| id.0)) {
            Some(start) => self.unmatched_range(start, Some(through.0), limit),
            None => Ok(Vec::new()),
        }
    }

    fn keys_after(&self, after: Option<KeyId>, limit: usize) -> Result<Vec<Key>, StoreError> {
        let Some(start) = start_after(after.map(|id| id.0)) else {
            return Ok(Vec::new());
        };

        let table = self.txn.open_table(KEYS).map_err(|e| StoreError::Io(e.to_string()))?;

        let mut page = Vec::with_capacity(limit.min(1024));
        for result in table.range(start..).map_err(|e| StoreError::Io(e.to_string()))?.take(limit)
        {
            let (id, value) = result.map_err(|e| StoreError::Io(e.to_string()))?;
            let material = KeyMaterial::from_bytes(value.value())
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            page.push(Key { id: KeyId(id.value()), material });
        }

        Ok(page)
    }

    fn apply_matches(&mut self, matches: &[BlockMatch]) -> Result<(), StoreError> {
        let mut meta =
            self.txn.open_table(BLOCK_META).map_err(|e| StoreError::Io(e.to_string()))?;
        let mut unmatched =
            self.txn.open_table(UNMATCHED).map_err(|e| StoreError::Io(e.to_string()))?;
        let keys = self.txn.open_table(KEYS).map_err(|e| StoreError::Io(e.to_string()))?;

        // Validate the whole batch before writing any of it
        let mut staged = Vec::with_capacity(matches.len());
        let mut seen = HashSet::with_capacity(matches.len());
        for found in matches {
            let id = found.block_id;

            let stored = meta
                .get(id.0)
                .map_err(|e| StoreError::Io(e.to_string()))?
                .ok_or(StoreError::NotFound(id))?;
            let mut stored: StoredBlockMeta = decode_cbor(stored.value())?;

            if !stored.encrypted {
                return Err(StoreError::Invariant(format!("block {id} is not encrypted")));
            }
            if stored.matched.is_some() || !seen.insert(id) {
                return Err(StoreError::Invariant(format!("block {id} is already matched")));
            }
            if keys.get(found.key_id.0).map_err(|e| StoreError::Io(e.to_string()))?.is_none() {
                return Err(StoreError::Invariant(format!(
                    "block {id} matched unknown key {}",
                    found.key_id
                )));
            }

            stored.matched = Some(found.key_match());
            staged.push((id, encode_cbor(&stored)?));
        }

        for (id, bytes) in staged {
            meta.insert(id.0, bytes.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
            unmatched.remove(id.0).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        Ok(())
    }

    fn write_cursor(&mut self, update: CursorUpdate) -> Result<(), StoreError> {
        let next = self.read_cursor()?.apply(update)?;
        let bytes = encode_cbor(&next)?;

        let mut table = self.txn.open_table(CURSOR).map_err(|e| StoreError::Io(e.to_string()))?;
        table.insert(CURSOR_ROW, bytes.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(())
    }

    fn commit(self) -> Result<(), StoreError> {
        self.txn.commit().map_err(|e| StoreError::Io(e.to_string()))
    }
}

/// Next id to allocate: one past the largest key, or 1 for an empty table.
fn next_id<T: ReadableTable<u64, &'static [u8]>>(table: &T) -> Result<u64, StoreError> {
    let last = table.last().map_err(|e| StoreError::Io(e.to_string()))?.map(|(id, _)| id.value());

    match last {
        None => Ok(1),
        Some(id) => id
            .checked_add(1)
            .ok_or_else(|| StoreError::Invariant("id space exhausted".to_string())),
    }
}

/// First id strictly after `after`. `None` if nothing can follow it.
fn start_after(after: Option<u64>) -> Option<u64> {
    match after {
        None => Some(0),
        Some(id) => id.checked_add(1),
    }
}

fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode_cbor<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}
