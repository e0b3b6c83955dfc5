#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    ops::Bound,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use keysweep_crypto::KeyMaterial;

use super::{MatchStore, PassTransaction, StoreError};
use crate::{
    lock::{ShareGuard, TableLock},
    types::{
        Block, BlockId, BlockMatch, CursorUpdate, Key, KeyId, PendingBlock, ProgressCursor,
        StoreStats,
    },
};

/// In-memory store for testing and simulation
///
/// Blocks and keys live in `BTreeMap`s so range scans come out in id order.
/// A pass stages its matches and cursor writes in the [`MemoryPass`] and only
/// touches the shared tables on commit, which gives the same all-or-nothing
/// behaviour as a database transaction. Clones share the same tables.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Shared>,
}

struct Shared {
    /// Allocator/matcher lock
    table_lock: TableLock,

    /// Row lock on the cursor, held by a pass from its first cursor access
    cursor_lock: Mutex<()>,

    tables: Mutex<Tables>,
}

struct Tables {
    blocks: BTreeMap<BlockId, Block>,
    keys: BTreeMap<KeyId, KeyMaterial>,

    /// Material -> id, for import de-duplication
    key_index: HashMap<KeyMaterial, KeyId>,

    /// The singleton cursor row. `None` only if it was removed.
    cursor: Option<ProgressCursor>,
}

impl Shared {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Lock("tables mutex poisoned".to_string()))
    }
}

impl MemoryStore {
    /// Create an empty store with a fresh `(None, None)` cursor row.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                table_lock: TableLock::new(),
                cursor_lock: Mutex::new(()),
                tables: Mutex::new(Tables {
                    blocks: BTreeMap::new(),
                    keys: BTreeMap::new(),
                    key_index: HashMap::new(),
                    cursor: Some(ProgressCursor::default()),
                }),
            }),
        }
    }

    /// The allocator/matcher lock, for observing exclusion in tests.
    pub fn table_lock(&self) -> &TableLock {
        &self.inner.table_lock
    }

    /// Delete the cursor row.
    ///
    /// Fault injection: every later pass must fail with an invariant
    /// violation.
    pub fn remove_cursor_row(&self) -> Result<(), StoreError> {
        self.inner.tables()?.cursor = None;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchStore for MemoryStore {
    type Pass<'a>
        = MemoryPass<'a>
    where
        Self: 'a;

    fn begin_pass(&self) -> Result<MemoryPass<'_>, StoreError> {
        let share = self.inner.table_lock.share();

        Ok(MemoryPass {
            shared: &self.inner,
            _share: share,
            cursor_row: None,
            staged_matches: BTreeMap::new(),
            staged_cursor: None,
        })
    }

    fn append_block(&self, ciphertext: &[u8], encrypted: bool) -> Result<BlockId, StoreError> {
        let _allocator = self.inner.table_lock.exclusive();
        let mut tables = self.inner.tables()?;

        let id = BlockId(tables.blocks.last_key_value().map_or(1, |(id, _)| id.0 + 1));
        tables.blocks.insert(
            id,
            Block { id, ciphertext: Bytes::copy_from_slice(ciphertext), encrypted, matched: None },
        );

        Ok(id)
    }

    fn append_keys(&self, keys: &[KeyMaterial]) -> Result<Vec<KeyId>, StoreError> {
        let _allocator = self.inner.table_lock.exclusive();
        let mut tables = self.inner.tables()?;

        let mut ids = Vec::with_capacity(keys.len());
        for material in keys {
            if let Some(&existing) = tables.key_index.get(material) {
                ids.push(existing);
                continue;
            }

            let id = KeyId(tables.keys.last_key_value().map_or(1, |(id, _)| id.0 + 1));
            tables.keys.insert(id, *material);
            tables.key_index.insert(*material, id);
            ids.push(id);
        }

        Ok(ids)
    }

    fn load_block(&self, id: BlockId) -> Result<Option<Block>, StoreError> {
        Ok(self.inner.tables()?.blocks.get(&id).cloned())
    }

    fn load_cursor(&self) -> Result<ProgressCursor, StoreError> {
        self.inner.tables()?.cursor.ok_or_else(missing_cursor_row)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let tables = self.inner.tables()?;

        let mut stats = StoreStats { keys: tables.keys.len() as u64, ..StoreStats::default() };
        for block in tables.blocks.values() {
            stats.blocks += 1;
            if block.encrypted {
                stats.encrypted += 1;
            }
            if block.matched.is_some() {
                stats.matched += 1;
            }
        }

        Ok(stats)
    }
}

/// Pass transaction over a [`MemoryStore`].
///
/// Holds the matcher role from creation and the cursor row lock from the
/// first cursor access, both until dropped.
pub struct MemoryPass<'a> {
    shared: &'a Shared,
    _share: ShareGuard<'a>,
    cursor_row: Option<MutexGuard<'a, ()>>,
    staged_matches: BTreeMap<BlockId, BlockMatch>,
    staged_cursor: Option<ProgressCursor>,
}

impl MemoryPass<'_> {
    fn lock_cursor_row(&mut self) {
        if self.cursor_row.is_none() {
            // Guards `()`: a panicking holder rolled its pass back already.
            self.cursor_row =
                Some(self.shared.cursor_lock.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    fn current_cursor(&self) -> Result<ProgressCursor, StoreError> {
        match self.staged_cursor {
            Some(cursor) => Ok(cursor),
            None => self.shared.tables()?.cursor.ok_or_else(missing_cursor_row),
        }
    }

    fn scan_unmatched(
        &self,
        lower: Bound<BlockId>,
        upper: Bound<BlockId>,
        limit: usize,
    ) -> Result<Vec<PendingBlock>, StoreError> {
        if let (Bound::Excluded(lo), Bound::Included(hi)) = (lower, upper) {
            if lo >= hi {
                return Ok(Vec::new());
            }
        }

        let tables = self.shared.tables()?;
        Ok(tables
            .blocks
            .range((lower, upper))
            .filter(|(id, block)| {
                block.encrypted
                    && block.matched.is_none()
                    && !self.staged_matches.contains_key(id)
            })
            .take(limit)
            .map(|(&id, block)| PendingBlock { id, ciphertext: block.ciphertext.clone() })
            .collect())
    }
}

impl PassTransaction for MemoryPass<'_> {
    fn read_cursor_for_update(&mut self) -> Result<ProgressCursor, StoreError> {
        self.lock_cursor_row();
        self.current_cursor()
    }

    fn unmatched_blocks_after(
        &self,
        after: Option<BlockId>,
        limit: usize,
    ) -> Result<Vec<PendingBlock>, StoreError> {
        self.scan_unmatched(lower_bound(after), Bound::Unbounded, limit)
    }

    fn unmatched_blocks_through(
        &self,
        through: BlockId,
        after: Option<BlockId>,
        limit: usize,
    ) -> Result<Vec<PendingBlock>, StoreError> {
        self.scan_unmatched(lower_bound(after), Bound::Included(through), limit)
    }

    fn keys_after(&self, after: Option<KeyId>, limit: usize) -> Result<Vec<Key>, StoreError> {
        let tables = self.shared.tables()?;
        Ok(tables
            .keys
            .range((lower_bound(after), Bound::Unbounded))
            .take(limit)
            .map(|(&id, &material)| Key { id, material })
            .collect())
    }

    fn apply_matches(&mut self, matches: &[BlockMatch]) -> Result<(), StoreError> {
        {
            let tables = self.shared.tables()?;
            let mut batch = HashSet::with_capacity(matches.len());

            for m in matches {
                let block = tables.blocks.get(&m.block_id).ok_or(StoreError::NotFound(m.block_id))?;

                if !block.encrypted {
                    return Err(StoreError::Invariant(format!(
                        "block {} is not encrypted",
                        m.block_id
                    )));
                }

                if block.matched.is_some()
                    || self.staged_matches.contains_key(&m.block_id)
                    || !batch.insert(m.block_id)
                {
                    return Err(StoreError::Invariant(format!(
                        "block {} already matched",
                        m.block_id
                    )));
                }

                if !tables.keys.contains_key(&m.key_id) {
                    return Err(StoreError::Invariant(format!(
                        "block {} matched by unknown key {}",
                        m.block_id, m.key_id
                    )));
                }
            }
        }

        for m in matches {
            self.staged_matches.insert(m.block_id, *m);
        }

        Ok(())
    }

    fn write_cursor(&mut self, update: CursorUpdate) -> Result<(), StoreError> {
        self.lock_cursor_row();
        let next = self.current_cursor()?.apply(update)?;
        self.staged_cursor = Some(next);
        Ok(())
    }

    fn commit(self) -> Result<(), StoreError> {
        let mut tables = self.shared.tables()?;

        // Validate everything before mutating so a failed commit leaves the
        // tables untouched.
        for id in self.staged_matches.keys() {
            match tables.blocks.get(id) {
                Some(block) if block.matched.is_none() => {},
                Some(_) => {
                    return Err(StoreError::Invariant(format!("block {id} already matched")));
                },
                None => return Err(StoreError::NotFound(*id)),
            }
        }

        if self.staged_cursor.is_some() && tables.cursor.is_none() {
            return Err(missing_cursor_row());
        }

        for (id, m) in &self.staged_matches {
            if let Some(block) = tables.blocks.get_mut(id) {
                block.matched = Some(m.key_match());
            }
        }

        if let Some(cursor) = self.staged_cursor {
            tables.cursor = Some(cursor);
        }

        Ok(())
    }
}

fn lower_bound<I>(after: Option<I>) -> Bound<I> {
    after.map_or(Bound::Unbounded, Bound::Excluded)
}

fn missing_cursor_row() -> StoreError {
    StoreError::Invariant("cursor row missing".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> KeyMaterial {
        KeyMaterial::from_words([n, 0, 0, 0])
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let store = MemoryStore::new();

        assert_eq!(store.append_block(b"a", true).unwrap(), BlockId(1));
        assert_eq!(store.append_block(b"b", false).unwrap(), BlockId(2));
        assert_eq!(store.append_keys(&[key(1), key(2)]).unwrap(), vec![KeyId(1), KeyId(2)]);
    }

    #[test]
    fn test_duplicate_key_material_reuses_id() {
        let store = MemoryStore::new();

        store.append_keys(&[key(1), key(2)]).unwrap();
        let ids = store.append_keys(&[key(2), key(3), key(3)]).unwrap();

        assert_eq!(ids, vec![KeyId(2), KeyId(3), KeyId(3)]);
        assert_eq!(store.stats().unwrap().keys, 3);
    }

    #[test]
    fn test_unmatched_scan_skips_plain_and_respects_bounds() {
        let store = MemoryStore::new();
        for i in 1..=6u8 {
            store.append_block(&[i], i != 3).unwrap();
        }

        let pass = store.begin_pass().unwrap();

        let after: Vec<u64> =
            pass.unmatched_blocks_after(Some(BlockId(1)), 10).unwrap().iter().map(|b| b.id.0).collect();
        assert_eq!(after, vec![2, 4, 5, 6]);

        let through: Vec<u64> = pass
            .unmatched_blocks_through(BlockId(5), None, 10)
            .unwrap()
            .iter()
            .map(|b| b.id.0)
            .collect();
        assert_eq!(through, vec![1, 2, 4, 5]);

        let limited = pass.unmatched_blocks_after(None, 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_empty_through_range_does_not_panic() {
        let store = MemoryStore::new();
        store.append_block(b"a", true).unwrap();

        let pass = store.begin_pass().unwrap();
        assert!(pass.unmatched_blocks_through(BlockId(1), Some(BlockId(1)), 10).unwrap().is_empty());
        assert!(pass.unmatched_blocks_through(BlockId(1), Some(BlockId(4)), 10).unwrap().is_empty());
        assert!(pass.unmatched_blocks_through(BlockId(0), None, 10).unwrap().is_empty());
        assert_eq!(pass.unmatched_blocks_through(BlockId(1), None, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_staged_matches_are_visible_in_pass_and_hidden_outside() {
        let store = MemoryStore::new();
        let block = store.append_block(b"a", true).unwrap();
        let key_id = store.append_keys(&[key(1)]).unwrap()[0];

        let mut pass = store.begin_pass().unwrap();
        pass.apply_matches(&[BlockMatch { block_id: block, key_id, length: 1, checksum: 2 }])
            .unwrap();

        assert!(pass.unmatched_blocks_after(None, 10).unwrap().is_empty());
        assert_eq!(store.load_block(block).unwrap().unwrap().matched, None);

        pass.commit().unwrap();

        let matched = store.load_block(block).unwrap().unwrap().matched.unwrap();
        assert_eq!(matched.key_id, key_id);
        assert_eq!(matched.decoded_length, 1);
        assert_eq!(matched.decoded_checksum, 2);
    }

    #[test]
    fn test_dropped_pass_rolls_back() {
        let store = MemoryStore::new();
        let block = store.append_block(b"a", true).unwrap();
        let key_id = store.append_keys(&[key(1)]).unwrap()[0];

        {
            let mut pass = store.begin_pass().unwrap();
            pass.apply_matches(&[BlockMatch { block_id: block, key_id, length: 1, checksum: 2 }])
                .unwrap();
            pass.write_cursor(CursorUpdate::Blocks(Some(block))).unwrap();
        }

        assert_eq!(store.load_block(block).unwrap().unwrap().matched, None);
        assert_eq!(store.load_cursor().unwrap(), ProgressCursor::default());
    }

    #[test]
    fn test_rematching_a_block_is_an_invariant_violation() {
        let store = MemoryStore::new();
        let block = store.append_block(b"a", true).unwrap();
        let ids = store.append_keys(&[key(1), key(2)]).unwrap();

        let mut pass = store.begin_pass().unwrap();
        pass.apply_matches(&[BlockMatch { block_id: block, key_id: ids[0], length: 0, checksum: 0 }])
            .unwrap();

        let err = pass
            .apply_matches(&[BlockMatch { block_id: block, key_id: ids[1], length: 0, checksum: 0 }])
            .unwrap_err();
        assert!(matches!(err, StoreError::Invariant(_)));
    }

    #[test]
    fn test_duplicate_block_within_batch_is_rejected_atomically() {
        let store = MemoryStore::new();
        let a = store.append_block(b"a", true).unwrap();
        let ids = store.append_keys(&[key(1), key(2)]).unwrap();

        let mut pass = store.begin_pass().unwrap();
        let err = pass
            .apply_matches(&[
                BlockMatch { block_id: a, key_id: ids[0], length: 0, checksum: 0 },
                BlockMatch { block_id: a, key_id: ids[1], length: 0, checksum: 0 },
            ])
            .unwrap_err();

        assert!(matches!(err, StoreError::Invariant(_)));
        assert_eq!(pass.unmatched_blocks_after(None, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_matching_unknown_block_is_not_found() {
        let store = MemoryStore::new();
        let key_id = store.append_keys(&[key(1)]).unwrap()[0];

        let mut pass = store.begin_pass().unwrap();
        let err = pass
            .apply_matches(&[BlockMatch { block_id: BlockId(9), key_id, length: 0, checksum: 0 }])
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound(BlockId(9)));
    }

    #[test]
    fn test_missing_cursor_row_is_an_invariant_violation() {
        let store = MemoryStore::new();
        store.remove_cursor_row().unwrap();

        let mut pass = store.begin_pass().unwrap();
        assert!(matches!(pass.read_cursor_for_update(), Err(StoreError::Invariant(_))));
        assert!(matches!(store.load_cursor(), Err(StoreError::Invariant(_))));
    }

    #[test]
    fn test_open_pass_excludes_allocator() {
        let store = MemoryStore::new();
        let pass = store.begin_pass().unwrap();

        assert!(store.table_lock().try_exclusive().is_none());

        drop(pass);
        assert!(store.table_lock().try_exclusive().is_some());
    }

    #[test]
    fn test_stats_count_blocks_and_keys() {
        let store = MemoryStore::new();
        let a = store.append_block(b"a", true).unwrap();
        store.append_block(b"b", true).unwrap();
        store.append_block(b"c", false).unwrap();
        let key_id = store.append_keys(&[key(1)]).unwrap()[0];

        let mut pass = store.begin_pass().unwrap();
        pass.apply_matches(&[BlockMatch { block_id: a, key_id, length: 0, checksum: 0 }]).unwrap();
        pass.commit().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats, StoreStats { blocks: 3, encrypted: 2, matched: 1, keys: 1 });
        assert_eq!(stats.unmatched(), 1);
    }
}
