//! Data model: blocks, keys, matches and the progress cursor.

use std::fmt;

use bytes::Bytes;
use keysweep_crypto::KeyMaterial;
use serde::{Deserialize, Serialize};

use crate::storage::StoreError;

/// Identifier of a block. Allocated strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u64);

/// Identifier of a key. Allocated strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Entities paged by ascending id.
pub trait Keyed {
    /// Id type, ordered by allocation.
    type Id: Copy + Ord + fmt::Debug;

    /// This entity's id.
    fn id(&self) -> Self::Id;
}

/// The matched fields of a block.
///
/// Set exactly once, by the matching engine, when the oracle validates a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMatch {
    /// Key that validated the block
    pub key_id: KeyId,
    /// Length of the decoded contents
    pub decoded_length: u32,
    /// CRC-32 of the decoded contents
    pub decoded_checksum: u32,
}

/// A stored ciphertext container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block id
    pub id: BlockId,
    /// Ciphertext bytes
    pub ciphertext: Bytes,
    /// Only encrypted blocks take part in matching
    pub encrypted: bool,
    /// `Some` once a key has been found
    pub matched: Option<KeyMatch>,
}

/// Unmatched encrypted block as streamed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBlock {
    /// Block id
    pub id: BlockId,
    /// Ciphertext bytes
    pub ciphertext: Bytes,
}

impl Keyed for PendingBlock {
    type Id = BlockId;

    fn id(&self) -> BlockId {
        self.id
    }
}

/// A candidate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    /// Key id
    pub id: KeyId,
    /// 128-bit key material
    pub material: KeyMaterial,
}

impl Keyed for Key {
    type Id = KeyId;

    fn id(&self) -> KeyId {
        self.id
    }
}

/// A validated (block, key) pair waiting to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMatch {
    /// Block that was opened
    pub block_id: BlockId,
    /// Key that opened it
    pub key_id: KeyId,
    /// Length of the decoded contents
    pub length: u32,
    /// CRC-32 of the decoded contents
    pub checksum: u32,
}

impl BlockMatch {
    /// The fields persisted on the block.
    pub fn key_match(&self) -> KeyMatch {
        KeyMatch { key_id: self.key_id, decoded_length: self.length, decoded_checksum: self.checksum }
    }
}

/// Persisted watermarks of the last completed sweeps.
///
/// `None` means no block (or key) has completed a sweep yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCursor {
    /// Highest block id swept against the full key set
    pub last_block_id: Option<BlockId>,
    /// Highest key id swept against every block older than its pass
    pub last_key_id: Option<KeyId>,
}

/// Update of one watermark in the cursor row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorUpdate {
    /// Set `last_block_id` only
    Blocks(Option<BlockId>),
    /// Set `last_key_id` only
    Keys(Option<KeyId>),
}

impl ProgressCursor {
    /// Cursor with both watermarks set.
    pub fn new(last_block_id: Option<BlockId>, last_key_id: Option<KeyId>) -> Self {
        Self { last_block_id, last_key_id }
    }

    /// Apply `update`, rejecting any watermark that would move backwards.
    ///
    /// # Errors
    ///
    /// - `Invariant`: a watermark decreases or is cleared once set
    pub fn apply(self, update: CursorUpdate) -> Result<Self, StoreError> {
        let next = match update {
            CursorUpdate::Blocks(last_block_id) => Self { last_block_id, ..self },
            CursorUpdate::Keys(last_key_id) => Self { last_key_id, ..self },
        };

        if next.last_block_id < self.last_block_id {
            return Err(StoreError::Invariant(format!(
                "last_block_id would move backwards: {:?} -> {:?}",
                self.last_block_id, next.last_block_id
            )));
        }

        if next.last_key_id < self.last_key_id {
            return Err(StoreError::Invariant(format!(
                "last_key_id would move backwards: {:?} -> {:?}",
                self.last_key_id, next.last_key_id
            )));
        }

        Ok(next)
    }
}

/// Row counts for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// All blocks
    pub blocks: u64,
    /// Blocks flagged as encrypted
    pub encrypted: u64,
    /// Encrypted blocks with a key found
    pub matched: u64,
    /// Distinct keys
    pub keys: u64,
}

impl StoreStats {
    /// Encrypted blocks still waiting for a key.
    pub fn unmatched(&self) -> u64 {
        self.encrypted.saturating_sub(self.matched)
    }
}
