//! Keysweep matching core.
//!
//! Matches encrypted blocks against a growing pool of candidate keys without
//! ever re-testing a (block, key) pair. Blocks and keys are append-only and
//! carry ids allocated in arrival order; a persisted [`ProgressCursor`]
//! records how far each side has been swept.
//!
//! # Components
//!
//! - [`MatchingEngine`]: runs one two-phase pass per call, in one store
//!   transaction
//! - [`ValidationOracle`]: decides whether a key opens a block
//! - [`MatchStore`] / [`PassTransaction`]: persisted blocks, keys and cursor
//! - [`TableLock`]: allocator/matcher roles that keep ids from appearing
//!   mid-pass
//! - [`MemoryStore`], [`ChaoticStore`]: in-memory and fault-injecting stores
//!   for tests
//!
//! The core is synchronous and does no I/O of its own. The server crate
//! supplies the durable store and drives passes on a schedule.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
mod error;
mod lock;
pub mod oracle;
mod pager;
pub mod storage;
pub mod types;

pub use engine::{EngineConfig, MatchingEngine, PassReport};
pub use error::EngineError;
pub use lock::{ExclusiveGuard, ShareGuard, TableLock};
pub use oracle::{AeadOracle, Validated, ValidationOracle};
pub use pager::{DEFAULT_PAGE_SIZE, Pager};
pub use storage::{
    ChaoticPass, ChaoticStore, MatchStore, MemoryPass, MemoryStore, PassTransaction, StoreError,
};
pub use types::{
    Block, BlockId, BlockMatch, CursorUpdate, Key, KeyId, KeyMatch, Keyed, PendingBlock,
    ProgressCursor, StoreStats,
};
