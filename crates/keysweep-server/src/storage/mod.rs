//! Durable store implementations.
//!
//! The store traits and the in-memory and chaotic stores live in
//! [`keysweep_core::storage`]; this module adds the Redb-backed stores the
//! binary runs against.

mod redb;

pub use keysweep_core::storage::{
    ChaoticStore, MatchStore, MemoryStore, PassTransaction, StoreError,
};

pub use self::redb::{RedbFile, RedbPass, RedbStore};
