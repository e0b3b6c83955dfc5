//! Allocator/matcher table lock.
//!
//! Ingestion allocates block and key ids and must never interleave with a
//! pass, otherwise a pass could observe an id allocated below one it has
//! already swept. Passes only read ids, so any number of them may hold the
//! lock together. This is a plain reader/writer lock with the two roles
//! named:
//!
//! | Role      | Mode      | Excludes          |
//! |-----------|-----------|-------------------|
//! | allocator | exclusive | passes, allocator |
//! | matcher   | shared    | allocator         |
//!
//! Passes are serialized against each other separately, by the cursor row
//! lock each store holds for the lifetime of a pass transaction.

#![allow(clippy::disallowed_types, reason = "Guards protect no data, only ordering")]

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reader/writer lock over the block and key tables.
#[derive(Debug, Default)]
pub struct TableLock {
    inner: RwLock<()>,
}

/// Matcher role. Held for the whole pass.
#[derive(Debug)]
pub struct ShareGuard<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Allocator role. Held while new ids are inserted.
#[derive(Debug)]
pub struct ExclusiveGuard<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

impl TableLock {
    /// Create an unlocked table lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the matcher role, blocking while an allocator holds the lock.
    pub fn share(&self) -> ShareGuard<'_> {
        // The lock guards `()`, so a poisoned lock carries no torn state.
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        ShareGuard { _guard: guard }
    }

    /// Acquire the allocator role, blocking while any pass holds the lock.
    pub fn exclusive(&self) -> ExclusiveGuard<'_> {
        let guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        ExclusiveGuard { _guard: guard }
    }

    /// Acquire the allocator role only if no pass holds the lock.
    pub fn try_exclusive(&self) -> Option<ExclusiveGuard<'_>> {
        match self.inner.try_write() {
            Ok(guard) => Some(ExclusiveGuard { _guard: guard }),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                Some(ExclusiveGuard { _guard: poisoned.into_inner() })
            },
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }
}
