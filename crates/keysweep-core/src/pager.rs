//! Lazy ascending streams over paged store reads.
//!
//! A [`Pager`] remembers the last id it has handed out and pulls the next
//! fixed-size page from the store only when its buffer runs dry. Memory is
//! bounded by one page no matter how large the table is.
//!
//! The fetch function is passed to every [`Pager::next`] call rather than
//! captured, so the caller can mutate the transaction between items.

use std::collections::VecDeque;

use crate::{storage::StoreError, types::Keyed};

/// Default rows per page.
pub const DEFAULT_PAGE_SIZE: usize = 1024;

/// Ascending stream of `T`, starting strictly after a given id.
#[derive(Debug)]
pub struct Pager<T: Keyed> {
    after: Option<T::Id>,
    page_size: usize,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<T: Keyed> Pager<T> {
    /// Stream items with id strictly greater than `after` (`None` = from the
    /// start).
    pub fn new(after: Option<T::Id>, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self { after, page_size, buffer: VecDeque::with_capacity(page_size), exhausted: false }
    }

    /// Next item, fetching a page with `fetch(after, limit)` if needed.
    ///
    /// # Errors
    ///
    /// - Whatever `fetch` returns
    /// - `Invariant`: the page is not strictly ascending past the last id
    pub fn next<F>(&mut self, fetch: F) -> Result<Option<T>, StoreError>
    where
        F: FnOnce(Option<T::Id>, usize) -> Result<Vec<T>, StoreError>,
    {
        if self.buffer.is_empty() && !self.exhausted {
            let page = fetch(self.after, self.page_size)?;
            if page.len() < self.page_size {
                self.exhausted = true;
            }

            for item in page {
                let id = item.id();
                if self.after.is_some_and(|after| id <= after) {
                    return Err(StoreError::Invariant(format!(
                        "page out of order: {id:?} after {:?}",
                        self.after
                    )));
                }
                self.after = Some(id);
                self.buffer.push_back(item);
            }
        }

        Ok(self.buffer.pop_front())
    }
}
