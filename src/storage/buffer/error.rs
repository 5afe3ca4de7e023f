use thiserror::Error;

use crate::common::types::TableId;
use crate::concurrency::error::LockError;
use crate::storage::heap::error::HeapFileError;
use crate::storage::page::PageError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("storage error: {0}")]
    Storage(#[from] HeapFileError),
    #[error("page error: {0}")]
    Page(#[from] PageError),
    /// No clean, unpinned page to evict. With the no-steal policy this is a
    /// hard failure; the caller can only abort transactions to free pages.
    #[error("buffer full: no evictable page among {0} resident pages")]
    NoEvictablePage(usize),
    #[error("no file registered for table {0}")]
    UnknownTable(TableId),
}

impl CacheError {
    /// True when this failure is a mandated transaction abort (the caller
    /// lost a deadlock and must roll back, then may retry).
    pub fn is_aborted(&self) -> bool {
        matches!(self, CacheError::Lock(LockError::Aborted(_)))
    }
}
