use crate::common::types::{PageId, TableId, TransactionId};
use crate::storage::buffer::{CacheError, PageCache};
use crate::storage::heap::error::HeapFileError;
use crate::storage::page::HeapPage;
use crate::storage::tuple::{Tuple, TupleDesc};

/// Storage backend abstraction consumed by the page cache and by operators.
/// Page-accessing operations take the cache explicitly so that all page reads
/// go through it (and through the lock manager) rather than through ambient
/// state.
pub trait DbFile: Send + Sync {
    /// Stable identifier of the table this file backs.
    fn id(&self) -> TableId;

    /// Schema of the tuples stored in this file.
    fn tuple_desc(&self) -> &TupleDesc;

    /// Read one page directly from the backing store, bypassing the cache.
    fn read_page(&self, pid: PageId) -> Result<HeapPage, HeapFileError>;

    /// Write one page directly to the backing store.
    fn write_page(&self, page: &HeapPage) -> Result<(), HeapFileError>;

    /// Current page count of the backing store.
    fn num_pages(&self) -> Result<usize, HeapFileError>;

    /// Insert a tuple, stamping its record id, and return the pages mutated.
    fn insert_tuple(
        &self,
        cache: &PageCache,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageId>, CacheError>;

    /// Delete a tuple located by its record id and return the pages mutated.
    fn delete_tuple(
        &self,
        cache: &PageCache,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageId>, CacheError>;

    /// Lazy, restartable scan over all tuples of the file, fetching pages
    /// through the cache under read locks as it goes.
    fn scan<'a>(
        &'a self,
        cache: &'a PageCache,
        tid: TransactionId,
    ) -> Box<dyn TupleScan + 'a>;
}

/// Forward-only tuple cursor with explicit rewind.
pub trait TupleScan {
    /// The next tuple, or `None` once the scan is exhausted.
    fn next_tuple(&mut self) -> Result<Option<Tuple>, CacheError>;

    /// Restart the scan from the first page.
    fn rewind(&mut self);
}
