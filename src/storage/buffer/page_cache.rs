use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::config::EngineConfig;
use crate::common::types::{PageId, PagePtr, Permissions, TableId, TransactionId};
use crate::concurrency::{LockManager, LockMode};
use crate::storage::buffer::CacheError;
use crate::storage::dbfile::DbFile;
use crate::storage::heap::error::HeapFileError;
use crate::storage::tuple::Tuple;

/// Bounded page cache. Every page access passes through here: `get_page`
/// acquires the matching lock before touching the resident map, misses are
/// filled from the table's DbFile after evicting a clean, unpinned page if
/// the cache is at capacity, and commit/abort flush or discard the pages a
/// transaction dirtied before releasing its locks.
///
/// Eviction is no-steal: a dirty page is never forcibly written out to make
/// room. Transactions that dirty more pages than the cache holds fail with
/// `CacheError::NoEvictablePage`; that is the intended failure mode.
pub struct PageCache {
    page_size: usize,
    capacity: usize,
    lock_manager: Arc<LockManager>,
    pages: RwLock<HashMap<PageId, PagePtr>>,
    files: RwLock<HashMap<TableId, Arc<dyn DbFile>>>,
    /// Pages each transaction obtained read-write access to; the flush/discard
    /// set for commit/abort.
    dirty_pages: Mutex<HashMap<TransactionId, HashSet<PageId>>>,
    /// Fix counts owed per (transaction, page), debited when the transaction
    /// completes or releases a page early.
    pins: Mutex<HashMap<TransactionId, HashMap<PageId, u32>>>,
}

impl PageCache {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            page_size: config.page_size,
            capacity: config.cache_capacity,
            lock_manager: Arc::new(LockManager::new(config.detection_interval)),
            pages: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
            dirty_pages: Mutex::new(HashMap::new()),
            pins: Mutex::new(HashMap::new()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Number of currently resident pages. Diagnostic surface for tests.
    pub fn num_resident(&self) -> usize {
        self.pages.read().len()
    }

    /// Register a storage backend; page ids for its table resolve to it from
    /// then on.
    pub fn register_file(&self, file: Arc<dyn DbFile>) -> TableId {
        let table_id = file.id();
        self.files.write().insert(table_id, file);
        table_id
    }

    fn file_for(&self, table_id: TableId) -> Result<Arc<dyn DbFile>, CacheError> {
        self.files
            .read()
            .get(&table_id)
            .cloned()
            .ok_or(CacheError::UnknownTable(table_id))
    }

    /// Acquire the lock matching `perm` (shared for read-only, exclusive for
    /// read-write) and return the resident page, fetching it from storage on
    /// a miss. Read-write access also registers the page in the
    /// transaction's dirty set. May block on the lock; fails with an abort
    /// error if the deadlock detector victimizes the caller.
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<PagePtr, CacheError> {
        let mode = match perm {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        };
        self.lock_manager.lock(tid, pid, mode)?;
        if perm == Permissions::ReadWrite {
            self.dirty_pages.lock().entry(tid).or_default().insert(pid);
        }

        // lock order is pages before pins; the map guard must be gone before
        // the pin ledger is touched
        let pages = self.pages.read();
        if let Some(ptr) = pages.get(&pid).cloned() {
            ptr.write().inc_fix_count();
            drop(pages);
            self.record_pin(tid, pid);
            return Ok(ptr);
        }
        drop(pages);

        let mut pages = self.pages.write();
        // another thread may have filled the miss while we upgraded
        if let Some(ptr) = pages.get(&pid).cloned() {
            ptr.write().inc_fix_count();
            drop(pages);
            self.record_pin(tid, pid);
            return Ok(ptr);
        }

        while pages.len() >= self.capacity {
            self.evict_one(&mut pages)?;
        }

        let file = self.file_for(pid.table_id)?;
        let mut page = file.read_page(pid)?;
        page.set_fix_count(1);
        let ptr = Arc::new(RwLock::new(page));
        pages.insert(pid, Arc::clone(&ptr));
        drop(pages);
        self.record_pin(tid, pid);
        Ok(ptr)
    }

    fn record_pin(&self, tid: TransactionId, pid: PageId) {
        *self.pins.lock().entry(tid).or_default().entry(pid).or_insert(0) += 1;
    }

    /// Evict one clean, unpinned page. No flush is needed since the victim is
    /// clean; if no page qualifies the cache is genuinely stuck.
    fn evict_one(&self, pages: &mut HashMap<PageId, PagePtr>) -> Result<(), CacheError> {
        let victim = pages.iter().find_map(|(pid, ptr)| {
            let page = ptr.read();
            (!page.is_dirty() && page.fix_count() == 0).then_some(*pid)
        });
        match victim {
            Some(pid) => {
                pages.remove(&pid);
                debug!("evicted clean page {pid}");
                Ok(())
            }
            None => Err(CacheError::NoEvictablePage(pages.len())),
        }
    }

    /// Insert a tuple into the given table, marking every mutated page as
    /// dirtied by `tid`.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> Result<(), CacheError> {
        let file = self.file_for(table_id)?;
        let touched = file.insert_tuple(self, tid, tuple)?;
        self.mark_pages_dirty(tid, &touched);
        Ok(())
    }

    /// Delete a tuple, located through its record id.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<(), CacheError> {
        let rid = tuple.record_id().ok_or(HeapFileError::MissingRecordId)?;
        let file = self.file_for(rid.page_id.table_id)?;
        let touched = file.delete_tuple(self, tid, tuple)?;
        self.mark_pages_dirty(tid, &touched);
        Ok(())
    }

    fn mark_pages_dirty(&self, tid: TransactionId, pids: &[PageId]) {
        {
            let pages = self.pages.read();
            for pid in pids {
                if let Some(ptr) = pages.get(pid) {
                    ptr.write().mark_dirty(Some(tid));
                }
            }
        }
        self.dirty_pages
            .lock()
            .entry(tid)
            .or_default()
            .extend(pids.iter().copied());
    }

    /// Commit or abort a transaction: flush (commit) or discard (abort) every
    /// page it dirtied, release its pins, then release all of its locks.
    /// A no-op for a transaction that holds nothing.
    pub fn transaction_complete(
        &self,
        tid: TransactionId,
        commit: bool,
    ) -> Result<(), CacheError> {
        if let Some(set) = self.dirty_pages.lock().remove(&tid) {
            for pid in set {
                if commit {
                    self.flush_page(pid)?;
                } else {
                    self.discard_page(pid);
                }
            }
        }
        self.release_pins(tid);
        self.lock_manager.unlock_transaction(tid);
        debug!("{tid} {}", if commit { "committed" } else { "aborted" });
        Ok(())
    }

    /// `transaction_complete` defaulting to commit.
    pub fn commit(&self, tid: TransactionId) -> Result<(), CacheError> {
        self.transaction_complete(tid, true)
    }

    fn release_pins(&self, tid: TransactionId) {
        let Some(per_txn) = self.pins.lock().remove(&tid) else { return };
        let pages = self.pages.read();
        for (pid, count) in per_txn {
            if let Some(ptr) = pages.get(&pid) {
                ptr.write().release_fixes(count);
            }
        }
    }

    /// Write one resident page back to its file if dirty; clears the dirty
    /// mark on success. A non-resident page is a no-op.
    pub fn flush_page(&self, pid: PageId) -> Result<(), CacheError> {
        let Some(ptr) = self.pages.read().get(&pid).cloned() else {
            return Ok(());
        };
        let mut page = ptr.write();
        if !page.is_dirty() {
            return Ok(());
        }
        let file = self.file_for(pid.table_id)?;
        file.write_page(&page)?;
        page.mark_dirty(None);
        Ok(())
    }

    /// Write all pages dirtied by one transaction without ending it.
    pub fn flush_pages(&self, tid: TransactionId) -> Result<(), CacheError> {
        let pids: Vec<PageId> = self
            .dirty_pages
            .lock()
            .get_mut(&tid)
            .map(|set| set.drain().collect())
            .unwrap_or_default();
        for pid in pids {
            self.flush_page(pid)?;
        }
        Ok(())
    }

    /// Write every dirty resident page to storage. Test and diagnostic use
    /// only: flushing pages of live transactions breaks the no-steal policy.
    pub fn flush_all_pages(&self) -> Result<(), CacheError> {
        let pids: Vec<PageId> = self.pages.read().keys().copied().collect();
        for pid in pids {
            self.flush_page(pid)?;
        }
        Ok(())
    }

    /// Drop a page from the cache without flushing it, so the next access
    /// re-reads it from storage. Used to undo in-memory mutations on abort
    /// and by external recovery that must never see a stale cached copy.
    pub fn discard_page(&self, pid: PageId) {
        self.pages.write().remove(&pid);
    }

    /// Release one lock acquisition (and the matching pin) before transaction
    /// end. Dangerous: only callers that know the page will not be touched
    /// again by this transaction may use it.
    pub fn unsafe_release_page(
        &self,
        tid: TransactionId,
        pid: PageId,
    ) -> Result<(), CacheError> {
        // debit the ledger first and let go of it; taking the pages map
        // while holding the pins mutex would invert the pages-then-pins
        // order used by get_page
        let mut debited = false;
        {
            let mut pins = self.pins.lock();
            if let Some(per_txn) = pins.get_mut(&tid) {
                if let Some(count) = per_txn.get_mut(&pid) {
                    *count -= 1;
                    if *count == 0 {
                        per_txn.remove(&pid);
                    }
                    debited = true;
                }
            }
        }
        if debited {
            if let Some(ptr) = self.pages.read().get(&pid).cloned() {
                ptr.write().release_fixes(1);
            }
        }
        self.lock_manager.unlock(tid, pid)?;
        Ok(())
    }

    /// Whether the transaction holds a lock on the page.
    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds_lock(tid, pid)
    }
}
