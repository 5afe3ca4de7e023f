use std::fs::{File, OpenOptions};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;
use parking_lot::Mutex;

use crate::common::types::{PageId, Permissions, TableId, TransactionId};
use crate::storage::buffer::{CacheError, PageCache};
use crate::storage::dbfile::{DbFile, TupleScan};
use crate::storage::heap::error::HeapFileError;
use crate::storage::page::HeapPage;
use crate::storage::tuple::{Tuple, TupleDesc};

/// A table as a flat, append-only sequence of fixed-size pages on disk.
/// Tuples are stored in no particular order; inserts scan for the first page
/// with a free slot and append a new page only when every page is full.
pub struct HeapFile {
    table_id: TableId,
    desc: TupleDesc,
    page_size: usize,
    file: Mutex<File>,
    /// Serializes file extension so two inserters cannot both append a page
    /// for the same page number.
    append_lock: Mutex<()>,
}

impl HeapFile {
    /// Open (or create) the backing file. The table id is derived by hashing
    /// the canonical path, so reopening the same file yields the same id.
    pub fn open(
        path: impl AsRef<Path>,
        desc: TupleDesc,
        page_size: usize,
    ) -> Result<Self, HeapFileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let canonical = path.as_ref().canonicalize()?;
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        let table_id = hasher.finish() as TableId;

        Ok(Self {
            table_id,
            desc,
            page_size,
            file: Mutex::new(file),
            append_lock: Mutex::new(()),
        })
    }

    fn check_table(&self, pid: PageId) -> Result<(), HeapFileError> {
        if pid.table_id != self.table_id {
            return Err(HeapFileError::WrongTable(pid.table_id));
        }
        Ok(())
    }

    /// Extend the file with one zeroed page and return its page number.
    /// Callers must hold the append lock.
    fn append_empty_page(&self) -> Result<usize, HeapFileError> {
        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        file.seek(SeekFrom::End(0))?;
        file.write_all(&vec![0u8; self.page_size])?;
        file.flush()?;
        Ok(len as usize / self.page_size)
    }
}

impl DbFile for HeapFile {
    fn id(&self) -> TableId {
        self.table_id
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn read_page(&self, pid: PageId) -> Result<HeapPage, HeapFileError> {
        self.check_table(pid)?;
        let offset = pid.page_no * self.page_size;
        let mut buf = vec![0u8; self.page_size];
        {
            let mut file = self.file.lock();
            let len = file.metadata()?.len() as usize;
            if offset + self.page_size > len {
                return Err(HeapFileError::PageOutOfBounds {
                    pid,
                    num_pages: len / self.page_size,
                });
            }
            file.seek(SeekFrom::Start(offset as u64))?;
            file.read_exact(&mut buf)?;
        }
        Ok(HeapPage::from_bytes(pid, self.desc.clone(), self.page_size, &buf)?)
    }

    fn write_page(&self, page: &HeapPage) -> Result<(), HeapFileError> {
        let pid = page.id();
        self.check_table(pid)?;
        let bytes = page.to_bytes();
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start((pid.page_no * self.page_size) as u64))?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }

    fn num_pages(&self) -> Result<usize, HeapFileError> {
        let file = self.file.lock();
        Ok(file.metadata()?.len() as usize / self.page_size)
    }

    /// First-fit insert: probe each page under a read lock, releasing it
    /// immediately if full; re-acquire a suitable page under a write lock and
    /// insert. If every page is full, append a fresh page under the append
    /// guard and insert there.
    fn insert_tuple(
        &self,
        cache: &PageCache,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageId>, CacheError> {
        let num_pages = self.num_pages()?;
        for page_no in 0..num_pages {
            let pid = PageId::new(self.table_id, page_no);
            let page = cache.get_page(tid, pid, Permissions::ReadOnly)?;
            let has_room = page.read().free_slots() > 0;
            if !has_room {
                cache.unsafe_release_page(tid, pid)?;
                continue;
            }
            let page = cache.get_page(tid, pid, Permissions::ReadWrite)?;
            page.write().insert_tuple(tuple)?;
            return Ok(vec![pid]);
        }

        let _append = self.append_lock.lock();
        let page_no = self.append_empty_page()?;
        debug!("table {} grew to page {}", self.table_id, page_no + 1);
        let pid = PageId::new(self.table_id, page_no);
        let page = cache.get_page(tid, pid, Permissions::ReadWrite)?;
        page.write().insert_tuple(tuple)?;
        Ok(vec![pid])
    }

    fn delete_tuple(
        &self,
        cache: &PageCache,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageId>, CacheError> {
        let rid = tuple.record_id().ok_or(HeapFileError::MissingRecordId)?;
        self.check_table(rid.page_id)?;
        let page = cache.get_page(tid, rid.page_id, Permissions::ReadWrite)?;
        page.write().delete_tuple(rid)?;
        Ok(vec![rid.page_id])
    }

    fn scan<'a>(
        &'a self,
        cache: &'a PageCache,
        tid: TransactionId,
    ) -> Box<dyn TupleScan + 'a> {
        Box::new(HeapFileScan { file: self, cache, tid, next_page: 0, current: None })
    }
}

/// Lazy page-at-a-time scan. The page count is consulted live at every page
/// boundary, so pages appended by other transactions mid-scan are visited;
/// this is defined behavior, not snapshot isolation.
pub struct HeapFileScan<'a> {
    file: &'a HeapFile,
    cache: &'a PageCache,
    tid: TransactionId,
    next_page: usize,
    current: Option<(Vec<Tuple>, usize)>,
}

impl TupleScan for HeapFileScan<'_> {
    fn next_tuple(&mut self) -> Result<Option<Tuple>, CacheError> {
        loop {
            if let Some((tuples, cursor)) = self.current.as_mut() {
                if *cursor < tuples.len() {
                    let tuple = tuples[*cursor].clone();
                    *cursor += 1;
                    return Ok(Some(tuple));
                }
                self.current = None;
            }
            if self.next_page >= self.file.num_pages()? {
                return Ok(None);
            }
            let pid = PageId::new(self.file.table_id, self.next_page);
            let page = self.cache.get_page(self.tid, pid, Permissions::ReadOnly)?;
            let tuples: Vec<Tuple> = page.read().tuples().cloned().collect();
            self.next_page += 1;
            self.current = Some((tuples, 0));
        }
    }

    fn rewind(&mut self) {
        self.next_page = 0;
        self.current = None;
    }
}
