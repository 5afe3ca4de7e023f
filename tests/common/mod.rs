use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::NamedTempFile;

use shaledb::{EngineConfig, HeapFile, PageCache, TableId, TupleDesc};

/// Small pages and a short detector period keep the tests fast: one Int
/// column on a 128-byte page gives 15 slots per page.
pub const TEST_PAGE_SIZE: usize = 128;

pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_page_size(TEST_PAGE_SIZE)
        .with_detection_interval(Duration::from_millis(25))
}

pub fn create_test_cache(capacity: usize) -> Arc<PageCache> {
    Arc::new(PageCache::new(test_config().with_cache_capacity(capacity)))
}

/// Create a heap file on a fresh temp file and register it with the cache.
/// The temp file must be kept alive by the caller.
pub fn create_test_table(
    cache: &PageCache,
    desc: TupleDesc,
) -> Result<(Arc<HeapFile>, TableId, NamedTempFile)> {
    let file = NamedTempFile::new()?;
    let heap = Arc::new(HeapFile::open(file.path(), desc, cache.page_size())?);
    let table_id = cache.register_file(heap.clone());
    Ok((heap, table_id, file))
}
