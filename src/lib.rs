// Shale storage engine core: page-level locking, bounded page cache, and
// heap file storage for a teaching relational engine.

pub mod common;
pub mod concurrency;
pub mod storage;

// Re-export key items for convenient access
pub use common::config::EngineConfig;
pub use common::types::{PageId, PagePtr, Permissions, RecordId, TableId, TransactionId};
pub use concurrency::{LockError, LockManager, LockMode};
pub use storage::buffer::{CacheError, PageCache};
pub use storage::dbfile::{DbFile, TupleScan};
pub use storage::heap::{HeapFile, HeapFileError};
pub use storage::page::{HeapPage, PageError};
pub use storage::tuple::{Field, FieldType, Tuple, TupleDesc};
