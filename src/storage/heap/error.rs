use thiserror::Error;

use crate::common::types::{PageId, TableId};
use crate::storage::page::PageError;

#[derive(Error, Debug)]
pub enum HeapFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("page {pid} is beyond the end of the file ({num_pages} pages)")]
    PageOutOfBounds { pid: PageId, num_pages: usize },
    #[error("page codec error: {0}")]
    Page(#[from] PageError),
    #[error("tuple carries no record id")]
    MissingRecordId,
    #[error("page does not belong to table {0}")]
    WrongTable(TableId),
}
