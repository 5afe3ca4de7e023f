pub mod error;
pub mod heap_file;

pub use error::HeapFileError;
pub use heap_file::{HeapFile, HeapFileScan};
