pub mod error;
pub mod heap_page;

pub use error::PageError;
pub use heap_page::HeapPage;
