pub mod error;
pub mod page_cache;

pub use error::CacheError;
pub use page_cache::PageCache;
