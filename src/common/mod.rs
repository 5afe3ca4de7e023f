pub mod config;
pub mod types;

pub use config::EngineConfig;
pub use types::{PageId, PagePtr, Permissions, RecordId, TableId, TransactionId};
