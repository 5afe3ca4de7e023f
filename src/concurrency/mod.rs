mod deadlock;
pub mod error;
pub mod lock_manager;

pub use error::LockError;
pub use lock_manager::{LockManager, LockMode};
