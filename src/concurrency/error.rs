use thiserror::Error;

use crate::common::types::{PageId, TransactionId};

#[derive(Error, Debug)]
pub enum LockError {
    /// The transaction was chosen as the victim of a detected deadlock cycle.
    /// The caller must abort it (`transaction_complete` with commit = false)
    /// and may retry the whole transaction.
    #[error("{0} aborted: chosen as deadlock victim")]
    Aborted(TransactionId),

    /// Contract violation: releasing a lock that was never granted.
    #[error("{tid} holds no lock on page {pid}")]
    NotHeld { tid: TransactionId, pid: PageId },
}
