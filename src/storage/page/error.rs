use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("page has no free slot")]
    PageFull,
    #[error("slot {0} is out of range for this page")]
    SlotOutOfRange(usize),
    #[error("slot {0} is vacant")]
    SlotVacant(usize),
    #[error("tuple does not match the page schema")]
    SchemaMismatch,
    #[error("text field of {0} bytes exceeds capacity")]
    TextTooLong(usize),
    #[error("stored tuple bytes are corrupt")]
    CorruptTuple,
    #[error("page buffer of {actual} bytes does not match configured page size {expected}")]
    BadPageSize { expected: usize, actual: usize },
}
