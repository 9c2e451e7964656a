use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Insufficient space in page")]
    InsufficientSpace,

    #[error("Record not found")]
    RecordNotFound,

    #[error("Corrupted page: {0}")]
    Corrupted(String),
}
