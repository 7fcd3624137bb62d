use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BoltError {
    #[error("database is not opened")]
    NotOpened,

    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to prepare the store file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key-value store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Bucket name must not be empty")]
    InvalidBucket,

    /// The store could not be opened when the repository was handed out.
    #[error("Key-value store is unavailable: {0}")]
    Unavailable(#[source] Arc<BoltError>),
}
