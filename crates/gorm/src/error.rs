use configuration::DurationError;
use thiserror::Error;

/// Boxed error returned by a driver when a connection cannot be established.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("database is not opened")]
    NotOpened,

    #[error("Invalid duration for `{field}`: {source}")]
    InvalidDuration {
        field: &'static str,
        #[source]
        source: DurationError,
    },

    #[error("Failed to connect to the database: {0}")]
    Connection(#[source] BoxError),

    #[error("Unsupported database type: {0}")]
    UnsupportedDriver(String),

    #[error("Malformed data source name: {0}")]
    InvalidDsn(String),

    #[error("Connecting to the database was cancelled")]
    Cancelled,
}

impl From<sqlx::Error> for DataSourceError {
    fn from(err: sqlx::Error) -> Self {
        DataSourceError::Connection(Box::new(err))
    }
}
