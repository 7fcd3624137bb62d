//! # Bolt Starter
//!
//! An embedded, file-backed key-value store organised in buckets, opened
//! from `BoltProperties` (file path, permission mode, lock timeout). The
//! store is a single SQLite file managed through `sqlx`.
//!
//! `Configuration::repository()` always yields a `Repository`; if the store
//! could not be opened, the error surfaces on the first operation.

pub mod autoconfigure;
pub mod data_source;
pub mod error;
pub mod repository;

pub use autoconfigure::{Configuration, PROFILE};
pub use configuration::BoltProperties as Properties;
pub use data_source::DataSource;
pub use error::BoltError;
pub use repository::Repository;
