//! # Gorm Starter
//!
//! Supervises the connection to a relational database for the rest of the
//! application. It does not query anything itself: it builds the driver's
//! data source name, opens the pool (retrying when asked to) and hands out
//! the resulting repository.
//!
//! ## Public API
//!
//! - `Configuration`: binds `GormProperties` to an owned `DataSource` and opens
//!   it lazily on the first `repository()` call.
//! - `DataSource`: `open`, `close`, `is_opened`, `repository` and the retrying
//!   `connect`.
//! - `Connector` / `Repository`: the seam to the driver. `SqlxConnector` and
//!   `MySqlRepository` are the `sqlx` implementations.
//! - `Dsn`: the `user:password@tcp(host:port)/db?...` connection string.
//! - `DataSourceError`: the errors returned by this crate.

// Declare the modules that constitute this crate.
pub mod autoconfigure;
pub mod connector;
pub mod data_source;
pub mod dsn;
pub mod error;

// Re-export the key components to create a clean, public-facing API.
pub use autoconfigure::{Configuration, PROFILE};
pub use configuration::GormProperties as Properties;
pub use connector::{Connector, MySqlRepository, PoolSettings, Repository, SqlxConnector};
pub use data_source::{DataSource, RetryPolicy};
pub use dsn::Dsn;
pub use error::DataSourceError;
