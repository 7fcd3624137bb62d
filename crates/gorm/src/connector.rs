use crate::dsn::Dsn;
use crate::error::DataSourceError;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long the driver may spend establishing the first connection of a pool.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pool tuning applied when a repository is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// `None` lets connections live forever.
    pub max_lifetime: Option<Duration>,
    pub max_idle_conns: u32,
    /// Zero keeps the driver default.
    pub max_open_conns: u32,
}

/// A live handle to the underlying database session.
#[async_trait]
pub trait Repository: Clone + Send + Sync + 'static {
    /// Round-trips a trivial statement to prove the connection is usable.
    async fn ping(&self) -> Result<(), DataSourceError>;

    /// Closes every connection held by this handle.
    async fn close(&self);
}

/// Opens repositories from a driver type and a data source name.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Repository: Repository;

    async fn open(
        &self,
        driver_type: &str,
        source: &str,
        pool: &PoolSettings,
    ) -> Result<Self::Repository, DataSourceError>;
}

#[async_trait]
impl<C: Connector> Connector for Arc<C> {
    type Repository = C::Repository;

    async fn open(
        &self,
        driver_type: &str,
        source: &str,
        pool: &PoolSettings,
    ) -> Result<Self::Repository, DataSourceError> {
        self.as_ref().open(driver_type, source, pool).await
    }
}

/// The production connector, backed by a `sqlx` MySQL pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxConnector;

#[async_trait]
impl Connector for SqlxConnector {
    type Repository = MySqlRepository;

    async fn open(
        &self,
        driver_type: &str,
        source: &str,
        pool: &PoolSettings,
    ) -> Result<MySqlRepository, DataSourceError> {
        if !driver_type.eq_ignore_ascii_case("mysql") {
            return Err(DataSourceError::UnsupportedDriver(driver_type.to_string()));
        }

        let options = connect_options(&source.parse()?)?;
        let pool_options = pool_options(pool);
        debug!(?pool, "Opening MySQL connection pool.");

        let pool = pool_options.connect_with(options).await?;
        Ok(MySqlRepository { pool })
    }
}

fn connect_options(dsn: &Dsn) -> Result<MySqlConnectOptions, DataSourceError> {
    let port: u16 = dsn
        .port
        .parse()
        .map_err(|_| DataSourceError::InvalidDsn(format!("invalid port \"{}\"", dsn.port)))?;

    let mut options = MySqlConnectOptions::new()
        .host(&dsn.host)
        .port(port)
        .username(&dsn.username)
        .password(&dsn.password);
    if !dsn.database.is_empty() {
        options = options.database(&dsn.database);
    }
    if !dsn.charset.is_empty() {
        options = options.charset(&dsn.charset);
    }
    Ok(options)
}

fn pool_options(pool: &PoolSettings) -> MySqlPoolOptions {
    let mut options = MySqlPoolOptions::new()
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .max_lifetime(pool.max_lifetime);
    if pool.max_open_conns > 0 {
        options = options.max_connections(pool.max_open_conns);
    }
    let max_connections = options.get_max_connections();
    options.min_connections(pool.max_idle_conns.min(max_connections))
}

/// Repository over a `sqlx` MySQL pool.
#[derive(Debug, Clone)]
pub struct MySqlRepository {
    pool: MySqlPool,
}

impl MySqlRepository {
    /// The pool, for running queries.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl Repository for MySqlRepository {
    async fn ping(&self) -> Result<(), DataSourceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
