use crate::error::BoltError;
use configuration::BoltProperties;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

const CREATE_BUCKETS_TABLE: &str = "CREATE TABLE IF NOT EXISTS bolt_buckets (
    bucket     TEXT NOT NULL,
    item_key   BLOB NOT NULL,
    item_value BLOB NOT NULL,
    PRIMARY KEY (bucket, item_key)
)";

/// Owns the lifecycle of one embedded key-value store file.
#[derive(Default)]
pub struct DataSource {
    pool: Mutex<Option<SqlitePool>>,
}

impl DataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (creating when missing) the store file described by `properties`.
    /// A no-op when the store is already open.
    pub async fn open(&self, properties: &BoltProperties) -> Result<(), BoltError> {
        let mut held = self.pool.lock().await;
        if held.is_some() {
            return Ok(());
        }

        properties
            .validate()
            .map_err(|e| BoltError::InvalidConfig(e.to_string()))?;

        let path = properties.database.as_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        // SQLite creates its -journal/-wal files with the store's permissions,
        // so the mode has to be in place before the first connection.
        create_with_mode(path, properties.mode).await?;

        let mut options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        if properties.timeout > 0 {
            options = options.busy_timeout(Duration::from_secs(properties.timeout as u64));
        }

        // A single connection: the store has one writer, like the file lock it stands in for.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        if let Err(e) = sqlx::query(CREATE_BUCKETS_TABLE).execute(&pool).await {
            pool.close().await;
            return Err(e.into());
        }

        tracing::info!("Opened key-value store {}", path.display());
        *held = Some(pool);
        Ok(())
    }

    pub async fn is_opened(&self) -> bool {
        self.pool.lock().await.is_some()
    }

    pub async fn close(&self) -> Result<(), BoltError> {
        let pool = self.pool.lock().await.take().ok_or(BoltError::NotOpened)?;
        pool.close().await;
        tracing::info!("Closed key-value store.");
        Ok(())
    }

    /// The pool of the open store, if any.
    pub async fn pool(&self) -> Option<SqlitePool> {
        self.pool.lock().await.clone()
    }
}

/// Creates the store file with `mode` when it is missing. The umask may
/// narrow the creation mode, and an existing file keeps whatever it had, so
/// the permissions are set explicitly afterwards.
#[cfg(unix)]
async fn create_with_mode(path: &Path, mode: u32) -> Result<(), BoltError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .mode(mode)
        .open(path)
        .await?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn create_with_mode(_path: &Path, _mode: u32) -> Result<(), BoltError> {
    Ok(())
}
