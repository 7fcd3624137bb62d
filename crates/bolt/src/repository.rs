use crate::data_source::DataSource;
use crate::error::BoltError;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

/// Bucketed key-value access to a [`DataSource`].
///
/// A repository is always handed out, even when the store failed to open;
/// in that case every operation reports the original open error.
#[derive(Clone)]
pub struct Repository {
    data_source: Arc<DataSource>,
    open_error: Option<Arc<BoltError>>,
}

impl Repository {
    pub(crate) fn new(data_source: Arc<DataSource>) -> Self {
        Self {
            data_source,
            open_error: None,
        }
    }

    pub(crate) fn unavailable(data_source: Arc<DataSource>, error: BoltError) -> Self {
        Self {
            data_source,
            open_error: Some(Arc::new(error)),
        }
    }

    pub fn data_source(&self) -> &Arc<DataSource> {
        &self.data_source
    }

    /// The error recorded when this repository was handed out, if any.
    pub fn open_error(&self) -> Option<&BoltError> {
        self.open_error.as_deref()
    }

    async fn pool(&self) -> Result<SqlitePool, BoltError> {
        match self.data_source.pool().await {
            Some(pool) => Ok(pool),
            None => Err(match &self.open_error {
                Some(err) => BoltError::Unavailable(Arc::clone(err)),
                None => BoltError::NotOpened,
            }),
        }
    }

    /// Stores `value` under `key` in `bucket`, replacing any previous value.
    pub async fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), BoltError> {
        check_bucket(bucket)?;
        let pool = self.pool().await?;
        sqlx::query(
            "INSERT INTO bolt_buckets (bucket, item_key, item_value) VALUES (?, ?, ?)
             ON CONFLICT (bucket, item_key) DO UPDATE SET item_value = excluded.item_value",
        )
        .bind(bucket)
        .bind(key)
        .bind(value)
        .execute(&pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, BoltError> {
        check_bucket(bucket)?;
        let pool = self.pool().await?;
        let value = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT item_value FROM bolt_buckets WHERE bucket = ? AND item_key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_optional(&pool)
        .await?;
        Ok(value)
    }

    /// Removes `key` from `bucket`. Removing a missing key is not an error.
    pub async fn delete(&self, bucket: &str, key: &[u8]) -> Result<(), BoltError> {
        check_bucket(bucket)?;
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM bolt_buckets WHERE bucket = ? AND item_key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&pool)
            .await?;
        Ok(())
    }

    /// All keys of `bucket` in byte order.
    pub async fn keys(&self, bucket: &str) -> Result<Vec<Vec<u8>>, BoltError> {
        check_bucket(bucket)?;
        let pool = self.pool().await?;
        let keys = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT item_key FROM bolt_buckets WHERE bucket = ? ORDER BY item_key",
        )
        .bind(bucket)
        .fetch_all(&pool)
        .await?;
        Ok(keys)
    }
}

fn check_bucket(bucket: &str) -> Result<(), BoltError> {
    if bucket.is_empty() {
        return Err(BoltError::InvalidBucket);
    }
    Ok(())
}
