use crate::connector::{Connector, PoolSettings, Repository, SqlxConnector};
use crate::dsn::Dsn;
use crate::error::DataSourceError;
use configuration::{parse_duration, GormProperties};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// How many times a failed connection attempt may be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Unlimited,
    Limited(u32),
}

impl RetryPolicy {
    /// `-1` means unlimited. Other negative values allow no retry at all.
    pub fn from_retry_times(retry_times: i32) -> Self {
        match retry_times {
            -1 => RetryPolicy::Unlimited,
            n => RetryPolicy::Limited(u32::try_from(n).unwrap_or(0)),
        }
    }

    /// Whether another attempt is allowed after `retries` retries have been made.
    pub fn allows(&self, retries: u32) -> bool {
        match self {
            RetryPolicy::Unlimited => true,
            RetryPolicy::Limited(limit) => retries < *limit,
        }
    }
}

/// Owns the lifecycle of one relational repository.
///
/// Opens are serialised by `open_lock`, which stays locked while a connect
/// is retrying. The held repository sits behind its own lock that is never
/// kept across an await, so `is_opened`, `repository` and `close` answer
/// immediately even while an open is still waiting to retry.
pub struct DataSource<C: Connector = SqlxConnector> {
    connector: C,
    open_lock: Mutex<()>,
    repository: RwLock<Option<C::Repository>>,
    cancel: StdMutex<CancellationToken>,
    last_retry_count: AtomicU32,
}

impl<C: Connector> DataSource<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            open_lock: Mutex::new(()),
            repository: RwLock::new(None),
            cancel: StdMutex::new(CancellationToken::new()),
            last_retry_count: AtomicU32::new(0),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connects with `properties` unless a repository is already held, then
    /// keeps the repository with the configured pool settings.
    pub async fn open(&self, properties: &GormProperties) -> Result<(), DataSourceError> {
        let _opening = self.open_lock.lock().await;
        if self.is_opened().await {
            return Ok(());
        }

        let max_lifetime = parse_duration(&properties.conn_max_lifetime).map_err(|source| {
            tracing::error!(error = %source, "dataSource parse duration failed");
            DataSourceError::InvalidDuration {
                field: "conn_max_lifetime",
                source,
            }
        })?;
        let pool = PoolSettings {
            max_lifetime: (!max_lifetime.is_zero()).then_some(max_lifetime),
            max_idle_conns: properties.max_idle_conns,
            max_open_conns: properties.max_open_conns,
        };

        let repository = self.connect(properties, &pool).await?;
        *self.repository.write().await = Some(repository);
        Ok(())
    }

    pub async fn is_opened(&self) -> bool {
        self.repository.read().await.is_some()
    }

    /// Closes and forgets the held repository.
    pub async fn close(&self) -> Result<(), DataSourceError> {
        let repository = self
            .repository
            .write()
            .await
            .take()
            .ok_or(DataSourceError::NotOpened)?;
        repository.close().await;
        tracing::info!("dataSource closed");
        Ok(())
    }

    /// The held repository, if any. Not validated.
    pub async fn repository(&self) -> Option<C::Repository> {
        self.repository.read().await.clone()
    }

    /// Opens a repository, retrying failed attempts when `auto_reconnect` is set.
    ///
    /// With `retry_times = N` the connector is called at most `N + 1` times;
    /// `-1` keeps trying until it succeeds or [`DataSource::cancel`] is called.
    /// The `interval` is only parsed once an attempt has failed.
    pub async fn connect(
        &self,
        properties: &GormProperties,
        pool: &PoolSettings,
    ) -> Result<C::Repository, DataSourceError> {
        let dsn = Dsn::from_properties(properties, resolve_password(properties));
        let source = dsn.to_string();
        let policy = RetryPolicy::from_retry_times(properties.retry_times);
        let cancel = self.cancellation();

        let mut retries = 0u32;
        loop {
            let err = match self
                .connector
                .open(&properties.driver_type, &source, pool)
                .await
            {
                Ok(repository) => {
                    self.last_retry_count.store(retries, Ordering::Relaxed);
                    tracing::info!(
                        "connected to dataSource {}@{}:{}/{}",
                        dsn.username,
                        dsn.host,
                        dsn.port,
                        dsn.database
                    );
                    return Ok(repository);
                }
                Err(err) => err,
            };

            self.last_retry_count.store(retries, Ordering::Relaxed);
            tracing::error!(error = %err, dsn = %dsn.redacted(), "dataSource connection failed");
            if !properties.auto_reconnect {
                return Err(err);
            }

            let interval = parse_duration(&properties.interval).map_err(|source| {
                tracing::error!(error = %source, "dataSource parse duration failed");
                DataSourceError::InvalidDuration {
                    field: "interval",
                    source,
                }
            })?;
            if !policy.allows(retries) {
                return Err(err);
            }

            tracing::warn!(
                "dataSource reconnecting in {:?} (retry {} of {})",
                interval,
                retries.saturating_add(1),
                match policy {
                    RetryPolicy::Unlimited => "unlimited".to_string(),
                    RetryPolicy::Limited(limit) => limit.to_string(),
                }
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(DataSourceError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
            retries = retries.saturating_add(1);
        }
    }

    /// Stops the retry loops currently waiting for their next attempt.
    /// Connects started afterwards retry as usual.
    pub fn cancel(&self) {
        let mut current = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        current.cancel();
        *current = CancellationToken::new();
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Retries made by the most recent call to [`DataSource::connect`].
    pub fn last_retry_count(&self) -> u32 {
        self.last_retry_count.load(Ordering::Relaxed)
    }
}

/// The password to connect with. A failed decryption falls back to the
/// configured value.
fn resolve_password(properties: &GormProperties) -> String {
    if !properties.config.decrypt {
        return properties.password.clone();
    }
    match crypto::decrypt_base64(&properties.password, &properties.config.decrypt_key) {
        Ok(password) => password,
        Err(e) => {
            tracing::warn!(error = %e, "dataSource password decryption failed, using the configured password");
            properties.password.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Debug, Default)]
    struct MockRepository {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Repository for MockRepository {
        async fn ping(&self) -> Result<(), DataSourceError> {
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Fails every attempt before `succeed_on` (1-based); never succeeds when `None`.
    #[derive(Default)]
    struct MockConnector {
        succeed_on: Option<usize>,
        attempts: AtomicUsize,
        sources: std::sync::Mutex<Vec<String>>,
        repository: MockRepository,
    }

    impl MockConnector {
        fn succeeding_on(attempt: usize) -> Self {
            Self {
                succeed_on: Some(attempt),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Repository = MockRepository;

        async fn open(
            &self,
            _driver_type: &str,
            source: &str,
            _pool: &PoolSettings,
        ) -> Result<MockRepository, DataSourceError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.sources.lock().unwrap().push(source.to_string());
            match self.succeed_on {
                Some(n) if attempt >= n => Ok(self.repository.clone()),
                _ => Err(DataSourceError::Connection("connection refused".into())),
            }
        }
    }

    fn properties() -> GormProperties {
        GormProperties {
            username: "app".to_string(),
            password: "secret".to_string(),
            database: "my-db".to_string(),
            interval: "1ms".to_string(),
            ..GormProperties::default()
        }
    }

    fn attempts(ds: &DataSource<Arc<MockConnector>>) -> usize {
        ds.connector.attempts.load(Ordering::SeqCst)
    }

    fn data_source(connector: MockConnector) -> DataSource<Arc<MockConnector>> {
        DataSource::new(Arc::new(connector))
    }

    #[tokio::test]
    async fn close_without_open_is_an_error() {
        let ds = data_source(MockConnector::succeeding_on(1));

        assert!(!ds.is_opened().await);
        assert!(ds.repository().await.is_none());
        assert!(matches!(ds.close().await, Err(DataSourceError::NotOpened)));
    }

    #[tokio::test]
    async fn close_releases_the_repository() {
        let ds = data_source(MockConnector::succeeding_on(1));
        ds.open(&properties()).await.unwrap();
        assert!(ds.is_opened().await);
        let repository = ds.repository().await.unwrap();

        ds.close().await.unwrap();

        assert!(!ds.is_opened().await);
        assert!(ds.repository().await.is_none());
        assert!(repository.closed.load(Ordering::SeqCst));
        assert!(matches!(ds.close().await, Err(DataSourceError::NotOpened)));
    }

    #[tokio::test]
    async fn open_is_a_no_op_once_opened() {
        let ds = data_source(MockConnector::succeeding_on(1));

        ds.open(&properties()).await.unwrap();
        ds.open(&properties()).await.unwrap();

        assert_eq!(attempts(&ds), 1);
    }

    #[tokio::test]
    async fn concurrent_opens_connect_once() {
        let ds = Arc::new(data_source(MockConnector::succeeding_on(1)));
        let props = properties();

        let (a, b) = tokio::join!(ds.open(&props), ds.open(&props));
        a.unwrap();
        b.unwrap();

        assert_eq!(attempts(&ds), 1);
    }

    #[tokio::test]
    async fn without_auto_reconnect_the_first_failure_is_returned() {
        let ds = data_source(MockConnector::failing());

        let err = ds.open(&properties()).await.unwrap_err();

        assert!(matches!(err, DataSourceError::Connection(_)));
        assert_eq!(attempts(&ds), 1);
        assert!(!ds.is_opened().await);
    }

    #[tokio::test]
    async fn limited_retries_make_n_plus_one_attempts() {
        for retry_times in [0, 1, 3] {
            let ds = data_source(MockConnector::failing());
            let props = GormProperties {
                auto_reconnect: true,
                retry_times,
                ..properties()
            };

            let err = ds.open(&props).await.unwrap_err();

            assert!(matches!(err, DataSourceError::Connection(_)));
            assert_eq!(attempts(&ds), retry_times as usize + 1);
            assert_eq!(ds.last_retry_count(), retry_times as u32);
            assert!(!ds.is_opened().await);
        }
    }

    #[tokio::test]
    async fn unlimited_retries_continue_until_success() {
        let ds = data_source(MockConnector::succeeding_on(8));
        let props = GormProperties {
            auto_reconnect: true,
            retry_times: -1,
            ..properties()
        };

        ds.open(&props).await.unwrap();

        assert_eq!(attempts(&ds), 8);
        assert_eq!(ds.last_retry_count(), 7);
        assert!(ds.is_opened().await);
    }

    #[tokio::test]
    async fn success_within_the_retry_budget_opens() {
        let ds = data_source(MockConnector::succeeding_on(3));
        let props = GormProperties {
            auto_reconnect: true,
            retry_times: 5,
            ..properties()
        };

        ds.open(&props).await.unwrap();

        assert_eq!(attempts(&ds), 3);
    }

    #[tokio::test]
    async fn malformed_interval_aborts_the_retry_loop() {
        let ds = data_source(MockConnector::failing());
        let props = GormProperties {
            auto_reconnect: true,
            retry_times: 10,
            interval: "soon".to_string(),
            ..properties()
        };

        let err = ds.open(&props).await.unwrap_err();

        assert!(matches!(
            err,
            DataSourceError::InvalidDuration { field: "interval", .. }
        ));
        assert_eq!(attempts(&ds), 1);
    }

    #[tokio::test]
    async fn malformed_lifetime_fails_before_connecting() {
        let ds = data_source(MockConnector::succeeding_on(1));
        let props = GormProperties {
            conn_max_lifetime: "a while".to_string(),
            ..properties()
        };

        let err = ds.open(&props).await.unwrap_err();

        assert!(matches!(
            err,
            DataSourceError::InvalidDuration { field: "conn_max_lifetime", .. }
        ));
        assert_eq!(attempts(&ds), 0);
        assert!(!ds.is_opened().await);
    }

    #[tokio::test]
    async fn cancel_stops_an_unlimited_retry_loop() {
        let ds = Arc::new(data_source(MockConnector::failing()));
        let props = GormProperties {
            auto_reconnect: true,
            retry_times: -1,
            interval: "1h".to_string(),
            ..properties()
        };

        let task = tokio::spawn({
            let ds = ds.clone();
            async move { ds.open(&props).await }
        });
        while attempts(&ds) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        ds.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("retry loop did not stop")
            .unwrap();
        assert!(matches!(result, Err(DataSourceError::Cancelled)));
    }

    #[tokio::test]
    async fn status_is_available_while_an_open_is_retrying() {
        let ds = Arc::new(data_source(MockConnector::failing()));
        let props = GormProperties {
            auto_reconnect: true,
            retry_times: -1,
            interval: "1h".to_string(),
            ..properties()
        };

        let task = tokio::spawn({
            let ds = ds.clone();
            async move { ds.open(&props).await }
        });
        while attempts(&ds) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let opened = tokio::time::timeout(Duration::from_secs(2), ds.is_opened())
            .await
            .expect("is_opened waited for the retry loop");
        assert!(!opened);
        let repository = tokio::time::timeout(Duration::from_secs(2), ds.repository())
            .await
            .expect("repository waited for the retry loop");
        assert!(repository.is_none());
        let closed = tokio::time::timeout(Duration::from_secs(2), ds.close())
            .await
            .expect("close waited for the retry loop");
        assert!(matches!(closed, Err(DataSourceError::NotOpened)));

        ds.cancel();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(DataSourceError::Cancelled)));
    }

    #[tokio::test]
    async fn a_cancelled_open_does_not_stop_later_opens() {
        let ds = Arc::new(data_source(MockConnector::succeeding_on(3)));
        let props = GormProperties {
            auto_reconnect: true,
            retry_times: -1,
            interval: "1h".to_string(),
            ..properties()
        };

        let task = tokio::spawn({
            let ds = ds.clone();
            let props = props.clone();
            async move { ds.open(&props).await }
        });
        while attempts(&ds) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        ds.cancel();
        assert!(matches!(task.await.unwrap(), Err(DataSourceError::Cancelled)));

        let props = GormProperties {
            interval: "1ms".to_string(),
            ..props
        };
        ds.open(&props).await.unwrap();

        assert!(ds.is_opened().await);
        assert_eq!(attempts(&ds), 3);
        assert_eq!(ds.last_retry_count(), 1);
    }

    #[tokio::test]
    async fn the_generated_source_normalizes_names() {
        let connector = Arc::new(MockConnector::succeeding_on(1));
        let ds = DataSource::new(connector.clone());
        let props = GormProperties {
            loc: "Asia/Shanghai".to_string(),
            ..properties()
        };

        ds.open(&props).await.unwrap();

        let sources = connector.sources.lock().unwrap();
        assert_eq!(
            sources[0],
            "app:secret@tcp(localhost:3306)/my_db?charset=utf8&parseTime=True&loc=Asia%2FShanghai"
        );
    }

    #[tokio::test]
    async fn failed_decryption_keeps_the_configured_password() {
        let connector = Arc::new(MockConnector::succeeding_on(1));
        let ds = DataSource::new(connector.clone());
        let mut props = properties();
        props.password = "bm90LWVuY3J5cHRlZA==".to_string();
        props.config.decrypt = true;
        props.config.decrypt_key = "not a pem key".to_string();

        ds.open(&props).await.unwrap();

        let sources = connector.sources.lock().unwrap();
        assert!(sources[0].starts_with("app:bm90LWVuY3J5cHRlZA==@tcp("));
    }

    #[tokio::test]
    async fn decrypted_password_is_used_to_connect() {
        use rsa::pkcs1::EncodeRsaPrivateKey;
        use rsa::pkcs8::LineEnding;

        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let pem = key.to_pkcs1_pem(LineEnding::LF).unwrap().to_string();
        let connector = Arc::new(MockConnector::succeeding_on(1));
        let ds = DataSource::new(connector.clone());
        let mut props = properties();
        props.password = crypto::encrypt_base64("plain-pw", &pem).unwrap();
        props.config.decrypt = true;
        props.config.decrypt_key = pem;

        ds.open(&props).await.unwrap();

        let sources = connector.sources.lock().unwrap();
        assert!(sources[0].starts_with("app:plain-pw@tcp("));
    }

    #[test]
    fn retry_policy_from_retry_times() {
        assert_eq!(RetryPolicy::from_retry_times(-1), RetryPolicy::Unlimited);
        assert_eq!(RetryPolicy::from_retry_times(3), RetryPolicy::Limited(3));
        assert_eq!(RetryPolicy::from_retry_times(-5), RetryPolicy::Limited(0));
        assert!(RetryPolicy::Limited(2).allows(1));
        assert!(!RetryPolicy::Limited(2).allows(2));
        assert!(RetryPolicy::Unlimited.allows(u32::MAX));
    }
}
