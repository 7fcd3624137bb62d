use crate::data_source::DataSource;
use crate::repository::Repository;
use configuration::BoltProperties;
use std::sync::Arc;

/// Name of the configuration section read by this starter.
pub const PROFILE: &str = "bolt";

/// Binds [`BoltProperties`] to the store they open.
#[derive(Default)]
pub struct Configuration {
    properties: BoltProperties,
    data_source: Arc<DataSource>,
}

impl Configuration {
    pub fn new(properties: BoltProperties) -> Self {
        Self {
            properties,
            data_source: Arc::new(DataSource::new()),
        }
    }

    pub fn properties(&self) -> &BoltProperties {
        &self.properties
    }

    /// The data source owned by this configuration; the same instance on every call.
    pub fn data_source(&self) -> Arc<DataSource> {
        Arc::clone(&self.data_source)
    }

    /// Opens the store if needed and returns a repository over it.
    ///
    /// Never fails: when the store cannot be opened the error is logged and
    /// the returned repository reports it on first use.
    pub async fn repository(&self) -> Repository {
        if !self.data_source.is_opened().await {
            if let Err(err) = self.data_source.open(&self.properties).await {
                tracing::error!(error = %err, "Failed to open the bolt data source.");
                return Repository::unavailable(self.data_source(), err);
            }
        }
        Repository::new(self.data_source())
    }
}
