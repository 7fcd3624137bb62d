use crate::connector::{Connector, SqlxConnector};
use crate::data_source::DataSource;
use crate::error::DataSourceError;
use configuration::GormProperties;
use std::sync::Arc;

/// Name of the configuration section read by this starter.
pub const PROFILE: &str = "gorm";

/// Binds [`GormProperties`] to the data source they open.
///
/// The data source is created with the configuration and opened on the
/// first call to [`Configuration::repository`].
pub struct Configuration<C: Connector = SqlxConnector> {
    properties: GormProperties,
    data_source: Arc<DataSource<C>>,
}

impl Configuration<SqlxConnector> {
    pub fn new(properties: GormProperties) -> Self {
        Self::with_connector(properties, SqlxConnector)
    }
}

impl<C: Connector> Configuration<C> {
    pub fn with_connector(properties: GormProperties, connector: C) -> Self {
        Self {
            properties,
            data_source: Arc::new(DataSource::new(connector)),
        }
    }

    pub fn properties(&self) -> &GormProperties {
        &self.properties
    }

    /// The data source owned by this configuration; the same instance on every call.
    pub fn data_source(&self) -> Arc<DataSource<C>> {
        Arc::clone(&self.data_source)
    }

    /// Opens the data source if needed and returns its repository.
    pub async fn repository(&self) -> Result<C::Repository, DataSourceError> {
        if !self.data_source.is_opened().await {
            self.data_source
                .open(&self.properties)
                .await
                .inspect_err(|e| tracing::error!(error = %e, "Failed to open the gorm data source."))?;
        }
        self.data_source
            .repository()
            .await
            .ok_or(DataSourceError::NotOpened)
    }
}
