use crate::error::ConfigError;
use crate::settings::Settings;
use std::collections::HashMap;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use humantime::{parse_duration, DurationError};
pub use settings::{BoltProperties, DecryptConfig, GormProperties};

/// Prefix of the environment variables that override file values,
/// e.g. `STARTER_GORM__HOST` or `STARTER_BOLT__DATABASE`.
pub const ENV_PREFIX: &str = "STARTER";

/// Loads the starter configuration from `path` (if the file exists) and the
/// process environment.
///
/// Every field has a default, so a missing file is not an error. Environment
/// variables take precedence over the file. The result is validated before it
/// is returned.
pub fn load_config(path: &Path) -> Result<Settings, ConfigError> {
    load_config_with_env(path, None)
}

/// Same as [`load_config`], but reads the environment overrides from `env`
/// instead of the process environment when it is given.
pub fn load_config_with_env(
    path: &Path,
    env: Option<HashMap<String, String>>,
) -> Result<Settings, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
        .build()?;

    // Attempt to deserialize the entire configuration into our `Settings` struct
    let settings = builder.try_deserialize::<Settings>()?;
    settings.validate()?;

    tracing::debug!(gorm = ?settings.gorm, bolt = ?settings.bolt, "Configuration loaded.");
    Ok(settings)
}
