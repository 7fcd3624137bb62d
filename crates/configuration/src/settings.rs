use humantime::parse_duration;
use crate::error::ConfigError;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// The root configuration structure: one section per starter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gorm: GormProperties,
    pub bolt: BoltProperties,
}

impl Settings {
    /// Checks every value the starters parse lazily, so that a bad
    /// configuration is reported at startup rather than on first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gorm.validate()?;
        self.bolt.validate()
    }
}

/// Connection and pool settings of the relational data source.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct GormProperties {
    /// The driver type handed to the connector (e.g. "mysql").
    #[serde(rename = "type")]
    pub driver_type: String,
    pub host: String,
    /// Kept as a string, it is rendered into the DSN verbatim.
    pub port: String,
    /// Dashes are turned into underscores in the DSN.
    pub database: String,
    pub username: String,
    /// Plain text, or RSA-encrypted base64 when `config.decrypt` is set.
    pub password: String,
    pub charset: String,
    pub parse_time: bool,
    /// Location used by the driver to interpret time values (e.g. "Asia/Shanghai").
    pub loc: String,
    pub config: DecryptConfig,

    /// Number of idle connections the pool keeps warm.
    pub max_idle_conns: u32,
    /// Upper bound on open connections. Zero leaves the driver default in place.
    pub max_open_conns: u32,
    /// Maximum time a connection may be reused, e.g. "1h". "0s" means unlimited.
    pub conn_max_lifetime: String,

    /// Retry the initial connection when it fails.
    pub auto_reconnect: bool,
    /// Number of retries after the first failed attempt. `-1` retries forever.
    pub retry_times: i32,
    /// Delay between two connection attempts, e.g. "5s".
    pub interval: String,
}

/// Password decryption switch for [`GormProperties`].
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct DecryptConfig {
    pub decrypt: bool,
    /// PEM encoded RSA private key.
    pub decrypt_key: String,
}

impl Default for GormProperties {
    fn default() -> Self {
        Self {
            driver_type: "mysql".to_string(),
            host: "localhost".to_string(),
            port: "3306".to_string(),
            database: String::new(),
            username: String::new(),
            password: String::new(),
            charset: "utf8".to_string(),
            parse_time: true,
            loc: "Local".to_string(),
            config: DecryptConfig::default(),
            max_idle_conns: 10,
            max_open_conns: 100,
            conn_max_lifetime: "1h".to_string(),
            auto_reconnect: false,
            retry_times: 0,
            interval: "5s".to_string(),
        }
    }
}

impl GormProperties {
    pub fn conn_max_lifetime(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.conn_max_lifetime).map_err(|source| ConfigError::InvalidDuration {
            field: "conn_max_lifetime",
            source,
        })
    }

    pub fn interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.interval).map_err(|source| ConfigError::InvalidDuration {
            field: "interval",
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.conn_max_lifetime()?;
        if self.auto_reconnect {
            self.interval()?;
        }
        if self.retry_times < -1 {
            return Err(ConfigError::ValidationError(format!(
                "gorm.retry_times must be -1 (unlimited) or greater, got {}",
                self.retry_times
            )));
        }
        if self.config.decrypt && self.config.decrypt_key.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "gorm.config.decrypt_key must be set when gorm.config.decrypt is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

// The password and the private key must never end up in logs.
impl fmt::Debug for GormProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GormProperties")
            .field("type", &self.driver_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("charset", &self.charset)
            .field("parse_time", &self.parse_time)
            .field("loc", &self.loc)
            .field("config", &self.config)
            .field("max_idle_conns", &self.max_idle_conns)
            .field("max_open_conns", &self.max_open_conns)
            .field("conn_max_lifetime", &self.conn_max_lifetime)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("retry_times", &self.retry_times)
            .field("interval", &self.interval)
            .finish()
    }
}

impl fmt::Debug for DecryptConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptConfig")
            .field("decrypt", &self.decrypt)
            .field("decrypt_key", &if self.decrypt_key.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// Settings of the embedded key-value store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoltProperties {
    /// Path of the store file. Created, with its parent directories, when missing.
    pub database: PathBuf,
    /// Unix permission bits applied to the store file. Accepts `0o600`, `"0600"` or `384`.
    #[serde(deserialize_with = "deserialize_file_mode")]
    pub mode: u32,
    /// Seconds to wait for a locked store before giving up. Zero keeps the driver default.
    pub timeout: i64,
}

impl Default for BoltProperties {
    fn default() -> Self {
        Self {
            database: PathBuf::from("bolt.db"),
            mode: 0o600,
            timeout: 1,
        }
    }
}

impl BoltProperties {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "bolt.database must not be empty".to_string(),
            ));
        }
        if self.mode > 0o7777 {
            return Err(ConfigError::ValidationError(format!(
                "bolt.mode {:o} is not a valid permission mask",
                self.mode
            )));
        }
        Ok(())
    }
}

fn deserialize_file_mode<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    struct ModeVisitor;

    impl Visitor<'_> for ModeVisitor {
        type Value = u32;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a file mode as an integer or an octal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u32, E> {
            u32::try_from(v).map_err(|_| E::custom(format!("file mode {v} is out of range")))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u32, E> {
            u32::try_from(v).map_err(|_| E::custom(format!("file mode {v} is out of range")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u32, E> {
            let digits = v.trim();
            let digits = digits.strip_prefix("0o").unwrap_or(digits);
            u32::from_str_radix(digits, 8)
                .map_err(|_| E::custom(format!("invalid octal file mode \"{v}\"")))
        }
    }

    deserializer.deserialize_any(ModeVisitor)
}
