use crate::error::DataSourceError;
use configuration::GormProperties;
use std::fmt;
use std::str::FromStr;

/// A MySQL data source name in the driver's native form:
///
/// `user:password@tcp(host:port)/db_name?charset=X&parseTime=True|False&loc=<loc>`
///
/// `Display` renders exactly that string, with `/` in `loc` written as `%2F`.
#[derive(Clone, PartialEq, Eq)]
pub struct Dsn {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: String,
    pub database: String,
    pub charset: String,
    pub parse_time: bool,
    pub loc: String,
}

impl Dsn {
    /// Builds the DSN for `properties`, using `password` in place of the
    /// configured one (which may still be encrypted).
    pub fn from_properties(properties: &GormProperties, password: String) -> Self {
        Self {
            username: properties.username.clone(),
            password,
            host: properties.host.clone(),
            port: properties.port.clone(),
            database: properties.database.replace('-', "_"),
            charset: properties.charset.clone(),
            parse_time: properties.parse_time,
            loc: properties.loc.clone(),
        }
    }

    /// A rendering that is safe to log.
    pub fn redacted(&self) -> Redacted<'_> {
        Redacted(self)
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, password: &str) -> fmt::Result {
        write!(
            f,
            "{}:{}@tcp({}:{})/{}?charset={}&parseTime={}&loc={}",
            self.username,
            password,
            self.host,
            self.port,
            self.database,
            self.charset,
            if self.parse_time { "True" } else { "False" },
            self.loc.replace('/', "%2F"),
        )
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, &self.password)
    }
}

impl fmt::Debug for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dsn({})", self.redacted())
    }
}

pub struct Redacted<'a>(&'a Dsn);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.write(f, "***")
    }
}

impl FromStr for Dsn {
    type Err = DataSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |what: &str| DataSourceError::InvalidDsn(what.to_string());

        // The password may itself contain '@' or ':', so anchor on the last "@tcp(".
        let at = s.rfind("@tcp(").ok_or_else(|| malformed("missing \"@tcp(\""))?;
        let (userinfo, rest) = (&s[..at], &s[at + "@tcp(".len()..]);
        let (username, password) = userinfo.split_once(':').unwrap_or((userinfo, ""));

        let (address, rest) = rest
            .split_once(")/")
            .ok_or_else(|| malformed("missing \")/\" after the address"))?;
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| malformed("address must be host:port"))?;

        let (database, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut dsn = Dsn {
            username: username.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port: port.to_string(),
            database: database.to_string(),
            charset: String::new(),
            parse_time: false,
            loc: String::new(),
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "charset" => dsn.charset = value.to_string(),
                "parseTime" => dsn.parse_time = matches!(value, "True" | "true" | "1"),
                "loc" => {
                    dsn.loc = urlencoding::decode(value)
                        .map_err(|_| malformed("loc is not valid percent-encoded UTF-8"))?
                        .into_owned()
                }
                // Other driver parameters are accepted and ignored.
                _ => {}
            }
        }

        Ok(dsn)
    }
}
