//! Connection descriptors
//!
//! A descriptor is written as `<provider>:<data source>`:
//!
//! - `sqlite:plant.db` - a database file path
//! - `sqlserver:Server=tcp:db01,1433;Database=Plant;User ID=ingest;Password=...`
//!
//! SQL Server credentials are lifted out of the ADO string so that the data
//! source can be logged and put into error context without leaking them.

use ctrlsnap_core::errors::{ExError, ExErrorKind};
use ctrlsnap_core_types::Sensitive;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::errors::Result;

/// Storage backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Sqlite,
    SqlServer,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Sqlite => "sqlite",
            Provider::SqlServer => "sqlserver",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ExError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Provider::Sqlite),
            "sqlserver" | "mssql" => Ok(Provider::SqlServer),
            other => Err(ExError::new(ExErrorKind::Configuration)
                .with_op("parse_provider")
                .with_message(format!("unrecognized provider '{}'", other))),
        }
    }
}

/// SQL authentication credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: Sensitive<String>,
}

/// Immutable description of which backend to use and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub provider: Provider,
    pub data_source: String,
    pub credentials: Option<Credentials>,
}

impl ConnectionDescriptor {
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            provider: Provider::Sqlite,
            data_source: path.into(),
            credentials: None,
        }
    }

    /// Parse a `<provider>:<data source>` descriptor.
    ///
    /// # Errors
    ///
    /// `Configuration` for a missing separator, an unrecognized provider or
    /// an empty data source.
    pub fn parse(text: &str) -> Result<Self> {
        let (provider, rest) = text.split_once(':').ok_or_else(|| {
            config_error("expected '<provider>:<data source>', e.g. 'sqlite:plant.db'")
        })?;
        let provider: Provider = provider.parse()?;
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(config_error("data source is empty"));
        }

        match provider {
            Provider::Sqlite => Ok(Self::sqlite(rest)),
            Provider::SqlServer => {
                let mut pairs = parse_ado(rest)?;
                let user = take_key(&mut pairs, &["user id", "uid", "user", "username"]);
                let password = take_key(&mut pairs, &["password", "pwd"]);
                let credentials = match (user, password) {
                    (Some(user), password) => Some(Credentials {
                        user,
                        password: Sensitive::new(password.unwrap_or_default()),
                    }),
                    (None, Some(_)) => {
                        return Err(config_error("password given without a user id"));
                    }
                    (None, None) => None,
                };
                let data_source = pairs
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(";");
                Ok(Self {
                    provider,
                    data_source,
                    credentials,
                })
            }
        }
    }

    /// Look up a key of a SQL Server data source (case-insensitive)
    pub fn ado_value(&self, keys: &[&str]) -> Option<String> {
        parse_ado(&self.data_source).ok().and_then(|mut pairs| take_key(&mut pairs, keys))
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.data_source)
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = ExError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn config_error(message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::Configuration)
        .with_op("parse_connection")
        .with_message(message)
}

fn parse_ado(text: &str) -> Result<Vec<(String, String)>> {
    text.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (k, v) = part
                .split_once('=')
                .ok_or_else(|| config_error(format!("malformed connection string part '{}'", part)))?;
            Ok((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

fn take_key(pairs: &mut Vec<(String, String)>, keys: &[&str]) -> Option<String> {
    let idx = pairs
        .iter()
        .position(|(k, _)| keys.iter().any(|want| k.eq_ignore_ascii_case(want)))?;
    Some(pairs.remove(idx).1)
}
