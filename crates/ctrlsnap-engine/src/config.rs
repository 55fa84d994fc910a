//! Configuration management
//!
//! Resolution order: `.env` (dotenvy) → optional TOML file named by
//! `CTRLSNAP_CONFIG` → individual `CTRLSNAP_*` environment overrides →
//! `validate()`. Any invalid value is a `Configuration` error and is fatal
//! to startup.

use ctrlsnap_core::errors::{ExError, ExErrorKind, Result};
use ctrlsnap_core::logging_facility::Profile;
use ctrlsnap_core::model::{ImportProvenance, SnapshotAction};
use ctrlsnap_store::{ConnectionDescriptor, ImportOptions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::engine::IngestOptions;

/// Default connection descriptor for local use.
pub const DEFAULT_CONNECTION: &str = "sqlite:ctrlsnap.db";

/// Default bound of each ingestion queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

pub const ENV_CONFIG_FILE: &str = "CTRLSNAP_CONFIG";
pub const ENV_CONNECTION: &str = "CTRLSNAP_CONNECTION";
pub const ENV_SNAPSHOT_ACTION: &str = "CTRLSNAP_SNAPSHOT_ACTION";
pub const ENV_QUEUE_CAPACITY: &str = "CTRLSNAP_QUEUE_CAPACITY";
pub const ENV_BACKPRESSURE: &str = "CTRLSNAP_BACKPRESSURE";
pub const ENV_STORE_SOURCE_DATA: &str = "CTRLSNAP_STORE_SOURCE_DATA";
pub const ENV_SKIP_UNCHANGED: &str = "CTRLSNAP_SKIP_UNCHANGED";
pub const ENV_IMPORT_USER: &str = "CTRLSNAP_IMPORT_USER";
pub const ENV_IMPORT_MACHINE: &str = "CTRLSNAP_IMPORT_MACHINE";
pub const ENV_LOG_PROFILE: &str = "CTRLSNAP_LOG_PROFILE";

fn config_error(message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::Configuration)
        .with_op("load_config")
        .with_message(message)
}

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub import: ImportConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlserver:<ADO connection string>`
    pub connection: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection: DEFAULT_CONNECTION.to_string(),
        }
    }
}

impl DatabaseConfig {
    /// # Errors
    ///
    /// `Configuration` for an unrecognized provider or malformed descriptor.
    pub fn descriptor(&self) -> Result<ConnectionDescriptor> {
        self.connection.parse()
    }
}

// The raw connection string may carry a password.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self
            .descriptor()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "<invalid>".to_string());
        f.debug_struct("DatabaseConfig")
            .field("connection", &shown)
            .finish()
    }
}

/// Per-import behavior
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub action: SnapshotAction,
    /// Keep the raw source bytes in `snapshot.source_data`
    pub store_source_data: bool,
    /// Commit nothing when the source equals the current snapshot
    pub skip_unchanged: bool,
    /// Overrides the login user recorded on snapshots
    pub import_user: Option<String>,
    /// Overrides the host name recorded on snapshots
    pub import_machine: Option<String>,
}

impl ImportConfig {
    pub fn provenance(&self) -> ImportProvenance {
        let detected = ImportProvenance::from_env();
        ImportProvenance {
            user: self.import_user.clone().unwrap_or(detected.user),
            machine: self.import_machine.clone().unwrap_or(detected.machine),
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            import: ImportOptions {
                action: self.action,
                skip_unchanged: self.skip_unchanged,
            },
            provenance: self.provenance(),
            store_source_data: self.store_source_data,
        }
    }
}

/// Queue bound; `unbounded` or a positive item count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CapacitySetting", into = "CapacitySetting")]
pub enum QueueCapacity {
    Unbounded,
    Bounded(usize),
}

impl Default for QueueCapacity {
    fn default() -> Self {
        QueueCapacity::Bounded(DEFAULT_QUEUE_CAPACITY)
    }
}

impl FromStr for QueueCapacity {
    type Err = ExError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(QueueCapacity::Unbounded);
        }
        match s.parse::<usize>() {
            Ok(0) => Err(config_error("queue capacity must be greater than 0")),
            Ok(n) => Ok(QueueCapacity::Bounded(n)),
            Err(_) => Err(config_error(format!(
                "invalid queue capacity '{}': expected 'unbounded' or a positive number",
                s
            ))),
        }
    }
}

impl fmt::Display for QueueCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueCapacity::Unbounded => f.write_str("unbounded"),
            QueueCapacity::Bounded(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CapacitySetting {
    Count(usize),
    Word(String),
}

impl TryFrom<CapacitySetting> for QueueCapacity {
    type Error = ExError;

    fn try_from(setting: CapacitySetting) -> Result<Self> {
        match setting {
            CapacitySetting::Count(0) => Err(config_error("queue capacity must be greater than 0")),
            CapacitySetting::Count(n) => Ok(QueueCapacity::Bounded(n)),
            CapacitySetting::Word(word) => word.parse(),
        }
    }
}

impl From<QueueCapacity> for CapacitySetting {
    fn from(capacity: QueueCapacity) -> Self {
        match capacity {
            QueueCapacity::Unbounded => CapacitySetting::Word("unbounded".to_string()),
            QueueCapacity::Bounded(n) => CapacitySetting::Count(n),
        }
    }
}

/// What a full bounded queue does to a new submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Fail the submission with `QueueFull`
    Reject,
    /// Wait for space
    #[default]
    Block,
}

impl FromStr for Backpressure {
    type Err = ExError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Backpressure::Reject),
            "block" => Ok(Backpressure::Block),
            other => Err(config_error(format!(
                "unknown backpressure '{}': expected 'reject' or 'block'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: QueueCapacity,
    pub backpressure: Backpressure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub profile: Profile,
}

impl EngineConfig {
    /// Load configuration from `.env`, an optional TOML file and the
    /// process environment.
    ///
    /// # Errors
    ///
    /// `Configuration` for an unreadable file or any invalid value.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`EngineConfig::load`], with `config_file` taking the place of
    /// `CTRLSNAP_CONFIG` when given.
    ///
    /// # Errors
    ///
    /// `Configuration` for an unreadable file or any invalid value.
    pub fn load_from(config_file: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let config_file = config_file.map(|p| p.display().to_string());
        Self::from_lookup(|key| match (key, &config_file) {
            (ENV_CONFIG_FILE, Some(path)) => Some(path.clone()),
            _ => std::env::var(key).ok(),
        })
    }

    /// Same as [`EngineConfig::load`] with an explicit variable lookup.
    ///
    /// # Errors
    ///
    /// `Configuration` for an unreadable file or any invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CONFIG_FILE).filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// `Configuration` when the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            config_error(format!("cannot read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
            .map_err(|e| config_error(format!("{} ({})", e.message(), path.display())))
    }

    /// # Errors
    ///
    /// `Configuration` for invalid TOML or unknown values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| config_error(format!("invalid config: {}", e)))
    }

    fn apply_overrides<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(connection) = get(ENV_CONNECTION) {
            self.database.connection = connection;
        }
        if let Some(action) = get(ENV_SNAPSHOT_ACTION) {
            self.import.action = action.parse()?;
        }
        if let Some(flag) = get(ENV_STORE_SOURCE_DATA) {
            self.import.store_source_data = parse_flag(ENV_STORE_SOURCE_DATA, &flag)?;
        }
        if let Some(flag) = get(ENV_SKIP_UNCHANGED) {
            self.import.skip_unchanged = parse_flag(ENV_SKIP_UNCHANGED, &flag)?;
        }
        if let Some(user) = get(ENV_IMPORT_USER) {
            self.import.import_user = Some(user);
        }
        if let Some(machine) = get(ENV_IMPORT_MACHINE) {
            self.import.import_machine = Some(machine);
        }
        if let Some(capacity) = get(ENV_QUEUE_CAPACITY) {
            self.queue.capacity = capacity.parse()?;
        }
        if let Some(backpressure) = get(ENV_BACKPRESSURE) {
            self.queue.backpressure = backpressure.parse()?;
        }
        if let Some(profile) = get(ENV_LOG_PROFILE) {
            self.logging.profile = profile.parse::<Profile>().map_err(config_error)?;
        }
        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// `Configuration` naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.database.connection.trim().is_empty() {
            return Err(config_error("database connection cannot be empty"));
        }
        self.database.descriptor()?;

        if self.queue.capacity == QueueCapacity::Bounded(0) {
            return Err(config_error("queue capacity must be greater than 0"));
        }

        for (name, value) in [
            ("import_user", &self.import.import_user),
            ("import_machine", &self.import.import_machine),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(config_error(format!("{} cannot be blank", name)));
            }
        }
        Ok(())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(config_error(format!("{} must be a boolean, got '{}'", key, other))),
    }
}
