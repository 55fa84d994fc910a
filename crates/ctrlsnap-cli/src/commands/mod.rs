//! Command implementations and shared context

pub mod database;
pub mod import;
pub mod ingest;
pub mod schema;

use clap::Args;
use ctrlsnap_core::errors::{ExError, ExErrorKind};
use ctrlsnap_core::logging_facility;
use ctrlsnap_core::model::SnapshotAction;
use ctrlsnap_engine::{EngineConfig, IngestOptions};
use ctrlsnap_store::Database;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Connection descriptor, e.g. `sqlite:plant.db` (overrides configuration)
    #[arg(long, global = true)]
    pub connection: Option<String>,

    /// TOML configuration file (overrides CTRLSNAP_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

/// Options shared by `import` and `ingest`
#[derive(Debug, Args)]
pub struct ImportFlags {
    /// What happens to prior snapshots of the same target
    #[arg(long)]
    pub action: Option<SnapshotAction>,

    /// Skip sources identical to the target's current snapshot
    #[arg(long)]
    pub skip_unchanged: bool,

    /// Caller metadata as KEY=VALUE (repeatable)
    #[arg(long = "meta", value_parser = parse_key_val)]
    pub metadata: Vec<(String, String)>,
}

pub struct Context {
    pub config: EngineConfig,
    pub database: Database,
    pub json: bool,
}

impl Context {
    /// Resolve configuration, start logging and pick the database backend
    pub fn load(global: &GlobalArgs) -> Result<Self, ExError> {
        let mut config = EngineConfig::load_from(global.config.as_deref())?;
        if let Some(connection) = &global.connection {
            config.database.connection = connection.clone();
            config.validate()?;
        }
        logging_facility::init(config.logging.profile);

        let database = Database::resolve(&config.database.descriptor()?)?;
        Ok(Self {
            config,
            database,
            json: global.json,
        })
    }

    pub fn ingest_options(&self, flags: &ImportFlags) -> IngestOptions {
        let mut import = self.config.import.clone();
        if let Some(action) = flags.action {
            import.action = action;
        }
        if flags.skip_unchanged {
            import.skip_unchanged = true;
        }
        import.ingest_options()
    }

    /// Print `value` as JSON with `--json`, otherwise the human line
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce() -> String) -> anyhow::Result<()> {
        if self.json {
            let json = serde_json::to_string_pretty(value)
                .map_err(|e| ExError::from(e).with_op("emit"))?;
            println!("{}", json);
        } else {
            println!("{}", human());
        }
        Ok(())
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), ExError> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ExError::new(ExErrorKind::InvalidInput)
            .with_op("parse_metadata")
            .with_message(format!("expected KEY=VALUE, got '{}'", s))),
    }
}
