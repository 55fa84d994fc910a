//! Provider union
//!
//! `Database` is the only entry point the engine and CLI use. Every method
//! is an exhaustive match over the closed set of backends; a new provider
//! is a new variant plus its catalog.

use ctrlsnap_core::diff::KeyedHash;
use ctrlsnap_core::errors::{ExError, ExErrorKind};
use ctrlsnap_core::model::{SnapshotSummary, TargetKey};
use ctrlsnap_core::{log_op_end, log_op_error, log_op_start};
use std::time::Instant;

use crate::connection::{ConnectionDescriptor, Provider};
use crate::errors::Result;
use crate::import::{ImportOptions, ImportOutcome, ImportPlan};
use crate::lifecycle::DatabaseStatus;
use crate::migrations::{Catalog, SchemaState};
use crate::sqlite::SqliteDatabase;
use crate::sqlserver::SqlServerDatabase;
use crate::table_map::table_map;

#[derive(Debug, Clone)]
pub enum Database {
    Sqlite(SqliteDatabase),
    SqlServer(SqlServerDatabase),
}

macro_rules! dispatch {
    ($self:ident, $db:ident => $call:expr) => {
        match $self {
            Database::Sqlite($db) => $call,
            Database::SqlServer($db) => $call,
        }
    };
}

impl Database {
    /// Resolve a descriptor to its backend with the embedded catalog.
    ///
    /// # Errors
    ///
    /// `Configuration` for an unusable descriptor.
    pub fn resolve(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let catalog = Catalog::for_provider(descriptor.provider)?;
        Self::with_catalog(descriptor, catalog)
    }

    /// Resolve a descriptor with an explicit catalog.
    ///
    /// # Errors
    ///
    /// `Configuration` when the catalog belongs to another provider or the
    /// descriptor is unusable.
    pub fn with_catalog(descriptor: &ConnectionDescriptor, catalog: Catalog) -> Result<Self> {
        if catalog.provider() != descriptor.provider {
            return Err(ExError::new(ExErrorKind::Configuration)
                .with_op("resolve")
                .with_message(format!(
                    "{} catalog cannot govern a {} database",
                    catalog.provider(),
                    descriptor.provider
                )));
        }
        match descriptor.provider {
            Provider::Sqlite => Ok(Database::Sqlite(SqliteDatabase::new(
                &descriptor.data_source,
                catalog,
            ))),
            Provider::SqlServer => Ok(Database::SqlServer(SqlServerDatabase::new(
                descriptor.clone(),
                catalog,
            )?)),
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            Database::Sqlite(_) => Provider::Sqlite,
            Database::SqlServer(_) => Provider::SqlServer,
        }
    }

    /// Human-readable data source, safe to log
    pub fn data_source(&self) -> String {
        match self {
            Database::Sqlite(db) => db.path().display().to_string(),
            Database::SqlServer(db) => db.data_source().to_string(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        dispatch!(self, db => db.catalog())
    }

    /// Create and initialize a brand-new database; returns applied versions.
    ///
    /// # Errors
    ///
    /// `MigrationRequired` when the database already has an outdated
    /// history, `Provider` when a script fails.
    pub async fn build(&self) -> Result<Vec<i64>> {
        let start = Instant::now();
        let data_source = self.data_source();
        log_op_start!("build", data_source = %data_source);
        let result = dispatch!(self, db => db.build().await);
        log_result("build", &data_source, start, &result);
        result
    }

    /// Apply pending migrations, creating the database if absent.
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` or the first failing unit's `Provider` error.
    pub async fn migrate(&self) -> Result<Vec<i64>> {
        let start = Instant::now();
        let data_source = self.data_source();
        log_op_start!("migrate", data_source = %data_source);
        let result = dispatch!(self, db => db.migrate().await);
        log_result("migrate", &data_source, start, &result);
        result
    }

    /// Revert applied migrations above `to_version`, newest first.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when a unit has no down script.
    pub async fn revert(&self, to_version: i64) -> Result<Vec<i64>> {
        let start = Instant::now();
        let data_source = self.data_source();
        log_op_start!("revert", data_source = %data_source, migration_version = to_version);
        let result = dispatch!(self, db => db.revert(to_version).await);
        log_result("revert", &data_source, start, &result);
        result
    }

    /// Recorded history; `None` when the database was never built.
    ///
    /// # Errors
    ///
    /// `Provider` when the database cannot be read.
    pub async fn schema_state(&self) -> Result<Option<SchemaState>> {
        dispatch!(self, db => db.schema_state().await)
    }

    /// Current lifecycle state, checksums verified.
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` when history disagrees with the catalog.
    pub async fn status(&self) -> Result<DatabaseStatus> {
        let state = self.schema_state().await?;
        if let Some(state) = &state {
            state
                .verify(self.catalog())
                .map_err(|e| e.with_data_source(self.data_source()))?;
        }
        Ok(DatabaseStatus::from_state(state.as_ref(), self.catalog()))
    }

    /// Fail unless every catalog unit is applied.
    ///
    /// # Errors
    ///
    /// `MigrationRequired` naming the data source.
    pub async fn ensure_current(&self) -> Result<()> {
        self.status()
            .await?
            .require_current("ensure_current", &self.data_source())
    }

    /// Write a planned snapshot atomically.
    ///
    /// The lifecycle guard is re-evaluated inside the write transaction.
    ///
    /// # Errors
    ///
    /// `MigrationRequired` before any write, `Provider` after rollback.
    pub async fn import(&self, plan: ImportPlan, options: ImportOptions) -> Result<ImportOutcome> {
        let start = Instant::now();
        let target = plan.target();
        let row_count = plan.row_count();
        log_op_start!(
            "import",
            target_type = %target.target_type,
            target_name = %target.target_name,
            row_count = row_count,
            action = %options.action
        );

        let result = dispatch!(self, db => db.import(plan, options).await);

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => log_op_end!(
                "import",
                duration_ms = duration_ms,
                snapshot_id = outcome.snapshot_id(),
                row_count = outcome.total_rows(),
                target_name = %target.target_name
            ),
            Err(e) => log_op_error!(
                "import",
                e.clone(),
                duration_ms = duration_ms,
                target_name = %target.target_name
            ),
        }
        result.map_err(|e| e.with_target(target.to_string()))
    }

    /// The newest snapshot of `target` that nothing supersedes.
    ///
    /// # Errors
    ///
    /// `MigrationRequired` on an unbuilt or outdated database.
    pub async fn current_snapshot(&self, target: &TargetKey) -> Result<Option<SnapshotSummary>> {
        dispatch!(self, db => db.current_snapshot(target).await)
    }

    /// Every retained snapshot of `target`, oldest first.
    ///
    /// # Errors
    ///
    /// `MigrationRequired` on an unbuilt or outdated database.
    pub async fn snapshots(&self, target: &TargetKey) -> Result<Vec<SnapshotSummary>> {
        dispatch!(self, db => db.snapshots(target).await)
    }

    /// Natural keys and record hashes of one table's rows in a snapshot.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a table without a map.
    pub async fn record_keys(&self, table: &str, snapshot_id: i64) -> Result<Vec<KeyedHash>> {
        let map = table_map(table)?;
        dispatch!(self, db => db.record_keys(map, snapshot_id).await)
    }
}

fn log_result(op: &str, data_source: &str, start: Instant, result: &Result<Vec<i64>>) {
    let duration_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(versions) => log_op_end!(
            op,
            duration_ms = duration_ms,
            data_source = %data_source,
            row_count = versions.len()
        ),
        Err(e) => log_op_error!(op, e.clone(), duration_ms = duration_ms, data_source = %data_source),
    }
}
