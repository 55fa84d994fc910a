//! Ingestion orchestration
//!
//! ## Sequence for one source:
//! 1. Read the file (async I/O)
//! 2. Parse and project on the blocking pool; a parse failure is `Format`
//! 3. Acquire the per-target lock
//! 4. `Database::import`, which re-checks the lifecycle guard inside its
//!    transaction and commits or rolls back before returning
//!
//! The lock is released only after step 4 completes.

use ctrlsnap_core::errors::{ExError, ExErrorKind, Result};
use ctrlsnap_core::model::{ImportProvenance, SnapshotHeader, SourceDescriptor};
use ctrlsnap_core::parser::ProjectParser;
use ctrlsnap_store::{Database, ImportOptions, ImportOutcome, ImportPlan};
use std::sync::Arc;

use crate::target_lock::TargetLocks;

/// Metadata key that overrides the recorded import user for one source
pub const METADATA_IMPORT_USER: &str = "import_user";

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    pub import: ImportOptions,
    pub provenance: ImportProvenance,
    pub store_source_data: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            import: ImportOptions::default(),
            provenance: ImportProvenance::from_env(),
            store_source_data: false,
        }
    }
}

pub struct IngestEngine {
    database: Database,
    parser: Arc<dyn ProjectParser>,
    options: IngestOptions,
    locks: TargetLocks,
}

impl IngestEngine {
    pub fn new(database: Database, parser: Arc<dyn ProjectParser>, options: IngestOptions) -> Self {
        Self {
            database,
            parser,
            options,
            locks: TargetLocks::new(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Parse one source and commit it as a snapshot.
    ///
    /// The source file is left in place; queue workers remove it.
    ///
    /// # Errors
    ///
    /// - `NotFound`/`Io` when the file cannot be read
    /// - `Format` when the parser rejects it
    /// - `Projection` when elements cannot be mapped to rows
    /// - `MigrationRequired` when the database is not current
    /// - `Provider` when the write fails (nothing committed)
    pub async fn ingest(&self, source: &SourceDescriptor) -> Result<ImportOutcome> {
        self.ingest_inner(source)
            .await
            .map_err(|e| e.with_source_id(source.source_id.clone()))
    }

    async fn ingest_inner(&self, source: &SourceDescriptor) -> Result<ImportOutcome> {
        let bytes = tokio::fs::read(&source.storage_path).await.map_err(|e| {
            let err = ExError::from(e).with_op("read_source");
            let message = format!("{} ({})", err.message(), source.storage_path.display());
            err.with_message(message)
        })?;

        let provenance = self.provenance_for(source);
        let keep_source_data = self.options.store_source_data;
        let parser = Arc::clone(&self.parser);
        let kind = source.file_kind;

        let plan = tokio::task::spawn_blocking(move || {
            let project = parser.parse(kind, &bytes)?;
            let header = SnapshotHeader::new(&project.export, &bytes, &provenance, keep_source_data);
            ImportPlan::build(&project, header)
        })
        .await
        .map_err(|e| {
            ExError::new(ExErrorKind::Internal)
                .with_op("parse")
                .with_message(format!("parser task failed: {}", e))
        })??;

        let target = plan.target();
        tracing::debug!(
            target = %target,
            row_count = plan.row_count(),
            file_name = %source.file_name,
            "Source parsed"
        );

        let _guard = self.locks.acquire(&target).await;
        self.database.import(plan, self.options.import).await
    }

    fn provenance_for(&self, source: &SourceDescriptor) -> ImportProvenance {
        let mut provenance = self.options.provenance.clone();
        if let Some(user) = source
            .metadata
            .get(METADATA_IMPORT_USER)
            .filter(|u| !u.trim().is_empty())
        {
            provenance.user = user.clone();
        }
        provenance
    }
}

impl std::fmt::Debug for IngestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestEngine")
            .field("database", &self.database.data_source())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
