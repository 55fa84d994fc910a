//! `import <FILE>`: synchronous single-file import
//!
//! Runs the same parse → guard → import sequence as the queue workers but
//! leaves the file in place.

use clap::Args;
use ctrlsnap_core::model::SourceDescriptor;
use ctrlsnap_core::DefaultParser;
use ctrlsnap_engine::IngestEngine;
use ctrlsnap_store::ImportOutcome;
use std::path::PathBuf;
use std::sync::Arc;

use super::{Context, ImportFlags};

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Project export (.L5X or .ACD)
    pub file: PathBuf,

    #[command(flatten)]
    pub flags: ImportFlags,
}

pub async fn execute(ctx: &Context, args: ImportArgs) -> anyhow::Result<()> {
    let mut source = SourceDescriptor::from_path(&args.file)?;
    for (key, value) in &args.flags.metadata {
        source = source.with_metadata(key, value);
    }

    let engine = IngestEngine::new(
        ctx.database.clone(),
        Arc::new(DefaultParser),
        ctx.ingest_options(&args.flags),
    );
    let outcome = engine.ingest(&source).await?;

    ctx.emit(&outcome, || match &outcome {
        ImportOutcome::Imported {
            snapshot_id,
            rows,
            superseded,
        } => format!(
            "Imported {} as snapshot {} ({} rows, {} prior snapshot(s) superseded)",
            source.file_name,
            snapshot_id,
            rows.values().sum::<usize>(),
            superseded
        ),
        ImportOutcome::Unchanged { snapshot_id } => format!(
            "{} is unchanged since snapshot {}; nothing imported",
            source.file_name, snapshot_id
        ),
    })
}
