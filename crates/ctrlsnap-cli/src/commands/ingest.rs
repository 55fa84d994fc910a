//! `ingest <FILES>...`: run files through the ingestion pipeline
//!
//! Each file is copied into a staging directory first; the workers own and
//! delete the copies. Ctrl-C stops the workers after their current item.

use clap::{Args, ValueEnum};
use ctrlsnap_core::errors::{ExError, ExErrorKind};
use ctrlsnap_core::model::SourceDescriptor;
use ctrlsnap_core::DefaultParser;
use ctrlsnap_engine::{IngestEngine, IngestPipeline, IngestSender, PipelineReport};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{Context, ImportFlags};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Channel {
    Upload,
    AssetPoll,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Project exports (.L5X or .ACD)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Queue to submit to
    #[arg(long, value_enum, default_value = "upload")]
    pub channel: Channel,

    #[command(flatten)]
    pub flags: ImportFlags,
}

#[derive(Debug, Serialize)]
struct IngestSummary {
    submitted: usize,
    rejected: usize,
    #[serde(flatten)]
    report: PipelineReport,
}

impl IngestSummary {
    fn failed(&self) -> usize {
        let upload = &self.report.upload;
        let asset_poll = &self.report.asset_poll;
        self.rejected + upload.failed + upload.dropped + asset_poll.failed + asset_poll.dropped
    }
}

pub async fn execute(ctx: &Context, args: IngestArgs) -> anyhow::Result<()> {
    ctx.database.ensure_current().await?;

    let staging = tempfile::Builder::new().prefix("ctrlsnap-ingest").tempdir()?;
    let engine = Arc::new(IngestEngine::new(
        ctx.database.clone(),
        Arc::new(DefaultParser),
        ctx.ingest_options(&args.flags),
    ));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping after current items");
            interrupt.cancel();
        }
    });

    let pipeline = IngestPipeline::start(engine, &ctx.config.queue, cancel);
    let sender = match args.channel {
        Channel::Upload => pipeline.upload().clone(),
        Channel::AssetPoll => pipeline.asset_poll().clone(),
    };

    let mut submitted = 0;
    let mut rejected = 0;
    for file in &args.files {
        match stage_and_submit(&sender, file, &staging, &args.flags).await {
            Ok(()) => submitted += 1,
            Err(e) => {
                rejected += 1;
                tracing::error!(file = %file.display(), error = %e, "Source rejected");
                eprintln!("Rejected {}: {}", file.display(), e);
            }
        }
    }
    drop(sender);

    let summary = IngestSummary {
        submitted,
        rejected,
        report: pipeline.drain().await?,
    };
    ctx.emit(&summary, || {
        let imported = summary.report.upload.imported + summary.report.asset_poll.imported;
        let unchanged = summary.report.upload.unchanged + summary.report.asset_poll.unchanged;
        format!(
            "Ingested {} file(s): {} imported, {} unchanged, {} failed",
            args.files.len(),
            imported,
            unchanged,
            summary.failed()
        )
    })?;

    if summary.failed() > 0 {
        return Err(ExError::new(ExErrorKind::Format)
            .with_op("ingest")
            .with_message(format!(
                "{} of {} source(s) could not be ingested",
                summary.failed(),
                args.files.len()
            ))
            .into());
    }
    Ok(())
}

async fn stage_and_submit(
    sender: &IngestSender,
    file: &std::path::Path,
    staging: &tempfile::TempDir,
    flags: &ImportFlags,
) -> Result<(), ExError> {
    let mut source = SourceDescriptor::from_path(file)?;
    let staged = staging
        .path()
        .join(format!("{}-{}", source.source_id, source.file_name));
    tokio::fs::copy(file, &staged)
        .await
        .map_err(|e| ExError::from(e).with_op("stage_source"))?;
    source.storage_path = staged.clone();
    for (key, value) in &flags.metadata {
        source = source.with_metadata(key, value);
    }

    if let Err(e) = sender.submit(source).await {
        // Rejected submissions stay with the producer.
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(e);
    }
    Ok(())
}
