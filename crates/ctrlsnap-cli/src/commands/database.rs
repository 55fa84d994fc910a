//! `database migrate | status | revert`

use clap::{Args, Subcommand};
use ctrlsnap_core::errors::{ExError, ExErrorKind};
use ctrlsnap_store::DatabaseStatus;
use serde::Serialize;

use super::Context;

#[derive(Debug, Args)]
pub struct DatabaseArgs {
    #[command(subcommand)]
    pub command: DatabaseCommand,
}

#[derive(Debug, Subcommand)]
pub enum DatabaseCommand {
    /// Apply pending migrations to an existing database
    Migrate,
    /// Show applied and pending migrations
    Status,
    /// Revert applied migrations newer than a version
    Revert(RevertArgs),
}

#[derive(Debug, Args)]
pub struct RevertArgs {
    /// Keep migrations up to and including this version
    #[arg(long)]
    pub to: i64,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    data_source: String,
    #[serde(flatten)]
    status: DatabaseStatus,
}

pub async fn execute(ctx: &Context, args: DatabaseArgs) -> anyhow::Result<()> {
    match args.command {
        DatabaseCommand::Migrate => migrate_existing(ctx).await,
        DatabaseCommand::Status => status(ctx).await,
        DatabaseCommand::Revert(revert) => revert_to(ctx, revert.to).await,
    }
}

async fn migrate_existing(ctx: &Context) -> anyhow::Result<()> {
    if ctx.database.status().await? == DatabaseStatus::Unbuilt {
        return Err(ExError::new(ExErrorKind::MigrationRequired)
            .with_op("database_migrate")
            .with_data_source(ctx.database.data_source())
            .with_message("database has not been built; run 'build' or 'migrate'")
            .into());
    }
    super::schema::migrate(ctx).await
}

async fn status(ctx: &Context) -> anyhow::Result<()> {
    let report = StatusReport {
        data_source: ctx.database.data_source(),
        status: ctx.database.status().await?,
    };
    ctx.emit(&report, || match &report.status {
        DatabaseStatus::Unbuilt => format!("{}: not built", report.data_source),
        DatabaseStatus::Outdated { pending } => format!(
            "{}: outdated, {} pending migration(s): {}",
            report.data_source,
            pending.len(),
            pending
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        DatabaseStatus::Current { version } => {
            format!("{}: current at {}", report.data_source, version)
        }
    })
}

async fn revert_to(ctx: &Context, to_version: i64) -> anyhow::Result<()> {
    let reverted = ctx.database.revert(to_version).await?;
    let data_source = ctx.database.data_source();
    ctx.emit(&reverted, || {
        format!(
            "{}: reverted {} migration(s) above {}",
            data_source,
            reverted.len(),
            to_version
        )
    })
}
