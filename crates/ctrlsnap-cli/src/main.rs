//! ctrlsnap CLI
//!
//! Command-line interface for building snapshot databases and importing
//! controller project exports.

use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;
mod exit;

#[derive(Debug, Parser)]
#[command(name = "ctrlsnap")]
#[command(about = "Controller project snapshot storage", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: commands::GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create and initialize a fresh database
    Build,
    /// Apply pending migrations, building the database if absent
    Migrate,
    /// Schema operations on an existing database
    Database(commands::database::DatabaseArgs),
    /// Import one project file synchronously
    Import(commands::import::ImportArgs),
    /// Queue project files through the ingestion pipeline
    Ingest(commands::ingest::IngestArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(exit::USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(exit::code_for(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = commands::Context::load(&cli.global)?;
    match cli.command {
        Commands::Build => commands::schema::build(&ctx).await,
        Commands::Migrate => commands::schema::migrate(&ctx).await,
        Commands::Database(args) => commands::database::execute(&ctx, args).await,
        Commands::Import(args) => commands::import::execute(&ctx, args).await,
        Commands::Ingest(args) => commands::ingest::execute(&ctx, args).await,
    }
}
