//! Keel CLI - tasks and notes that keep working offline
//!
//! Every change is written locally first and queued for the sync server.

mod cli;
mod commands;
mod context;
mod error;


use clap::Parser;

use cli::{Cli, Commands};
use commands::completions::run_completions;
use commands::config::run_config;
use commands::daemon::run_daemon;
use commands::note::run_note;
use commands::queue::run_queue;
use commands::sync::run_sync;
use commands::task::run_task;
use context::{resolve_db_path, ClientContext};
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "keel=info"
        .parse()
        .map_err(|error| CliError::Io(std::io::Error::other(format!("{error}"))))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path);
    let ctx = ClientContext::open(&db_path).await?;

    match cli.command {
        Commands::Task { command } => run_task(command, &ctx).await?,
        Commands::Note { command } => run_note(command, &ctx).await?,
        Commands::Sync { command } => run_sync(command, &ctx).await?,
        Commands::Queue { command } => run_queue(command, &ctx).await?,
        Commands::Config { command } => run_config(command, &ctx).await?,
        Commands::Daemon => run_daemon(&ctx).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
