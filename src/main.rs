use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use flatmine_core::{Database, Result};
use flatmine_sources::WORKER_NAMES;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one named worker for exactly one tact
    #[command(about = "Run one named worker for exactly one tact")]
    Run(RunCommand),
}

#[derive(Parser)]
struct RunCommand {
    /// Worker to run, e.g. olx-scraper or domria-sweeper
    worker: String,

    /// Database file (-d, --database)
    #[arg(short = 'd', long, default_value = "data/flatmine.db")]
    database: PathBuf,

    /// Directory for cursors, rate caches and statistics (-o, --data-dir)
    #[arg(short = 'o', long, default_value = "data")]
    data_dir: PathBuf,
}

async fn run(cmd: RunCommand) -> Result<bool> {
    info!(database = %cmd.database.display(), worker = %cmd.worker, "flatmine starting");
    let database = Database::new(&cmd.database).await?;
    std::fs::create_dir_all(&cmd.data_dir)?;
    match flatmine_sources::worker(&cmd.worker, &database, &cmd.data_dir)? {
        Some(worker) => {
            worker.run().await;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(cmd) => {
            let worker = cmd.worker.clone();
            match run(cmd).await {
                Ok(true) => ExitCode::SUCCESS,
                Ok(false) => {
                    eprintln!(
                        "unknown worker '{worker}', expected one of: {}",
                        WORKER_NAMES.join(", ")
                    );
                    ExitCode::FAILURE
                }
                Err(error) => {
                    eprintln!("{error}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
