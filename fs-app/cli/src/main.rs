//! WalFS Command Line Interface
//!
//! Format, inspect and recover WalFS log images, and exercise the
//! group-commit log and name cache against them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};

mod commands;

/// WalFS - write-ahead logging with group commit
#[derive(Parser)]
#[command(
    name = "walfs",
    about = "WalFS command-line interface",
    version = env!("CARGO_PKG_VERSION"),
    author = "WalFS Contributors"
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and format a WalFS image
    Format(commands::format::FormatArgs),

    /// Show the superblock and the on-disk log header
    Inspect(commands::inspect::InspectArgs),

    /// Replay any committed transaction left in the log
    Recover(commands::recover::RecoverArgs),

    /// Run a group-commit and name-cache workload
    Bench(commands::bench::BenchArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level
    let log_level = if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::new().filter_level(log_level).init();

    info!("WalFS CLI v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Format(args) => commands::format::run(args).await,
        Commands::Inspect(args) => commands::inspect::run(args).await,
        Commands::Recover(args) => commands::recover::run(args).await,
        Commands::Bench(args) => commands::bench::run(args).await,
    }
}
