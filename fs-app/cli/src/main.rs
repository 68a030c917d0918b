//! byzfs Command Line Interface
//!
//! Formats, inspects and edits arena images offline.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};

mod commands;

/// byzfs - storage engine of a Byzantine-fault-tolerant replicated file service
#[derive(Parser)]
#[command(
    name = "byzfs",
    about = "byzfs arena image tool",
    version = env!("CARGO_PKG_VERSION")
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
    /// Create and format an arena image
    Format(commands::format::FormatArgs),

    /// Show usage statistics and the image digest
    Info(commands::info::InfoArgs),

    /// List a directory
    Ls(commands::ls::LsArgs),

    /// Create a directory
    Mkdir(commands::mkdir::MkdirArgs),

    /// Copy a local file into the image
    Put(commands::put::PutArgs),

    /// Print a file from the image
    Cat(commands::cat::CatArgs),

    /// Remove a file or an empty directory
    Rm(commands::rm::RmArgs),

    /// Verify the structural consistency of an image
    Check(commands::check::CheckArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::new().filter_level(log_level).init();

    info!("byzfs CLI v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Format(args) => commands::format::run(args).await,
        Commands::Info(args) => commands::info::run(args).await,
        Commands::Ls(args) => commands::ls::run(args).await,
        Commands::Mkdir(args) => commands::mkdir::run(args).await,
        Commands::Put(args) => commands::put::run(args).await,
        Commands::Cat(args) => commands::cat::run(args).await,
        Commands::Rm(args) => commands::rm::run(args).await,
        Commands::Check(args) => commands::check::run(args).await,
    }
}
