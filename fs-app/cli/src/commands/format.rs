//! Format command for creating byzfs arena images

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::info;
use std::io::Write;
use std::path::PathBuf;

use byzfs::backing::{flush_pages, FilePageStore};
use byzfs::{ArenaFs, DirtyPages, EngineConfig};

use super::image::now;

/// Create and format an arena image
#[derive(Parser, Debug)]
#[command(about = "Create and format a byzfs arena image")]
pub struct FormatArgs {
    /// Image file to create
    pub image: PathBuf,

    /// Pages in the arena (overrides the config file)
    #[arg(short, long)]
    pub pages: Option<u32>,

    /// JSON engine configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Overwrite an existing image without confirmation
    #[arg(short, long)]
    pub force: bool,
}

pub async fn run(args: FormatArgs) -> Result<()> {
    info!("byzfs Format Tool v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(pages) = args.pages {
        config.total_pages = pages;
    }

    if args.image.exists() && !args.force {
        println!(
            "WARNING: {} already exists and will be overwritten.",
            args.image.display()
        );
        print!("Are you sure you want to continue? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Operation cancelled.");
            return Ok(());
        }
    }

    info!(
        "Formatting {} with {} pages ({} bytes)",
        args.image.display(),
        config.total_pages,
        config.arena_len()
    );

    let fs = ArenaFs::format(
        vec![0u8; config.arena_len()],
        config.inode_page_divisor,
        DirtyPages::new(),
        &now(),
    )
    .map_err(|e| anyhow!("Failed to format arena: {}", e))?;

    let store = FilePageStore::create(&args.image, config.total_pages as u64)
        .await
        .with_context(|| format!("Failed to create image: {}", args.image.display()))?;
    let geometry = *fs.geometry();
    let (region, mut dirty) = fs.into_parts();
    let pages = dirty.take();
    flush_pages(&store, &region, &pages).await?;
    store.close().await?;

    println!(
        "Formatted {}: {} inodes, {} data blocks",
        args.image.display(),
        geometry.num_inodes,
        geometry.num_blocks
    );
    Ok(())
}
