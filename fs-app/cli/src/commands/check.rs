//! Check command for image consistency verification

use anyhow::{anyhow, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::time::Instant;

use super::image::Image;

/// Verify the structural consistency of an image
#[derive(Parser, Debug)]
#[command(about = "Verify byzfs image consistency")]
pub struct CheckArgs {
    /// Image file to check
    pub image: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: CheckArgs) -> Result<()> {
    let image = Image::open(&args.image).await?;

    let start = Instant::now();
    let report = image.service.fs().check();
    info!("Check finished in {:?}", start.elapsed());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Inodes: {} live, {} free of {}",
            report.live_inodes, report.free_listed_inodes, report.total_inodes
        );
        println!(
            "Blocks: {} live, {} free of {}",
            report.live_blocks, report.free_listed_blocks, report.total_blocks
        );
        for problem in &report.problems {
            error!("{}", problem);
            println!("  problem: {}", problem);
        }
    }

    if report.is_clean() {
        println!("{}: clean", args.image.display());
        Ok(())
    } else {
        Err(anyhow!(
            "{} problems found in {}",
            report.problems.len(),
            args.image.display()
        ))
    }
}
