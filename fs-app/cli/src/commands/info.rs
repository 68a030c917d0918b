//! Info command: usage statistics and digest of an image

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

use byzfs::PageDigests;

use super::image::Image;

/// Show usage statistics and the image digest
#[derive(Parser, Debug)]
#[command(about = "Show byzfs image statistics")]
pub struct InfoArgs {
    /// Image file to inspect
    pub image: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: InfoArgs) -> Result<()> {
    let image = Image::open(&args.image).await?;
    let fs = image.service.fs();
    let stats = image.service.statfs();
    let geometry = fs.geometry();
    let digests = PageDigests::compute(fs.arena().as_bytes());

    if args.json {
        let report = json!({
            "stats": stats,
            "pages": geometry.num_pages,
            "inode_pages": geometry.num_inode_pages,
            "zero_page": geometry.zero_page,
            "digest": format!("{:08x}", digests.combined()),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Image:        {}", args.image.display());
    println!("Pages:        {} of {} bytes", geometry.num_pages, stats.block_size);
    println!(
        "Inodes:       {} used, {} free, {} total",
        stats.total_inodes - stats.free_inodes,
        stats.free_inodes,
        stats.total_inodes
    );
    println!(
        "Blocks:       {} used, {} free, {} total",
        stats.total_blocks - stats.free_blocks,
        stats.free_blocks,
        stats.total_blocks
    );
    println!("Transfer max: {} bytes", stats.transfer_size);
    println!("Digest:       {:08x}", digests.combined());
    Ok(())
}
