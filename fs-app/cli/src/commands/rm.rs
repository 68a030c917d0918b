//! Rm command: remove entries from an image

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use super::image::{now, Image};

/// Remove a file or an empty directory
#[derive(Parser, Debug)]
#[command(about = "Remove a file or an empty directory from a byzfs image")]
pub struct RmArgs {
    /// Image file
    pub image: PathBuf,

    /// Path inside the image
    pub path: String,

    /// Remove an empty directory
    #[arg(short = 'r', long = "dir")]
    pub dir: bool,
}

pub async fn run(args: RmArgs) -> Result<()> {
    let mut image = Image::open(&args.image).await?;
    let ctx = now();
    let (parent, name) = image.resolve_parent(&args.path)?;

    if args.dir {
        image.service.rmdir(&parent, name.as_bytes(), &ctx)?;
    } else {
        image.service.remove(&parent, name.as_bytes(), &ctx)?;
    }

    image.commit().await?;
    Ok(())
}
