//! Put command: copy a local file into an image

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;

use byzfs::service::SetAttr;
use byzfs::FsError;

use super::image::{now, Image};

/// Copy a local file into the image
#[derive(Parser, Debug)]
#[command(about = "Copy a local file into a byzfs image")]
pub struct PutArgs {
    /// Image file
    pub image: PathBuf,

    /// Local file to copy
    pub source: PathBuf,

    /// Destination path inside the image
    pub dest: String,

    /// Replace the destination if it exists
    #[arg(short, long)]
    pub force: bool,
}

pub async fn run(args: PutArgs) -> Result<()> {
    let data = tokio::fs::read(&args.source)
        .await
        .with_context(|| format!("Failed to read {}", args.source.display()))?;

    let mut image = Image::open(&args.image).await?;
    let ctx = now();
    let (dir, name) = image.resolve_parent(&args.dest)?;

    let file = match image.service.create(&dir, name.as_bytes(), &SetAttr::default(), &ctx) {
        Ok(reply) => reply.handle,
        Err(FsError::Exist) if args.force => {
            let existing = image.service.lookup(&dir, name.as_bytes(), &ctx)?.handle;
            let truncate = SetAttr {
                size: Some(0),
                ..SetAttr::default()
            };
            image.service.setattr(&existing, &truncate, &ctx)?;
            existing
        }
        Err(e) => return Err(e.into()),
    };

    let chunk = image.service.statfs().transfer_size as usize;
    for (i, piece) in data.chunks(chunk).enumerate() {
        image
            .service
            .write(&file, (i * chunk) as u64, piece, &ctx)
            .with_context(|| format!("Failed writing {} at offset {}", args.dest, i * chunk))?;
    }

    info!("Copied {} bytes into {}", data.len(), args.dest);
    image.commit().await?;
    Ok(())
}
