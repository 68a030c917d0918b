//! Cat command: print a file from an image

use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use byzfs::FileKind;

use super::image::{now, Image};

/// Print a file from the image
#[derive(Parser, Debug)]
#[command(about = "Print a file or symlink target from a byzfs image")]
pub struct CatArgs {
    /// Image file
    pub image: PathBuf,

    /// File path inside the image
    pub path: String,
}

pub async fn run(args: CatArgs) -> Result<()> {
    let mut image = Image::open(&args.image).await?;
    let ctx = now();
    let file = image.resolve(&args.path)?;
    let attr = image.service.getattr(&file)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if attr.kind == FileKind::Symlink {
        out.write_all(&image.service.readlink(&file, &ctx)?)?;
        writeln!(out)?;
        return Ok(());
    }

    let chunk = image.service.statfs().transfer_size;
    let mut offset = 0u64;
    while offset < attr.size {
        let reply = image.service.read(&file, offset, chunk, &ctx)?;
        if reply.data.is_empty() {
            break;
        }
        out.write_all(&reply.data)?;
        offset += reply.data.len() as u64;
    }
    out.flush()?;
    Ok(())
}
