//! Ls command: list a directory inside an image

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use super::image::{display_time, now, Image};

/// Reply size limit per readdir call
const READDIR_BYTES: u32 = 8192;

/// List a directory
#[derive(Parser, Debug)]
#[command(about = "List a directory inside a byzfs image")]
pub struct LsArgs {
    /// Image file
    pub image: PathBuf,

    /// Directory path inside the image
    #[arg(default_value = "/")]
    pub path: String,
}

pub async fn run(args: LsArgs) -> Result<()> {
    let mut image = Image::open(&args.image).await?;
    let dir = image.resolve(&args.path)?;
    let ctx = now();

    let mut cookie = 0;
    loop {
        let reply = image.service.readdir(&dir, cookie, READDIR_BYTES)?;
        for entry in &reply.entries {
            let found = image.service.lookup(&dir, &entry.name, &ctx)?;
            let attr = found.attr;
            println!(
                "{:06o} {:>3} {:>5} {:>5} {:>10} {} {}",
                attr.mode,
                attr.nlink,
                attr.uid,
                attr.gid,
                attr.size,
                display_time(attr.mtime),
                String::from_utf8_lossy(&entry.name)
            );
            cookie = entry.cookie;
        }
        if reply.eof || reply.entries.is_empty() {
            break;
        }
    }
    Ok(())
}
