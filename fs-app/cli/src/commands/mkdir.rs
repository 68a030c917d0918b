//! Mkdir command: create directories inside an image

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use byzfs::service::SetAttr;
use byzfs::FsError;

use super::image::{now, Image};

/// Create a directory
#[derive(Parser, Debug)]
#[command(about = "Create a directory inside a byzfs image")]
pub struct MkdirArgs {
    /// Image file
    pub image: PathBuf,

    /// Directory path to create
    pub path: String,

    /// Create missing parents and accept existing directories
    #[arg(short, long)]
    pub parents: bool,

    /// Permission bits for new directories
    #[arg(short, long, default_value = "755", value_parser = parse_mode)]
    pub mode: u32,
}

fn parse_mode(text: &str) -> Result<u32, std::num::ParseIntError> {
    u32::from_str_radix(text, 8)
}

pub async fn run(args: MkdirArgs) -> Result<()> {
    let mut image = Image::open(&args.image).await?;
    let ctx = now();
    let attrs = SetAttr {
        mode: Some(args.mode),
        ..SetAttr::default()
    };

    if args.parents {
        let mut dir = image.service.root_handle();
        for component in args.path.split('/').filter(|c| !c.is_empty()) {
            dir = match image.service.lookup(&dir, component.as_bytes(), &ctx) {
                Ok(found) => found.handle,
                Err(FsError::NotFound) => {
                    image
                        .service
                        .mkdir(&dir, component.as_bytes(), &attrs, &ctx)?
                        .handle
                }
                Err(e) => return Err(e.into()),
            };
        }
    } else {
        let (parent, name) = image.resolve_parent(&args.path)?;
        image.service.mkdir(&parent, name.as_bytes(), &attrs, &ctx)?;
    }

    image.commit().await?;
    Ok(())
}
