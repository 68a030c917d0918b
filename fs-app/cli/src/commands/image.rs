//! Opening, walking and committing arena images

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use std::path::Path;

use byzfs::backing::{flush_pages, load_image, FilePageStore};
use byzfs::{ArenaFs, DirtyPages, EngineConfig, FileService, Handle, OpContext, Timestamp};

/// An image loaded into memory, with the store it came from
pub struct Image {
    store: FilePageStore,
    pub service: FileService<DirtyPages>,
}

impl Image {
    pub async fn open(path: &Path) -> Result<Self> {
        let store = FilePageStore::open(path)
            .await
            .with_context(|| format!("Failed to open image: {}", path.display()))?;
        let region = load_image(&store).await?;
        let fs = ArenaFs::open(region, DirtyPages::new())
            .with_context(|| format!("{} is not a byzfs image", path.display()))?;
        let service = FileService::new(fs, &EngineConfig::default());
        Ok(Self { store, service })
    }

    /// Resolve a slash-separated path from the root
    pub fn resolve(&mut self, path: &str) -> Result<Handle> {
        let ctx = now();
        let mut handle = self.service.root_handle();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            handle = self
                .service
                .lookup(&handle, component.as_bytes(), &ctx)
                .with_context(|| format!("Cannot resolve {:?} in {}", component, path))?
                .handle;
        }
        Ok(handle)
    }

    /// Resolve everything but the last component of `path`
    pub fn resolve_parent<'p>(&mut self, path: &'p str) -> Result<(Handle, &'p str)> {
        let trimmed = path.trim_end_matches('/');
        let (parent, name) = match trimmed.rfind('/') {
            Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
            None => ("", trimmed),
        };
        if name.is_empty() {
            return Err(anyhow!("Path {:?} has no final component", path));
        }
        Ok((self.resolve(parent)?, name))
    }

    /// Write every page declared since loading back to the store
    pub async fn commit(mut self) -> Result<usize> {
        let dirty = self.service.fs_mut().hook_mut().take();
        let written = flush_pages(&self.store, self.service.fs().arena().as_bytes(), &dirty).await?;
        debug!("Committed pages {:?}", dirty);
        info!("Wrote {} dirty pages to {}", written, self.store.path().display());
        self.store.close().await?;
        Ok(written)
    }
}

/// Operation context stamped with the current wall-clock time
pub fn now() -> OpContext {
    let now = chrono::Utc::now();
    OpContext::root(Timestamp::new(
        now.timestamp() as u32,
        now.timestamp_subsec_micros(),
    ))
}

/// Render a timestamp for listings
pub fn display_time(ts: Timestamp) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp(ts.sec as i64, ts.usec * 1000)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
