//! Backing store for arena images
//!
//! The engine itself only sees an in-memory region. This module loads that
//! region from a page store at startup and writes back the pages a
//! [`DirtyPages`](crate::hook::DirtyPages) hook recorded.

mod store_trait;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::Mutex;

pub use self::store_trait::{PageStore, Result, StoreError};

use crate::layout::PAGE_SIZE;

/// A page store backed by a regular file
#[derive(Debug)]
pub struct FilePageStore {
    file: Mutex<Option<File>>,
    path: PathBuf,
    page_count: u64,
}

impl FilePageStore {
    /// Create (or truncate) a zero-filled store of `pages` pages
    pub async fn create(path: impl AsRef<Path>, pages: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        file.set_len(pages * PAGE_SIZE as u64).await?;
        log::info!("STORE: created {} with {} pages", path.display(), pages);

        Ok(Self {
            file: Mutex::new(Some(file)),
            path,
            page_count: pages,
        })
    }

    /// Open an existing store
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path).await?;
        let len = file.metadata().await?.len();
        if len % PAGE_SIZE as u64 != 0 {
            return Err(StoreError::Unaligned(len));
        }

        Ok(Self {
            file: Mutex::new(Some(file)),
            path,
            page_count: len / PAGE_SIZE as u64,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the underlying file
    pub async fn close(&self) -> Result<()> {
        match self.file.lock().await.take() {
            Some(_) => Ok(()),
            None => Err(StoreError::Closed),
        }
    }
}

#[async_trait]
impl PageStore for FilePageStore {
    async fn read_page(&self, page: u64, buf: &mut [u8]) -> Result<()> {
        if page >= self.page_count {
            return Err(StoreError::InvalidPage(page));
        }
        if buf.len() != PAGE_SIZE {
            return Err(StoreError::InvalidBufferSize(buf.len()));
        }

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        file.seek(SeekFrom::Start(page * PAGE_SIZE as u64)).await?;
        file.read_exact(buf).await?;
        Ok(())
    }

    async fn write_page(&self, page: u64, data: &[u8]) -> Result<()> {
        if page >= self.page_count {
            return Err(StoreError::InvalidPage(page));
        }
        if data.len() != PAGE_SIZE {
            return Err(StoreError::InvalidBufferSize(data.len()));
        }

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        file.seek(SeekFrom::Start(page * PAGE_SIZE as u64)).await?;
        file.write_all(data).await?;
        Ok(())
    }

    fn page_count(&self) -> u64 {
        self.page_count
    }

    async fn sync(&self) -> Result<()> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

/// Read every page of `store` into a fresh region
pub async fn load_image<S: PageStore + ?Sized>(store: &S) -> Result<Vec<u8>> {
    let pages = store.page_count();
    let mut image = vec![0u8; pages as usize * PAGE_SIZE];
    for (page, buf) in image.chunks_mut(PAGE_SIZE).enumerate() {
        store.read_page(page as u64, buf).await?;
    }
    log::info!("STORE: loaded {} pages", pages);
    Ok(image)
}

/// Write the listed pages of `region` to `store`, then sync
///
/// Returns the number of pages written.
pub async fn flush_pages<S: PageStore + ?Sized>(
    store: &S,
    region: &[u8],
    pages: &BTreeSet<u32>,
) -> Result<usize> {
    for &page in pages {
        let start = page as usize * PAGE_SIZE;
        let data = region
            .get(start..start + PAGE_SIZE)
            .ok_or(StoreError::InvalidPage(page as u64))?;
        store.write_page(page as u64, data).await?;
    }
    store.sync().await?;
    log::debug!("STORE: flushed {} dirty pages", pages.len());
    Ok(pages.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_page_store_operations() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("arena.img");
        let store = FilePageStore::create(&path, 8).await.unwrap();
        assert_eq!(store.page_count(), 8);

        for i in 0..8u64 {
            let data = [i as u8; PAGE_SIZE];
            store.write_page(i, &data).await.unwrap();
            let mut back = [0u8; PAGE_SIZE];
            store.read_page(i, &mut back).await.unwrap();
            assert_eq!(data, back);
        }

        let mut buf = [0u8; PAGE_SIZE];
        assert!(matches!(
            store.read_page(8, &mut buf).await,
            Err(StoreError::InvalidPage(8))
        ));
        assert!(matches!(
            store.write_page(0, &buf[..100]).await,
            Err(StoreError::InvalidBufferSize(100))
        ));

        store.close().await.unwrap();
        assert!(matches!(store.sync().await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn test_flush_writes_only_listed_pages() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("arena.img");
        let store = FilePageStore::create(&path, 4).await.unwrap();

        let region = vec![0xeeu8; 4 * PAGE_SIZE];
        let dirty: BTreeSet<u32> = [1, 3].into_iter().collect();
        assert_eq!(flush_pages(&store, &region, &dirty).await.unwrap(), 2);

        let reopened = FilePageStore::open(&path).await.unwrap();
        let image = load_image(&reopened).await.unwrap();
        assert!(image[..PAGE_SIZE].iter().all(|&b| b == 0));
        assert!(image[PAGE_SIZE..2 * PAGE_SIZE].iter().all(|&b| b == 0xee));
        assert!(image[2 * PAGE_SIZE..3 * PAGE_SIZE].iter().all(|&b| b == 0));
        assert!(image[3 * PAGE_SIZE..].iter().all(|&b| b == 0xee));
    }

    #[tokio::test]
    async fn test_open_rejects_partial_page() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("short.img");
        tokio::fs::write(&path, vec![0u8; PAGE_SIZE + 1]).await.unwrap();
        assert!(matches!(
            FilePageStore::open(&path).await,
            Err(StoreError::Unaligned(_))
        ));
    }
}
