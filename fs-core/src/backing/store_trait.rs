//! Page store trait definitions for byzfs

use std::io;
use thiserror::Error;

/// Error type for page store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid page number: {0}")]
    InvalidPage(u64),
    #[error("Invalid buffer size: {0} (expected one page)")]
    InvalidBufferSize(usize),
    #[error("Store size {0} is not a whole number of pages")]
    Unaligned(u64),
    #[error("Store is closed")]
    Closed,
}

/// Result type for page store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistent home of an arena image, addressed by page
#[async_trait::async_trait]
pub trait PageStore: Send + Sync {
    /// Read one page into `buf`
    async fn read_page(&self, page: u64, buf: &mut [u8]) -> Result<()>;

    /// Write one page from `data`
    async fn write_page(&self, page: u64, data: &[u8]) -> Result<()>;

    /// Number of pages the store holds
    fn page_count(&self) -> u64;

    /// Flush written pages to stable storage
    async fn sync(&self) -> Result<()>;
}
