//! Page digests over the arena
//!
//! The replication runtime compares state across replicas by digest. Keeping
//! one CRC32 per page lets it refresh only the pages an operation declared;
//! if every write was declared, the refreshed digest matches a full
//! recomputation.

use std::collections::BTreeSet;

use crate::layout::PAGE_SIZE;

/// Per-page CRC32 checksums plus a combined state digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDigests {
    pages: Vec<u32>,
}

fn page_crc(region: &[u8], page: usize) -> u32 {
    crc32fast::hash(&region[page * PAGE_SIZE..(page + 1) * PAGE_SIZE])
}

impl PageDigests {
    /// Checksum every page of `region`
    pub fn compute(region: &[u8]) -> Self {
        let count = region.len() / PAGE_SIZE;
        Self {
            pages: (0..count).map(|page| page_crc(region, page)).collect(),
        }
    }

    /// Recompute only `dirty` pages
    pub fn refresh(&mut self, region: &[u8], dirty: &BTreeSet<u32>) {
        for &page in dirty {
            let page = page as usize;
            if page < self.pages.len() {
                self.pages[page] = page_crc(region, page);
            }
        }
        log::debug!("DIGEST: refreshed {} of {} pages", dirty.len(), self.pages.len());
    }

    pub fn page(&self, page: u32) -> Option<u32> {
        self.pages.get(page as usize).copied()
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// Digest of the whole state: CRC32 over the page checksums in order
    pub fn combined(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for crc in &self.pages {
            hasher.update(&crc.to_le_bytes());
        }
        hasher.finalize()
    }

    /// Pages whose checksums differ from `other`'s
    pub fn diff(&self, other: &PageDigests) -> Vec<u32> {
        let longest = self.pages.len().max(other.pages.len());
        (0..longest)
            .filter(|&i| self.pages.get(i) != other.pages.get(i))
            .map(|i| i as u32)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_tracks_declared_pages() {
        let mut region = vec![0u8; 8 * PAGE_SIZE];
        let mut digests = PageDigests::compute(&region);
        let before = digests.combined();

        region[3 * PAGE_SIZE + 17] = 0x5a;
        let stale = digests.clone();
        digests.refresh(&region, &[3].into_iter().collect());

        assert_ne!(digests.combined(), before);
        assert_eq!(digests, PageDigests::compute(&region));
        assert_eq!(digests.diff(&stale), vec![3]);
    }

    #[test]
    fn test_undeclared_write_is_visible() {
        let mut region = vec![0u8; 4 * PAGE_SIZE];
        let mut digests = PageDigests::compute(&region);
        region[PAGE_SIZE] = 1;
        digests.refresh(&region, &BTreeSet::new());
        assert_ne!(digests, PageDigests::compute(&region));
    }
}
