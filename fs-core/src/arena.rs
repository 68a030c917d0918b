//! The state arena: one contiguous region holding all replicated state
//!
//! All writes funnel through [`Arena::write`], which declares the touched
//! pages to the mutation hook before copying a single byte.

use byteorder::{ByteOrder, LittleEndian};

use crate::hook::MutationHook;
use crate::layout::PAGE_SIZE;

/// Page-granular memory region plus the hook that must hear about every write
pub struct Arena<H> {
    mem: Vec<u8>,
    hook: H,
    /// Page that no write may touch once formatting is over
    guarded_page: Option<u32>,
}

impl<H: MutationHook> Arena<H> {
    /// Wrap a region; its length must be a whole number of pages
    pub fn new(mem: Vec<u8>, hook: H) -> Self {
        assert!(
            mem.len() % PAGE_SIZE == 0,
            "arena length {} is not a multiple of the page size",
            mem.len()
        );
        Self {
            mem,
            hook,
            guarded_page: None,
        }
    }

    /// Number of pages in the region
    pub fn num_pages(&self) -> u32 {
        (self.mem.len() / PAGE_SIZE) as u32
    }

    /// Whole region, read-only
    pub fn as_bytes(&self) -> &[u8] {
        &self.mem
    }

    /// One page, read-only
    pub fn page(&self, page: u32) -> &[u8] {
        let start = page as usize * PAGE_SIZE;
        &self.mem[start..start + PAGE_SIZE]
    }

    /// Give the region back
    pub fn into_parts(self) -> (Vec<u8>, H) {
        (self.mem, self.hook)
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    pub fn hook_mut(&mut self) -> &mut H {
        &mut self.hook
    }

    /// Forbid writes to `page` from now on
    pub(crate) fn guard_page(&mut self, page: u32) {
        self.guarded_page = Some(page);
    }

    pub fn read(&self, offset: usize, len: usize) -> &[u8] {
        &self.mem[offset..offset + len]
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.mem[offset..offset + 4])
    }

    /// Declare the pages under `offset..offset + len`, then copy `data` in
    pub fn write(&mut self, offset: usize, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.declare(offset, data.len());
        self.mem[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write(offset, &buf);
    }

    /// Declare, then zero `len` bytes at `offset`
    pub fn zero(&mut self, offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        self.declare(offset, len);
        self.mem[offset..offset + len].fill(0);
    }

    fn declare(&mut self, offset: usize, len: usize) {
        assert!(
            offset + len <= self.mem.len(),
            "write of {} bytes at {} runs past the arena end {}",
            len,
            offset,
            self.mem.len()
        );
        let first = (offset / PAGE_SIZE) as u32;
        let last = ((offset + len - 1) / PAGE_SIZE) as u32;

        if let Some(guarded) = self.guarded_page {
            if first <= guarded && guarded <= last {
                log::error!("ARENA: write to the shared zero block at page {}", guarded);
                panic!("attempted write to the shared zero block (page {})", guarded);
            }
        }

        match last - first {
            0 => self.hook.modify_one(first),
            1 => self.hook.modify_two(first, Some(last)),
            _ => {
                let pages: Vec<u32> = (first..=last).collect();
                self.hook.modify_list(&pages);
            }
        }
    }
}

impl<H> std::fmt::Debug for Arena<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("len", &self.mem.len())
            .field("guarded_page", &self.guarded_page)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::DirtyPages;

    fn arena(pages: usize) -> Arena<DirtyPages> {
        Arena::new(vec![0u8; pages * PAGE_SIZE], DirtyPages::new())
    }

    #[test]
    fn test_write_declares_single_page() {
        let mut arena = arena(4);
        arena.write_u32(PAGE_SIZE + 8, 0xdead_beef);
        assert_eq!(arena.read_u32(PAGE_SIZE + 8), 0xdead_beef);
        assert_eq!(arena.hook().counts().one, 1);
        assert!(arena.hook().contains(1));
    }

    #[test]
    fn test_write_across_boundary_declares_two_pages() {
        let mut arena = arena(4);
        arena.write(PAGE_SIZE - 2, &[1, 2, 3, 4]);
        assert_eq!(arena.hook().counts().two, 1);
        assert!(arena.hook().contains(0));
        assert!(arena.hook().contains(1));
        assert_eq!(arena.read(PAGE_SIZE - 2, 4), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_large_zero_declares_page_list() {
        let mut arena = arena(4);
        arena.write(10, &[0xff; 10]);
        arena.zero(0, 3 * PAGE_SIZE);
        assert_eq!(arena.hook().counts().list, 1);
        assert_eq!(arena.hook().pages().len(), 3);
        assert!(arena.read(10, 10).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_write_declares_nothing() {
        let mut arena = arena(2);
        arena.write(0, &[]);
        arena.zero(0, 0);
        assert!(arena.hook().pages().is_empty());
    }

    #[test]
    #[should_panic(expected = "shared zero block")]
    fn test_guarded_page_rejects_writes() {
        let mut arena = arena(4);
        arena.guard_page(2);
        arena.write(PAGE_SIZE * 2 + 100, &[1]);
    }
}
