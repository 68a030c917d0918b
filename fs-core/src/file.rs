//! File data engine
//!
//! A regular file's blocks are addressed through 111 inline pointers and, past
//! those, one overflow block of 1024 more. Regions that were never written
//! point at the shared zero block and own no storage; a real block is only
//! allocated when a write lands on one.

use std::borrow::Cow;

use crate::context::OpContext;
use crate::error::{FsError, NoSpaceCause, Result};
use crate::fs::ArenaFs;
use crate::hook::MutationHook;
use crate::inode::{BlockNo, BlockRef, FileKind, InodeNo, Payload};
use crate::layout::{MAX_FILE_BLOCKS, MAX_FILE_SIZE, NUM_INLINE_BLOCKS, PAGE_SIZE};

/// Number of blocks covering `size` bytes
pub(crate) fn blocks_for(size: u64) -> usize {
    size.div_ceil(PAGE_SIZE as u64) as usize
}

impl<H: MutationHook> ArenaFs<H> {
    /// Byte offset of the pointer slot for block `bnum` of `file`
    fn pointer_offset(&self, file: InodeNo, bnum: usize) -> usize {
        assert!(bnum < MAX_FILE_BLOCKS, "file block {} out of range", bnum);
        if bnum < NUM_INLINE_BLOCKS {
            return self.inline_offset(file) + bnum * 4;
        }
        match self.file_overflow(file) {
            Some(block) => self.geometry.block_offset(block.0) + (bnum - NUM_INLINE_BLOCKS) * 4,
            None => {
                log::error!("FILE: {} block {} lies past a missing pointer block", file, bnum);
                panic!("{} has no pointer block for block {}", file, bnum);
            }
        }
    }

    /// What block `bnum` of `file` currently refers to
    pub fn fetch_block(&self, file: InodeNo, bnum: usize) -> BlockRef {
        BlockRef::from_raw(self.arena.read_u32(self.pointer_offset(file, bnum)))
    }

    /// Point block `bnum` of `file` at `target`
    pub fn store_block(&mut self, file: InodeNo, bnum: usize, target: BlockRef) {
        let offset = self.pointer_offset(file, bnum);
        self.arena.write_u32(offset, target.to_raw());
    }

    /// Byte offset of the storage behind a block reference
    fn ref_offset(&self, target: BlockRef) -> usize {
        match target {
            BlockRef::Zero => self.geometry.zero_offset(),
            BlockRef::Data(block) => self.geometry.block_offset(block.0),
        }
    }

    /// Read up to `count` bytes at `offset`
    ///
    /// The count is clamped to the end of the file and to one block. A read
    /// inside a single block borrows the arena directly; one crossing a block
    /// boundary is assembled into an owned buffer.
    pub fn read(&self, file: InodeNo, offset: u64, count: u32) -> Cow<'_, [u8]> {
        let size = self.attr(file).size;
        if offset >= size {
            return Cow::Borrowed(&[][..]);
        }
        let count = (count as u64).min(size - offset).min(PAGE_SIZE as u64) as usize;
        let bnum = (offset / PAGE_SIZE as u64) as usize;
        let within = (offset % PAGE_SIZE as u64) as usize;

        let first = self.ref_offset(self.fetch_block(file, bnum));
        if within + count <= PAGE_SIZE {
            return Cow::Borrowed(self.arena.read(first + within, count));
        }

        let head = PAGE_SIZE - within;
        let second = self.ref_offset(self.fetch_block(file, bnum + 1));
        let mut staging = Vec::with_capacity(count);
        staging.extend_from_slice(self.arena.read(first + within, head));
        staging.extend_from_slice(self.arena.read(second, count - head));
        Cow::Owned(staging)
    }

    /// Grow `file` to `new_size`, backing the new range with the zero block
    pub fn append_zeros(&mut self, file: InodeNo, new_size: u64, ctx: &OpContext) -> Result<()> {
        if new_size > MAX_FILE_SIZE {
            return Err(FsError::NoSpace(NoSpaceCause::FileTooLarge));
        }
        let attr = self.attr(file);
        if new_size <= attr.size {
            return Ok(());
        }
        let old_blocks = attr.blocks as usize;
        let new_blocks = blocks_for(new_size);

        if new_blocks > NUM_INLINE_BLOCKS && self.file_overflow(file).is_none() {
            let block = self.alloc_block()?;
            self.set_payload(
                file,
                &Payload::Regular {
                    overflow: Some(block),
                },
            );
            log::debug!("FILE: {} grew pointer block {}", file, block);
        }

        // Bytes past the old end of a partial last block may be left over
        // from a shrink; they must read back as zero now
        let tail = (attr.size % PAGE_SIZE as u64) as usize;
        if tail != 0 {
            if let BlockRef::Data(block) = self.fetch_block(file, old_blocks - 1) {
                let offset = self.geometry.block_offset(block.0);
                self.arena.zero(offset + tail, PAGE_SIZE - tail);
            }
        }

        for bnum in old_blocks..new_blocks {
            self.store_block(file, bnum, BlockRef::Zero);
        }
        self.update_attr(file, |a| {
            a.size = new_size;
            a.blocks = new_blocks as u32;
            a.ctime = ctx.now;
        });
        log::debug!("FILE: {} extended to {} bytes", file, new_size);
        Ok(())
    }

    /// Number of blocks a write of `len` bytes at `offset` would allocate
    fn blocks_needed(&self, file: InodeNo, offset: u64, len: usize) -> usize {
        let attr = self.attr(file);
        let end = offset + len as u64;
        let new_blocks = blocks_for(end).max(attr.blocks as usize);
        let mut needed = 0;
        if new_blocks > NUM_INLINE_BLOCKS && self.file_overflow(file).is_none() {
            needed += 1;
        }
        if len > 0 {
            let first = (offset / PAGE_SIZE as u64) as usize;
            let last = ((end - 1) / PAGE_SIZE as u64) as usize;
            needed += (first..=last)
                .filter(|&bnum| {
                    bnum >= attr.blocks as usize || self.fetch_block(file, bnum) == BlockRef::Zero
                })
                .count();
        }
        needed
    }

    /// Write `data` at `offset`, growing the file as needed
    ///
    /// Transfers are limited to one block, so at most two blocks are touched.
    /// Every check happens before the first mutation.
    pub fn write(&mut self, file: InodeNo, offset: u64, data: &[u8], ctx: &OpContext) -> Result<()> {
        if data.len() > PAGE_SIZE {
            return Err(FsError::NoSpace(NoSpaceCause::TransferTooLarge));
        }
        let end = match offset.checked_add(data.len() as u64) {
            Some(end) if end <= MAX_FILE_SIZE => end,
            _ => return Err(FsError::NoSpace(NoSpaceCause::FileTooLarge)),
        };
        if self.blocks_needed(file, offset, data.len()) > self.free_block_count() as usize {
            log::warn!("FILE: not enough free blocks for a {} byte write", data.len());
            return Err(FsError::NoSpace(NoSpaceCause::Blocks));
        }

        self.append_zeros(file, end, ctx)?;

        let mut written = 0;
        while written < data.len() {
            let pos = offset + written as u64;
            let bnum = (pos / PAGE_SIZE as u64) as usize;
            let within = (pos % PAGE_SIZE as u64) as usize;
            let chunk = (PAGE_SIZE - within).min(data.len() - written);

            let block = match self.fetch_block(file, bnum) {
                BlockRef::Data(block) => block,
                BlockRef::Zero => {
                    let block = self.alloc_block()?;
                    self.store_block(file, bnum, BlockRef::Data(block));
                    let base = self.geometry.block_offset(block.0);
                    self.arena.zero(base, within);
                    self.arena.zero(base + within + chunk, PAGE_SIZE - within - chunk);
                    block
                }
            };
            let base = self.geometry.block_offset(block.0);
            self.arena.write(base + within, &data[written..written + chunk]);
            written += chunk;
        }

        self.update_attr(file, |a| {
            a.atime = ctx.now;
            a.mtime = ctx.now;
        });
        log::debug!("FILE: wrote {} bytes at {} in {}", data.len(), offset, file);
        Ok(())
    }

    /// Set the size of `file` to `new_size`
    ///
    /// Shrinking returns every data block past the new end and, once the file
    /// fits in its inline pointers, the pointer block too.
    pub fn truncate(&mut self, file: InodeNo, new_size: u64, ctx: &OpContext) -> Result<()> {
        if new_size > MAX_FILE_SIZE {
            return Err(FsError::NoSpace(NoSpaceCause::FileTooLarge));
        }
        let attr = self.attr(file);
        if new_size > attr.size {
            return self.append_zeros(file, new_size, ctx);
        }

        let new_blocks = blocks_for(new_size);
        let released = self.release_blocks_from(file, new_blocks);
        self.update_attr(file, |a| {
            a.size = new_size;
            a.blocks = new_blocks as u32;
            a.mtime = ctx.now;
            a.ctime = ctx.now;
        });
        log::debug!(
            "FILE: truncated {} to {} bytes, released {} blocks",
            file,
            new_size,
            released
        );
        Ok(())
    }

    /// Free data blocks from `keep` on, and the pointer block if it empties
    fn release_blocks_from(&mut self, file: InodeNo, keep: usize) -> usize {
        let blocks = self.attr(file).blocks as usize;
        let mut released = 0;
        for bnum in keep..blocks {
            if let BlockRef::Data(block) = self.fetch_block(file, bnum) {
                self.free_block(block);
                released += 1;
            }
        }
        if keep <= NUM_INLINE_BLOCKS {
            if let Some(block) = self.file_overflow(file) {
                self.set_payload(file, &Payload::Regular { overflow: None });
                self.free_block(block);
                released += 1;
            }
        }
        released
    }

    /// Return all storage owned by a file about to be freed
    pub(crate) fn release_file_data(&mut self, file: InodeNo) {
        debug_assert_eq!(self.kind(file), FileKind::Regular);
        self.release_blocks_from(file, 0);
    }

    /// Blocks owned by `file`, including its pointer block
    pub fn owned_blocks(&self, file: InodeNo) -> Vec<BlockNo> {
        let blocks = self.attr(file).blocks as usize;
        let mut owned: Vec<BlockNo> = self.file_overflow(file).into_iter().collect();
        owned.extend((0..blocks).filter_map(|bnum| match self.fetch_block(file, bnum) {
            BlockRef::Data(block) => Some(block),
            BlockRef::Zero => None,
        }));
        owned
    }
}
