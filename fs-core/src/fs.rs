//! Arena file system: format, mount and superblock bookkeeping
//!
//! [`ArenaFs`] owns the arena and is extended by the allocator, directory
//! engine, file engine and handle translator, each in its own module.

use serde::Serialize;

use crate::arena::Arena;
use crate::context::OpContext;
use crate::error::{FsError, Result};
use crate::hook::MutationHook;
use crate::inode::{Attr, InodeNo, Payload};
use crate::layout::{
    Geometry, Superblock, NIL, PAGE_SIZE, SB_BLOCK_FREE_HEAD, SB_FREE_BLOCKS, SB_FREE_INODES,
    SB_INODE_FREE_HEAD, SB_NUM_PAGES, SUPERBLOCK_SIZE,
};

/// The root directory always lives in inode 0
pub const ROOT_INO: InodeNo = InodeNo(0);

/// Capacity figures reported by statfs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FsStats {
    /// Largest single read or write
    pub transfer_size: u32,
    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
}

/// File system state living inside one arena
#[derive(Debug)]
pub struct ArenaFs<H> {
    pub(crate) arena: Arena<H>,
    pub(crate) geometry: Geometry,
}

impl<H: MutationHook> ArenaFs<H> {
    /// Partition `mem` and create the root directory
    ///
    /// The region is cleared first; every page it touches is declared.
    pub fn format(mem: Vec<u8>, inode_page_divisor: u32, hook: H, ctx: &OpContext) -> Result<Self> {
        if mem.len() % PAGE_SIZE != 0 {
            return Err(FsError::InvalidGeometry(format!(
                "region of {} bytes is not page aligned",
                mem.len()
            )));
        }
        let geometry = Geometry::compute((mem.len() / PAGE_SIZE) as u32, inode_page_divisor)?;
        log::info!(
            "FORMAT: {} pages, {} inodes in {} pages, zero block at page {}, {} blocks from page {}",
            geometry.num_pages,
            geometry.num_inodes,
            geometry.num_inode_pages,
            geometry.zero_page,
            geometry.num_blocks,
            geometry.block_table_page
        );

        let mut fs = Self {
            arena: Arena::new(mem, hook),
            geometry,
        };
        fs.arena.zero(0, geometry.arena_len());

        let mut sb = Superblock::new(&geometry);

        // Chain inodes in ascending order so the root is handed out first
        for i in 0..geometry.num_inodes {
            let ino = InodeNo(i);
            fs.put_attr(ino, &Attr::free(0));
            let next = if i + 1 < geometry.num_inodes { Some(InodeNo(i + 1)) } else { None };
            fs.set_payload(ino, &Payload::Free { next });
        }
        sb.inode_free_head = 0;
        sb.free_inodes = geometry.num_inodes;

        for b in 0..geometry.num_blocks {
            let next = if b + 1 < geometry.num_blocks { b + 1 } else { NIL };
            fs.arena.write_u32(geometry.block_offset(b), next);
        }
        sb.block_free_head = 0;
        sb.free_blocks = geometry.num_blocks;

        fs.arena.write(0, &sb.encode());
        fs.arena.guard_page(geometry.zero_page);

        let root = fs.create_dir(None, ctx)?;
        assert_eq!(root, ROOT_INO, "root directory did not land on inode 0");
        log::info!("FORMAT: root directory created");
        Ok(fs)
    }

    /// Mount an already formatted region
    pub fn open(mem: Vec<u8>, hook: H) -> Result<Self> {
        if mem.len() < PAGE_SIZE || mem.len() % PAGE_SIZE != 0 {
            return Err(FsError::InvalidSuperblock(format!(
                "region of {} bytes cannot hold an arena",
                mem.len()
            )));
        }
        let sb = Superblock::decode(&mem[..SUPERBLOCK_SIZE])?;
        let geometry = sb.validate(mem.len())?;
        if geometry.arena_len() != mem.len() {
            log::warn!(
                "MOUNT: region holds {} pages, arena uses {}",
                mem.len() / PAGE_SIZE,
                geometry.num_pages
            );
        }
        log::info!(
            "MOUNT: {} pages, {}/{} inodes free, {}/{} blocks free",
            geometry.num_pages,
            sb.free_inodes,
            geometry.num_inodes,
            sb.free_blocks,
            geometry.num_blocks
        );

        let mut arena = Arena::new(mem, hook);
        arena.guard_page(geometry.zero_page);
        Ok(Self { arena, geometry })
    }

    /// Mount `mem`, formatting it first when its page count field is zero
    pub fn open_or_format(
        mem: Vec<u8>,
        inode_page_divisor: u32,
        hook: H,
        ctx: &OpContext,
    ) -> Result<Self> {
        let uninitialized = mem.len() < SB_NUM_PAGES + 4
            || mem[SB_NUM_PAGES..SB_NUM_PAGES + 4].iter().all(|&b| b == 0);
        if uninitialized {
            log::info!("MOUNT: page count is zero, formatting");
            Self::format(mem, inode_page_divisor, hook, ctx)
        } else {
            Self::open(mem, hook)
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn arena(&self) -> &Arena<H> {
        &self.arena
    }

    pub fn hook(&self) -> &H {
        self.arena.hook()
    }

    pub fn hook_mut(&mut self) -> &mut H {
        self.arena.hook_mut()
    }

    /// Unmount, returning the region and the hook
    pub fn into_parts(self) -> (Vec<u8>, H) {
        self.arena.into_parts()
    }

    /// Current superblock contents
    pub fn superblock(&self) -> Superblock {
        match Superblock::decode(self.arena.read(0, SUPERBLOCK_SIZE)) {
            Ok(sb) => sb,
            Err(e) => {
                log::error!("FS: superblock unreadable: {}", e);
                panic!("superblock unreadable: {}", e);
            }
        }
    }

    pub fn free_inode_count(&self) -> u32 {
        self.arena.read_u32(SB_FREE_INODES)
    }

    pub fn free_block_count(&self) -> u32 {
        self.arena.read_u32(SB_FREE_BLOCKS)
    }

    pub(crate) fn inode_free_head(&self) -> u32 {
        self.arena.read_u32(SB_INODE_FREE_HEAD)
    }

    pub(crate) fn block_free_head(&self) -> u32 {
        self.arena.read_u32(SB_BLOCK_FREE_HEAD)
    }

    /// Install a new inode free-list head and count
    pub(crate) fn set_inode_free_list(&mut self, head: u32, count: u32) {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&count.to_le_bytes());
        buf[4..8].copy_from_slice(&head.to_le_bytes());
        self.arena.write(SB_FREE_INODES, &buf);
    }

    /// Install a new block free-list head and count
    pub(crate) fn set_block_free_list(&mut self, head: u32, count: u32) {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&count.to_le_bytes());
        buf[4..8].copy_from_slice(&head.to_le_bytes());
        self.arena.write(SB_FREE_BLOCKS, &buf);
    }

    pub fn statfs(&self) -> FsStats {
        FsStats {
            transfer_size: PAGE_SIZE as u32,
            block_size: PAGE_SIZE as u32,
            total_blocks: self.geometry.num_blocks,
            free_blocks: self.free_block_count(),
            total_inodes: self.geometry.num_inodes,
            free_inodes: self.free_inode_count(),
        }
    }
}
