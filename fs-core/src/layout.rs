//! Arena layout definitions for byzfs
//!
//! The arena is a run of 4 KiB pages partitioned once, at format time:
//!
//! | pages                 | contents                          |
//! |-----------------------|-----------------------------------|
//! | 0                     | superblock                        |
//! | 1 ..= N/divisor       | inode table (8 inodes per page)   |
//! | next                  | shared zero block                 |
//! | remainder             | block table                       |
//!
//! Records refer to each other by table index, never by address, so an
//! arena image can be mapped anywhere.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::error::{FsError, Result};

/// Page (and block) size in bytes
pub const PAGE_SIZE: usize = 4096;

/// Size of one inode record
pub const INODE_SIZE: usize = 512;
/// Size of the attribute header at the start of every inode
pub const ATTR_SIZE: usize = 64;
/// Size of the inline data area following the attributes
pub const INLINE_SIZE: usize = INODE_SIZE - ATTR_SIZE;
/// Inodes stored in one page of the inode table
pub const INODES_PER_PAGE: usize = PAGE_SIZE / INODE_SIZE;

/// Size of one directory entry
pub const DIR_ENTRY_SIZE: usize = 64;
/// Longest name a directory entry can hold
pub const MAX_NAME_LEN: usize = DIR_ENTRY_SIZE - 5;
/// Bytes at the start of a directory's inline area holding its two overflow block slots
pub const DIR_INLINE_HEADER: usize = 8;
/// Directory entries stored inline in the inode
pub const NUM_INLINE_DIR_ENTRIES: usize = (INLINE_SIZE - DIR_INLINE_HEADER) / DIR_ENTRY_SIZE;
/// Directory entries stored in one overflow block
pub const DIR_ENTRIES_PER_BLOCK: usize = PAGE_SIZE / DIR_ENTRY_SIZE;
/// Largest directory: inline entries plus two overflow blocks
pub const MAX_DIR_ENTRIES: usize = NUM_INLINE_DIR_ENTRIES + 2 * DIR_ENTRIES_PER_BLOCK;

/// Block pointers stored inline in a regular file's inode
pub const NUM_INLINE_BLOCKS: usize = INLINE_SIZE / 4 - 1;
/// Byte offset, within the inline area, of a file's overflow pointer block slot
pub const FILE_OVERFLOW_SLOT: usize = NUM_INLINE_BLOCKS * 4;
/// Block pointers stored in a file's overflow pointer block
pub const POINTERS_PER_BLOCK: usize = PAGE_SIZE / 4;
/// Largest file, in blocks
pub const MAX_FILE_BLOCKS: usize = NUM_INLINE_BLOCKS + POINTERS_PER_BLOCK;
/// Largest file, in bytes
pub const MAX_FILE_SIZE: u64 = (MAX_FILE_BLOCKS * PAGE_SIZE) as u64;

/// Encoding of an absent reference
pub const NIL: u32 = u32::MAX;
/// Encoding of a reference to the shared zero block
pub const ZERO_REF: u32 = u32::MAX - 1;

/// Smallest arena accepted by format
pub const MIN_PAGES: u32 = 64;
/// Default ratio of total pages to inode table pages
pub const DEFAULT_INODE_PAGE_DIVISOR: u32 = 32;

/// Magic number for byzfs arenas
const BYZFS_MAGIC: &[u8; 8] = b"BYZFS\x00\x00\x00";
/// Current arena format version
const FS_VERSION: u32 = 1;

/// Byte offsets of the superblock fields that change after format
pub(crate) const SB_NUM_PAGES: usize = 12;
pub(crate) const SB_FREE_INODES: usize = 24;
pub(crate) const SB_INODE_FREE_HEAD: usize = 28;
pub(crate) const SB_FREE_BLOCKS: usize = 44;
pub(crate) const SB_BLOCK_FREE_HEAD: usize = 48;

/// Encoded superblock size
pub const SUPERBLOCK_SIZE: usize = 52;

/// Fixed arena geometry, derived once at format and re-derived at mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Total pages in the arena
    pub num_pages: u32,
    /// First page of the inode table (always 1)
    pub inode_table_page: u32,
    /// Pages in the inode table
    pub num_inode_pages: u32,
    /// Inodes in the table
    pub num_inodes: u32,
    /// Page holding the shared zero block
    pub zero_page: u32,
    /// First page of the block table
    pub block_table_page: u32,
    /// Blocks in the table
    pub num_blocks: u32,
}

impl Geometry {
    /// Partition `num_pages` pages, reserving `num_pages / divisor` for inodes
    pub fn compute(num_pages: u32, divisor: u32) -> Result<Self> {
        if num_pages < MIN_PAGES {
            return Err(FsError::InvalidGeometry(format!(
                "{} pages is below the minimum of {}",
                num_pages, MIN_PAGES
            )));
        }
        if divisor < 2 || divisor > num_pages / 2 {
            return Err(FsError::InvalidGeometry(format!(
                "inode page divisor {} is out of range for {} pages",
                divisor, num_pages
            )));
        }

        let num_inode_pages = num_pages / divisor;
        let zero_page = 1 + num_inode_pages;
        Ok(Self {
            num_pages,
            inode_table_page: 1,
            num_inode_pages,
            num_inodes: num_inode_pages * INODES_PER_PAGE as u32,
            zero_page,
            block_table_page: zero_page + 1,
            num_blocks: num_pages - num_inode_pages - 2,
        })
    }

    /// Size of the arena in bytes
    pub fn arena_len(&self) -> usize {
        self.num_pages as usize * PAGE_SIZE
    }

    /// Byte offset of an inode record
    pub fn inode_offset(&self, ino: u32) -> usize {
        assert!(
            ino < self.num_inodes,
            "inode {} outside table of {}",
            ino,
            self.num_inodes
        );
        self.inode_table_page as usize * PAGE_SIZE + ino as usize * INODE_SIZE
    }

    /// Byte offset of a block in the block table
    pub fn block_offset(&self, block: u32) -> usize {
        assert!(
            block < self.num_blocks,
            "block {} outside table of {}",
            block,
            self.num_blocks
        );
        (self.block_table_page + block) as usize * PAGE_SIZE
    }

    /// Byte offset of the shared zero block
    pub fn zero_offset(&self) -> usize {
        self.zero_page as usize * PAGE_SIZE
    }
}

/// Arena superblock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Magic number (BYZFS\0\0\0)
    pub magic: [u8; 8],
    /// Arena format version
    pub version: u32,
    /// Total pages; zero marks an arena that was never formatted
    pub num_pages: u32,
    /// First inode table page
    pub inode_table_page: u32,
    /// Inodes in the table
    pub num_inodes: u32,
    /// Inodes on the free list
    pub free_inodes: u32,
    /// Head of the inode free list (NIL when empty)
    pub inode_free_head: u32,
    /// Page holding the shared zero block
    pub zero_page: u32,
    /// First block table page
    pub block_table_page: u32,
    /// Blocks in the table
    pub num_blocks: u32,
    /// Blocks on the free list
    pub free_blocks: u32,
    /// Head of the block free list (NIL when empty)
    pub block_free_head: u32,
}

impl Superblock {
    /// Superblock for a freshly partitioned arena with both free lists empty
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            magic: *BYZFS_MAGIC,
            version: FS_VERSION,
            num_pages: geometry.num_pages,
            inode_table_page: geometry.inode_table_page,
            num_inodes: geometry.num_inodes,
            free_inodes: 0,
            inode_free_head: NIL,
            zero_page: geometry.zero_page,
            block_table_page: geometry.block_table_page,
            num_blocks: geometry.num_blocks,
            free_blocks: 0,
            block_free_head: NIL,
        }
    }

    /// Write the superblock fields to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.num_pages)?;
        writer.write_u32::<LittleEndian>(self.inode_table_page)?;
        writer.write_u32::<LittleEndian>(self.num_inodes)?;
        writer.write_u32::<LittleEndian>(self.free_inodes)?;
        writer.write_u32::<LittleEndian>(self.inode_free_head)?;
        writer.write_u32::<LittleEndian>(self.zero_page)?;
        writer.write_u32::<LittleEndian>(self.block_table_page)?;
        writer.write_u32::<LittleEndian>(self.num_blocks)?;
        writer.write_u32::<LittleEndian>(self.free_blocks)?;
        writer.write_u32::<LittleEndian>(self.block_free_head)?;
        Ok(())
    }

    /// Encode into the fixed on-arena representation
    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        self.write_to(&mut Cursor::new(&mut buf[..]))
            .expect("fixed-size buffer");
        buf
    }

    /// Decode from the start of page 0
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        Self::read_from(&mut reader).map_err(|e| FsError::InvalidSuperblock(e.to_string()))
    }

    /// Read the superblock fields from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        Ok(Self {
            magic,
            version: reader.read_u32::<LittleEndian>()?,
            num_pages: reader.read_u32::<LittleEndian>()?,
            inode_table_page: reader.read_u32::<LittleEndian>()?,
            num_inodes: reader.read_u32::<LittleEndian>()?,
            free_inodes: reader.read_u32::<LittleEndian>()?,
            inode_free_head: reader.read_u32::<LittleEndian>()?,
            zero_page: reader.read_u32::<LittleEndian>()?,
            block_table_page: reader.read_u32::<LittleEndian>()?,
            num_blocks: reader.read_u32::<LittleEndian>()?,
            free_blocks: reader.read_u32::<LittleEndian>()?,
            block_free_head: reader.read_u32::<LittleEndian>()?,
        })
    }

    /// Check the superblock against the region it was read from and derive the geometry
    pub fn validate(&self, region_len: usize) -> Result<Geometry> {
        if &self.magic != BYZFS_MAGIC {
            return Err(FsError::InvalidSuperblock("invalid magic number".to_string()));
        }
        if self.version != FS_VERSION {
            return Err(FsError::InvalidSuperblock(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if self.num_pages as usize * PAGE_SIZE > region_len {
            return Err(FsError::InvalidSuperblock(format!(
                "superblock claims {} pages but the region holds {}",
                self.num_pages,
                region_len / PAGE_SIZE
            )));
        }

        let num_inode_pages = self.zero_page.wrapping_sub(1);
        let geometry = Geometry {
            num_pages: self.num_pages,
            inode_table_page: 1,
            num_inode_pages,
            num_inodes: num_inode_pages.wrapping_mul(INODES_PER_PAGE as u32),
            zero_page: self.zero_page,
            block_table_page: self.zero_page.wrapping_add(1),
            num_blocks: self
                .num_pages
                .wrapping_sub(num_inode_pages)
                .wrapping_sub(2),
        };

        let consistent = self.inode_table_page == 1
            && num_inode_pages >= 1
            && self.num_pages > num_inode_pages + 2
            && geometry.num_inodes == self.num_inodes
            && geometry.block_table_page == self.block_table_page
            && geometry.num_blocks == self.num_blocks
            && self.free_inodes <= self.num_inodes
            && self.free_blocks <= self.num_blocks;
        if !consistent {
            return Err(FsError::InvalidSuperblock(format!(
                "inconsistent geometry: {:?}",
                self
            )));
        }
        Ok(geometry)
    }
}
