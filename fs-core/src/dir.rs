//! Directory engine
//!
//! A directory's entries are stored compactly: indices `0..size` are valid,
//! the first six inline in the inode, the next 64 in the first overflow block
//! and the last 64 in the second. Overflow blocks are allocated on first use
//! and released as soon as removals leave them empty.

use crate::context::OpContext;
use crate::error::{FsError, NoSpaceCause, Result};
use crate::fs::ArenaFs;
use crate::hook::MutationHook;
use crate::inode::{Attr, BlockNo, DirEntry, FileKind, InodeNo, Payload};
use crate::layout::{
    DIR_ENTRIES_PER_BLOCK, DIR_ENTRY_SIZE, DIR_INLINE_HEADER, INLINE_SIZE, MAX_DIR_ENTRIES,
    MAX_NAME_LEN, NUM_INLINE_DIR_ENTRIES,
};

/// Entries a directory can hold before it needs its second overflow block
const FIRST_OVERFLOW_LIMIT: usize = NUM_INLINE_DIR_ENTRIES + DIR_ENTRIES_PER_BLOCK;

pub(crate) fn is_dot_or_dotdot(name: &[u8]) -> bool {
    name == b"." || name == b".."
}

impl<H: MutationHook> ArenaFs<H> {
    fn expect_dir(&self, dir: InodeNo) -> Result<Attr> {
        let attr = self.attr(dir);
        if attr.kind != FileKind::Directory {
            return Err(FsError::NotDir);
        }
        Ok(attr)
    }

    /// Region (0 inline, 1 or 2 overflow) and slot within it for an entry index
    fn entry_region(index: usize) -> (usize, usize) {
        if index < NUM_INLINE_DIR_ENTRIES {
            (0, index)
        } else if index < FIRST_OVERFLOW_LIMIT {
            (1, index - NUM_INLINE_DIR_ENTRIES)
        } else {
            (2, index - FIRST_OVERFLOW_LIMIT)
        }
    }

    /// Byte offset of entry `index`; the region holding it must already exist
    fn entry_offset(&self, dir: InodeNo, index: usize) -> usize {
        assert!(index < MAX_DIR_ENTRIES, "directory index {} out of range", index);
        match Self::entry_region(index) {
            (0, slot) => self.inline_offset(dir) + DIR_INLINE_HEADER + slot * DIR_ENTRY_SIZE,
            (region, slot) => {
                let block = match self.dir_overflow(dir)[region - 1] {
                    Some(block) => block,
                    None => {
                        log::error!("DIR: {} entry {} lies in a missing overflow block", dir, index);
                        panic!("{} has no overflow block {} for entry {}", dir, region, index);
                    }
                };
                self.geometry.block_offset(block.0) + slot * DIR_ENTRY_SIZE
            }
        }
    }

    /// Position of `name` in `dir`
    ///
    /// Scans inline entries first, then the overflow blocks, and never looks
    /// past the recorded entry count.
    pub fn lookup_index(&self, dir: InodeNo, name: &[u8]) -> Result<usize> {
        let attr = self.expect_dir(dir)?;
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        (0..attr.size as usize)
            .find(|&index| {
                let offset = self.entry_offset(dir, index);
                DirEntry::raw_matches(self.arena.read(offset, DIR_ENTRY_SIZE), name)
            })
            .ok_or(FsError::NotFound)
    }

    /// Child inode named `name` in `dir`
    pub fn lookup(&self, dir: InodeNo, name: &[u8]) -> Result<InodeNo> {
        let index = self.lookup_index(dir, name)?;
        let offset = self.entry_offset(dir, index);
        Ok(DirEntry::decode(self.arena.read(offset, DIR_ENTRY_SIZE)).ino)
    }

    /// Entry at `index`, or `None` past the end; never allocates
    pub fn entry_at(&self, dir: InodeNo, index: usize) -> Option<DirEntry> {
        let attr = self.attr(dir);
        if attr.kind != FileKind::Directory || index >= attr.size as usize {
            return None;
        }
        let offset = self.entry_offset(dir, index);
        Some(DirEntry::decode(self.arena.read(offset, DIR_ENTRY_SIZE)))
    }

    /// All entries of `dir`, in index order
    pub fn entries(&self, dir: InodeNo) -> Vec<DirEntry> {
        let size = self.attr(dir).size as usize;
        (0..size).filter_map(|index| self.entry_at(dir, index)).collect()
    }

    /// Whether adding one entry to `dir` needs an overflow block that does not exist yet
    pub(crate) fn needs_overflow_block(&self, dir: InodeNo) -> bool {
        let size = self.attr(dir).size as usize;
        let overflow = self.dir_overflow(dir);
        (size == NUM_INLINE_DIR_ENTRIES && overflow[0].is_none())
            || (size == FIRST_OVERFLOW_LIMIT && overflow[1].is_none())
    }

    /// Append an entry without touching the child's link count
    pub(crate) fn push_entry(
        &mut self,
        dir: InodeNo,
        name: &[u8],
        child: InodeNo,
        ctx: &OpContext,
    ) -> Result<()> {
        let attr = self.attr(dir);
        let index = attr.size as usize;
        if index >= MAX_DIR_ENTRIES {
            return Err(FsError::NoSpace(NoSpaceCause::DirectoryFull));
        }

        let (region, _) = Self::entry_region(index);
        let mut blocks = attr.blocks;
        if region > 0 {
            let mut overflow = self.dir_overflow(dir);
            if overflow[region - 1].is_none() {
                let block = self.alloc_block()?;
                overflow[region - 1] = Some(block);
                self.set_payload(dir, &Payload::Directory { overflow });
                blocks += 1;
                log::debug!("DIR: {} grew overflow block {} ({})", dir, region, block);
            }
        }

        let offset = self.entry_offset(dir, index);
        self.arena.write(offset, &DirEntry::new(child, name).encode());
        self.update_attr(dir, |a| {
            a.size += 1;
            a.blocks = blocks;
            a.mtime = ctx.now;
            a.ctime = ctx.now;
        });
        Ok(())
    }

    /// Add `name -> child` to `dir` and count the new link on the child
    pub fn link(&mut self, dir: InodeNo, name: &[u8], child: InodeNo, ctx: &OpContext) -> Result<()> {
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        match self.lookup_index(dir, name) {
            Ok(_) => return Err(FsError::Exist),
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }

        self.push_entry(dir, name, child, ctx)?;
        self.update_attr(child, |a| {
            a.nlink += 1;
            a.ctime = ctx.now;
        });
        log::debug!(
            "DIR: linked {:?} -> {} in {}",
            String::from_utf8_lossy(name),
            child,
            dir
        );
        Ok(())
    }

    /// Rewrite the child inode of the entry at `index`, keeping its name
    pub(crate) fn retarget_entry(&mut self, dir: InodeNo, index: usize, child: InodeNo, ctx: &OpContext) {
        let offset = self.entry_offset(dir, index);
        self.arena.write_u32(offset, child.0);
        self.update_attr(dir, |a| {
            a.mtime = ctx.now;
            a.ctime = ctx.now;
        });
    }

    /// Remove entry `index` by moving the last entry into its slot
    pub(crate) fn detach(&mut self, dir: InodeNo, index: usize, ctx: &OpContext) {
        let attr = self.attr(dir);
        let last = attr.size as usize - 1;
        assert!(index <= last, "detach of {} entry {} past the end", dir, index);
        if index != last {
            let moved = self.arena.read(self.entry_offset(dir, last), DIR_ENTRY_SIZE).to_vec();
            let offset = self.entry_offset(dir, index);
            self.arena.write(offset, &moved);
        }

        let size = last;
        let mut overflow = self.dir_overflow(dir);
        let mut released: Vec<BlockNo> = Vec::new();
        if size <= FIRST_OVERFLOW_LIMIT {
            released.extend(overflow[1].take());
        }
        if size <= NUM_INLINE_DIR_ENTRIES {
            released.extend(overflow[0].take());
        }
        if !released.is_empty() {
            self.set_payload(dir, &Payload::Directory { overflow });
            for block in &released {
                self.free_block(*block);
                log::debug!("DIR: {} released overflow {}", dir, block);
            }
        }

        self.update_attr(dir, |a| {
            a.size = size as u64;
            a.blocks -= released.len() as u32;
            a.mtime = ctx.now;
            a.ctime = ctx.now;
        });
    }

    /// Drop one link from `child`, freeing it once nothing refers to it
    ///
    /// A directory whose count falls to one is only referenced by its own "."
    /// entry: it is swept, and the link its ".." entry held on its parent is
    /// returned.
    pub(crate) fn release_link(&mut self, child: InodeNo, ctx: &OpContext) {
        let attr = self.update_attr(child, |a| {
            a.nlink = a.nlink.saturating_sub(1);
            a.ctime = ctx.now;
        });

        match attr.kind {
            FileKind::Directory if attr.nlink <= 1 => {
                if let Ok(parent) = self.lookup(child, b"..") {
                    if parent != child {
                        self.update_attr(parent, |a| {
                            a.nlink = a.nlink.saturating_sub(1);
                            a.ctime = ctx.now;
                        });
                    }
                }
                let overflow = self.dir_overflow(child);
                for block in overflow.into_iter().flatten() {
                    self.free_block(block);
                }
                self.free_inode(child);
                log::debug!("DIR: swept orphaned directory {}", child);
            }
            FileKind::Regular if attr.nlink == 0 => {
                self.release_file_data(child);
                self.free_inode(child);
            }
            FileKind::Symlink if attr.nlink == 0 => self.free_inode(child),
            _ => {}
        }
    }

    /// Remove `name` from `dir`
    ///
    /// `expect_dir` selects rmdir semantics: the target must be an empty
    /// directory. Otherwise the target must not be a directory.
    pub fn unlink(&mut self, dir: InodeNo, name: &[u8], expect_dir: bool, ctx: &OpContext) -> Result<()> {
        let index = self.lookup_index(dir, name)?;
        let offset = self.entry_offset(dir, index);
        let child = DirEntry::decode(self.arena.read(offset, DIR_ENTRY_SIZE)).ino;
        let child_attr = self.attr(child);

        let is_dir = child_attr.kind == FileKind::Directory;
        if expect_dir && !is_dir {
            return Err(FsError::NotDir);
        }
        if !expect_dir && is_dir {
            return Err(FsError::IsDir);
        }
        if is_dot_or_dotdot(name) {
            return Err(FsError::Access);
        }
        if expect_dir && child_attr.size != 2 {
            return Err(FsError::NotEmpty);
        }

        self.detach(dir, index, ctx);
        self.release_link(child, ctx);
        log::debug!(
            "DIR: unlinked {:?} ({}) from {}",
            String::from_utf8_lossy(name),
            child,
            dir
        );
        Ok(())
    }

    /// Allocate an inode and give it fresh attributes, keeping its generation
    fn init_inode(&mut self, kind: FileKind, mode: u32, ctx: &OpContext) -> Result<InodeNo> {
        let ino = self.alloc_inode()?;
        let generation = self.attr(ino).generation;
        self.put_attr(
            ino,
            &Attr {
                kind,
                mode,
                nlink: 0,
                uid: ctx.uid,
                gid: ctx.gid,
                size: 0,
                blocks: 0,
                generation,
                atime: ctx.now,
                mtime: ctx.now,
                ctime: ctx.now,
            },
        );
        Ok(ino)
    }

    /// Create a directory holding "." and ".."
    ///
    /// With no parent the new directory is the root and its ".." names
    /// itself; that is only valid while formatting, when it lands on inode 0.
    pub fn create_dir(&mut self, parent: Option<InodeNo>, ctx: &OpContext) -> Result<InodeNo> {
        let ino = self.init_inode(FileKind::Directory, 0o755, ctx)?;
        self.set_payload(
            ino,
            &Payload::Directory {
                overflow: [None, None],
            },
        );
        self.link(ino, b".", ino, ctx)?;
        self.link(ino, b"..", parent.unwrap_or(ino), ctx)?;
        log::debug!("DIR: created directory {}", ino);
        Ok(ino)
    }

    /// Create an empty regular file with no links
    pub fn create_file(&mut self, ctx: &OpContext) -> Result<InodeNo> {
        let ino = self.init_inode(FileKind::Regular, 0o644, ctx)?;
        self.set_payload(ino, &Payload::Regular { overflow: None });
        log::debug!("DIR: created file {}", ino);
        Ok(ino)
    }

    /// Create a symbolic link holding `target` inline
    pub fn create_symlink(&mut self, target: &[u8], ctx: &OpContext) -> Result<InodeNo> {
        if target.len() > INLINE_SIZE {
            return Err(FsError::NameTooLong);
        }
        let ino = self.init_inode(FileKind::Symlink, 0o777, ctx)?;
        self.update_attr(ino, |a| a.size = target.len() as u64);
        self.set_payload(
            ino,
            &Payload::Symlink {
                target: target.to_vec(),
            },
        );
        log::debug!("DIR: created symlink {}", ino);
        Ok(ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Timestamp;
    use crate::fs::ROOT_INO;
    use crate::hook::NoopHook;
    use crate::layout::PAGE_SIZE;
    use std::collections::BTreeSet;

    fn ctx() -> OpContext {
        OpContext::new(Timestamp::new(100, 0), 1000, 1000)
    }

    fn fresh(pages: usize) -> ArenaFs<NoopHook> {
        ArenaFs::format(vec![0u8; pages * PAGE_SIZE], 8, NoopHook, &ctx()).unwrap()
    }

    fn names(fs: &ArenaFs<NoopHook>, dir: InodeNo) -> BTreeSet<Vec<u8>> {
        fs.entries(dir).into_iter().map(|e| e.name).collect()
    }

    #[test]
    fn test_root_has_dot_entries() {
        let fs = fresh(64);
        assert_eq!(fs.lookup(ROOT_INO, b".").unwrap(), ROOT_INO);
        assert_eq!(fs.lookup(ROOT_INO, b"..").unwrap(), ROOT_INO);
        assert!(matches!(fs.lookup(ROOT_INO, b"missing"), Err(FsError::NotFound)));
        assert!(fs.entry_at(ROOT_INO, 2).is_none());
    }

    #[test]
    fn test_link_rejects_duplicates_and_long_names() {
        let mut fs = fresh(64);
        let file = fs.create_file(&ctx()).unwrap();
        fs.link(ROOT_INO, b"a", file, &ctx()).unwrap();
        assert!(matches!(fs.link(ROOT_INO, b"a", file, &ctx()), Err(FsError::Exist)));

        let long = vec![b'x'; MAX_NAME_LEN + 1];
        assert!(matches!(fs.link(ROOT_INO, &long, file, &ctx()), Err(FsError::NameTooLong)));
        let longest = vec![b'y'; MAX_NAME_LEN];
        fs.link(ROOT_INO, &longest, file, &ctx()).unwrap();
        assert_eq!(fs.lookup(ROOT_INO, &longest).unwrap(), file);
        assert_eq!(fs.attr(file).nlink, 2);
    }

    #[test]
    fn test_overflow_blocks_come_and_go() {
        let mut fs = fresh(128);
        let file = fs.create_file(&ctx()).unwrap();
        let free_before = fs.free_block_count();

        for i in 0..(MAX_DIR_ENTRIES - 2) {
            fs.link(ROOT_INO, format!("f{}", i).as_bytes(), file, &ctx()).unwrap();
        }
        assert_eq!(fs.attr(ROOT_INO).size as usize, MAX_DIR_ENTRIES);
        assert_eq!(fs.attr(ROOT_INO).blocks, 2);
        assert_eq!(fs.free_block_count(), free_before - 2);
        assert!(matches!(
            fs.link(ROOT_INO, b"one-too-many", file, &ctx()),
            Err(FsError::NoSpace(NoSpaceCause::DirectoryFull))
        ));

        for i in 0..(MAX_DIR_ENTRIES - 2) {
            fs.unlink(ROOT_INO, format!("f{}", i).as_bytes(), false, &ctx()).unwrap();
        }
        assert_eq!(fs.attr(ROOT_INO).size, 2);
        assert_eq!(fs.attr(ROOT_INO).blocks, 0);
        assert_eq!(fs.dir_overflow(ROOT_INO), [None, None]);
        // The last unlink dropped the file's final link and freed it
        assert_eq!(fs.attr(file).kind, FileKind::Free);
        assert_eq!(fs.free_block_count(), free_before);
    }

    #[test]
    fn test_unlink_compacts_entries() {
        let mut fs = fresh(64);
        let file = fs.create_file(&ctx()).unwrap();
        for name in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            fs.link(ROOT_INO, name.as_bytes(), file, &ctx()).unwrap();
        }
        let mut expected = names(&fs, ROOT_INO);

        fs.unlink(ROOT_INO, b"c", false, &ctx()).unwrap();
        expected.remove(b"c".as_slice());
        assert_eq!(names(&fs, ROOT_INO), expected);
        assert_eq!(fs.attr(ROOT_INO).size, 9);
        // Entry "h" moved from the overflow block into the freed inline slot
        assert_eq!(fs.lookup_index(ROOT_INO, b"h").unwrap(), 4);
        assert_eq!(fs.attr(ROOT_INO).blocks, 1);
    }

    #[test]
    fn test_unlink_error_order() {
        let mut fs = fresh(64);
        let sub = fs.create_dir(Some(ROOT_INO), &ctx()).unwrap();
        fs.link(ROOT_INO, b"sub", sub, &ctx()).unwrap();
        let file = fs.create_file(&ctx()).unwrap();
        fs.link(sub, b"inner", file, &ctx()).unwrap();

        assert!(matches!(fs.unlink(ROOT_INO, b"nope", false, &ctx()), Err(FsError::NotFound)));
        assert!(matches!(fs.unlink(ROOT_INO, b"sub", false, &ctx()), Err(FsError::IsDir)));
        assert!(matches!(fs.unlink(sub, b"inner", true, &ctx()), Err(FsError::NotDir)));
        assert!(matches!(fs.unlink(ROOT_INO, b".", true, &ctx()), Err(FsError::Access)));
        assert!(matches!(fs.unlink(ROOT_INO, b"..", true, &ctx()), Err(FsError::Access)));
        assert!(matches!(fs.unlink(ROOT_INO, b"sub", true, &ctx()), Err(FsError::NotEmpty)));
        assert!(matches!(fs.unlink(file, b"x", false, &ctx()), Err(FsError::NotDir)));
    }

    #[test]
    fn test_rmdir_returns_parent_link() {
        let mut fs = fresh(64);
        assert_eq!(fs.attr(ROOT_INO).nlink, 2);

        let sub = fs.create_dir(Some(ROOT_INO), &ctx()).unwrap();
        fs.link(ROOT_INO, b"sub", sub, &ctx()).unwrap();
        assert_eq!(fs.attr(sub).nlink, 2);
        assert_eq!(fs.attr(ROOT_INO).nlink, 3);

        let free_inodes = fs.free_inode_count();
        fs.unlink(ROOT_INO, b"sub", true, &ctx()).unwrap();
        assert_eq!(fs.attr(ROOT_INO).nlink, 2);
        assert_eq!(fs.attr(sub).kind, FileKind::Free);
        assert_eq!(fs.free_inode_count(), free_inodes + 1);
    }

    #[test]
    fn test_symlink_target_inline() {
        let mut fs = fresh(64);
        let link = fs.create_symlink(b"/etc/hosts", &ctx()).unwrap();
        assert_eq!(
            fs.payload(link),
            Payload::Symlink {
                target: b"/etc/hosts".to_vec()
            }
        );
        let huge = vec![b'a'; INLINE_SIZE + 1];
        assert!(matches!(fs.create_symlink(&huge, &ctx()), Err(FsError::NameTooLong)));
    }
}
