//! Dispatcher-facing file service
//!
//! One method per protocol operation. Each takes handles, resolves them
//! through the handle translator, drives the directory and file engines and
//! returns attributes in the shape a wire dispatcher renders. Requests that
//! would fail are rejected before the first mutation wherever the failure
//! can be predicted.

use serde::Serialize;
use std::borrow::Cow;

use crate::config::EngineConfig;
use crate::context::{OpContext, Timestamp};
use crate::dir::is_dot_or_dotdot;
use crate::error::{FsError, NoSpaceCause, Result};
use crate::file::blocks_for;
use crate::fs::{ArenaFs, FsStats, ROOT_INO};
use crate::handle::Handle;
use crate::hook::MutationHook;
use crate::inode::{Attr, FileKind, InodeNo, Payload};
use crate::layout::{
    INLINE_SIZE, MAX_DIR_ENTRIES, MAX_FILE_SIZE, MAX_NAME_LEN, NUM_INLINE_BLOCKS, PAGE_SIZE,
};

/// Clients reserve file ids 0 through 2
const FILEID_BASE: u32 = 2;
/// File system id reported in every attribute set
const FSID: u32 = 1;
/// Reply bytes charged per readdir entry on top of its name
const READDIR_ENTRY_OVERHEAD: u32 = 40;

const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

/// Attributes as reported to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAttr {
    pub kind: FileKind,
    /// Type and permission bits
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub block_size: u32,
    pub rdev: u32,
    pub blocks: u32,
    pub fsid: u32,
    pub fileid: u32,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

impl FileAttr {
    fn from_attr(ino: InodeNo, attr: &Attr) -> Self {
        let type_bits = match attr.kind {
            FileKind::Directory => S_IFDIR,
            FileKind::Regular => S_IFREG,
            FileKind::Symlink => S_IFLNK,
            FileKind::Free => 0,
        };
        Self {
            kind: attr.kind,
            mode: type_bits | (attr.mode & 0o7777),
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            size: attr.size,
            block_size: PAGE_SIZE as u32,
            rdev: 0,
            blocks: attr.blocks,
            fsid: FSID,
            fileid: ino.0 + FILEID_BASE,
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
        }
    }
}

/// Attribute changes requested by setattr, create, mkdir and symlink
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<Timestamp>,
    pub mtime: Option<Timestamp>,
}

/// Handle and attributes of a looked-up or newly created object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirOpReply {
    pub handle: Handle,
    pub attr: FileAttr,
}

#[derive(Debug)]
pub struct ReadReply<'a> {
    pub data: Cow<'a, [u8]>,
    pub attr: FileAttr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadDirEntry {
    pub fileid: u32,
    pub name: Vec<u8>,
    /// Resume point for the next readdir
    pub cookie: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadDirReply {
    pub entries: Vec<ReadDirEntry>,
    pub eof: bool,
}

/// File service over an arena file system
#[derive(Debug)]
pub struct FileService<H> {
    fs: ArenaFs<H>,
    track_access_time: bool,
}

impl<H: MutationHook> FileService<H> {
    pub fn new(fs: ArenaFs<H>, config: &EngineConfig) -> Self {
        Self {
            fs,
            track_access_time: config.track_access_time,
        }
    }

    pub fn fs(&self) -> &ArenaFs<H> {
        &self.fs
    }

    pub fn fs_mut(&mut self) -> &mut ArenaFs<H> {
        &mut self.fs
    }

    pub fn into_inner(self) -> ArenaFs<H> {
        self.fs
    }

    pub fn root_handle(&self) -> Handle {
        self.fs.ref_to_handle(ROOT_INO)
    }

    fn file_attr(&self, ino: InodeNo) -> FileAttr {
        FileAttr::from_attr(ino, &self.fs.attr(ino))
    }

    fn reply(&self, ino: InodeNo) -> DirOpReply {
        DirOpReply {
            handle: self.fs.ref_to_handle(ino),
            attr: self.file_attr(ino),
        }
    }

    fn resolve_dir(&self, handle: &Handle) -> Result<InodeNo> {
        let dir = self.fs.handle_to_ref(handle)?;
        if self.fs.kind(dir) != FileKind::Directory {
            return Err(FsError::NotDir);
        }
        Ok(dir)
    }

    fn touch_atime(&mut self, ino: InodeNo, ctx: &OpContext) {
        if self.track_access_time {
            self.fs.update_attr(ino, |a| a.atime = ctx.now);
        }
    }

    /// Reject a new entry `name` in `dir` before anything is allocated
    fn check_insert(&self, dir: InodeNo, name: &[u8], inodes: u32, blocks: u32) -> Result<()> {
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        match self.fs.lookup_index(dir, name) {
            Ok(_) => return Err(FsError::Exist),
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }
        if self.fs.attr(dir).size as usize >= MAX_DIR_ENTRIES {
            return Err(FsError::NoSpace(NoSpaceCause::DirectoryFull));
        }
        if self.fs.free_inode_count() < inodes {
            return Err(FsError::NoSpace(NoSpaceCause::Inodes));
        }
        let blocks = blocks + self.fs.needs_overflow_block(dir) as u32;
        if self.fs.free_block_count() < blocks {
            return Err(FsError::NoSpace(NoSpaceCause::Blocks));
        }
        Ok(())
    }

    /// Apply requested attributes; size only affects regular files
    fn apply(&mut self, ino: InodeNo, changes: &SetAttr, ctx: &OpContext) -> Result<()> {
        if let Some(size) = changes.size {
            if self.fs.kind(ino) == FileKind::Regular {
                self.fs.truncate(ino, size, ctx)?;
            }
        }
        self.fs.update_attr(ino, |a| {
            if let Some(mode) = changes.mode {
                a.mode = mode & 0o7777;
            }
            if let Some(uid) = changes.uid {
                a.uid = uid;
            }
            if let Some(gid) = changes.gid {
                a.gid = gid;
            }
            if let Some(atime) = changes.atime {
                a.atime = atime;
            }
            if let Some(mtime) = changes.mtime {
                a.mtime = mtime;
            }
            a.ctime = ctx.now;
        });
        Ok(())
    }

    pub fn getattr(&self, handle: &Handle) -> Result<FileAttr> {
        let ino = self.fs.handle_to_ref(handle)?;
        Ok(self.file_attr(ino))
    }

    pub fn setattr(&mut self, handle: &Handle, changes: &SetAttr, ctx: &OpContext) -> Result<FileAttr> {
        let ino = self.fs.handle_to_ref(handle)?;
        self.apply(ino, changes, ctx)?;
        Ok(self.file_attr(ino))
    }

    pub fn lookup(&mut self, dir: &Handle, name: &[u8], ctx: &OpContext) -> Result<DirOpReply> {
        let dir = self.resolve_dir(dir)?;
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        let child = self.fs.lookup(dir, name)?;
        self.touch_atime(dir, ctx);
        Ok(self.reply(child))
    }

    pub fn readlink(&mut self, handle: &Handle, ctx: &OpContext) -> Result<Vec<u8>> {
        let ino = self.fs.handle_to_ref(handle)?;
        match self.fs.payload(ino) {
            Payload::Symlink { target } => {
                self.touch_atime(ino, ctx);
                Ok(target)
            }
            _ => Err(FsError::WrongType),
        }
    }

    pub fn read(&mut self, handle: &Handle, offset: u64, count: u32, ctx: &OpContext) -> Result<ReadReply<'_>> {
        let ino = self.fs.handle_to_ref(handle)?;
        if self.fs.kind(ino) != FileKind::Regular {
            return Err(FsError::WrongType);
        }
        self.touch_atime(ino, ctx);
        let attr = self.file_attr(ino);
        Ok(ReadReply {
            data: self.fs.read(ino, offset, count),
            attr,
        })
    }

    pub fn write(&mut self, handle: &Handle, offset: u64, data: &[u8], ctx: &OpContext) -> Result<FileAttr> {
        let ino = self.fs.handle_to_ref(handle)?;
        if self.fs.kind(ino) != FileKind::Regular {
            return Err(FsError::WrongType);
        }
        self.fs.write(ino, offset, data, ctx)?;
        Ok(self.file_attr(ino))
    }

    pub fn create(
        &mut self,
        dir: &Handle,
        name: &[u8],
        attrs: &SetAttr,
        ctx: &OpContext,
    ) -> Result<DirOpReply> {
        let dir = self.resolve_dir(dir)?;
        let size = attrs.size.unwrap_or(0);
        if size > MAX_FILE_SIZE {
            return Err(FsError::NoSpace(NoSpaceCause::FileTooLarge));
        }
        let pointer_block = (blocks_for(size) > NUM_INLINE_BLOCKS) as u32;
        self.check_insert(dir, name, 1, pointer_block)?;

        let file = self.fs.create_file(ctx)?;
        self.fs.link(dir, name, file, ctx)?;
        self.apply(file, attrs, ctx)?;
        log::debug!("SERVICE: created {:?} as {}", String::from_utf8_lossy(name), file);
        Ok(self.reply(file))
    }

    pub fn mkdir(
        &mut self,
        dir: &Handle,
        name: &[u8],
        attrs: &SetAttr,
        ctx: &OpContext,
    ) -> Result<DirOpReply> {
        let parent = self.resolve_dir(dir)?;
        self.check_insert(parent, name, 1, 0)?;

        let child = self.fs.create_dir(Some(parent), ctx)?;
        self.fs.link(parent, name, child, ctx)?;
        self.apply(child, attrs, ctx)?;
        log::debug!("SERVICE: made directory {:?} as {}", String::from_utf8_lossy(name), child);
        Ok(self.reply(child))
    }

    pub fn symlink(
        &mut self,
        dir: &Handle,
        name: &[u8],
        target: &[u8],
        attrs: &SetAttr,
        ctx: &OpContext,
    ) -> Result<DirOpReply> {
        let dir = self.resolve_dir(dir)?;
        if target.len() > INLINE_SIZE {
            return Err(FsError::NameTooLong);
        }
        self.check_insert(dir, name, 1, 0)?;

        let link = self.fs.create_symlink(target, ctx)?;
        self.fs.link(dir, name, link, ctx)?;
        self.apply(link, attrs, ctx)?;
        Ok(self.reply(link))
    }

    pub fn remove(&mut self, dir: &Handle, name: &[u8], ctx: &OpContext) -> Result<()> {
        let dir = self.resolve_dir(dir)?;
        self.fs.unlink(dir, name, false, ctx)
    }

    pub fn rmdir(&mut self, dir: &Handle, name: &[u8], ctx: &OpContext) -> Result<()> {
        let dir = self.resolve_dir(dir)?;
        self.fs.unlink(dir, name, true, ctx)
    }

    /// Add a hard link to a non-directory
    pub fn link(&mut self, target: &Handle, dir: &Handle, name: &[u8], ctx: &OpContext) -> Result<()> {
        let target = self.fs.handle_to_ref(target)?;
        if self.fs.kind(target) == FileKind::Directory {
            return Err(FsError::IsDir);
        }
        let dir = self.resolve_dir(dir)?;
        self.fs.link(dir, name, target, ctx)
    }

    /// Whether `dir` is `ancestor` or lies below it
    fn is_within(&self, ancestor: InodeNo, mut dir: InodeNo) -> bool {
        for _ in 0..self.fs.geometry().num_inodes {
            if dir == ancestor {
                return true;
            }
            if dir == ROOT_INO {
                return false;
            }
            match self.fs.lookup(dir, b"..") {
                Ok(parent) => dir = parent,
                Err(_) => return false,
            }
        }
        false
    }

    pub fn rename(
        &mut self,
        from_dir: &Handle,
        from_name: &[u8],
        to_dir: &Handle,
        to_name: &[u8],
        ctx: &OpContext,
    ) -> Result<()> {
        let from_dir = self.resolve_dir(from_dir)?;
        let to_dir = self.resolve_dir(to_dir)?;
        if from_name.len() > MAX_NAME_LEN || to_name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        if is_dot_or_dotdot(from_name) || is_dot_or_dotdot(to_name) {
            return Err(FsError::Access);
        }
        let child = self.fs.lookup(from_dir, from_name)?;
        if from_dir == to_dir && from_name == to_name {
            return Ok(());
        }

        let child_is_dir = self.fs.kind(child) == FileKind::Directory;
        if child_is_dir && self.is_within(child, to_dir) {
            return Err(FsError::Access);
        }

        let existing = match self.fs.lookup(to_dir, to_name) {
            Ok(target) => Some(target),
            Err(FsError::NotFound) => None,
            Err(e) => return Err(e),
        };
        match existing {
            // Both names already refer to the same object
            Some(target) if target == child => return Ok(()),
            Some(target) => {
                let target_attr = self.fs.attr(target);
                let target_is_dir = target_attr.kind == FileKind::Directory;
                if child_is_dir && !target_is_dir {
                    return Err(FsError::NotDir);
                }
                if !child_is_dir && target_is_dir {
                    return Err(FsError::IsDir);
                }
                if target_is_dir && target_attr.size != 2 {
                    return Err(FsError::NotEmpty);
                }
            }
            None => {
                if self.fs.attr(to_dir).size as usize >= MAX_DIR_ENTRIES {
                    return Err(FsError::NoSpace(NoSpaceCause::DirectoryFull));
                }
                if self.fs.needs_overflow_block(to_dir) && self.fs.free_block_count() == 0 {
                    return Err(FsError::NoSpace(NoSpaceCause::Blocks));
                }
            }
        }

        match existing {
            Some(target) => {
                let index = self.fs.lookup_index(to_dir, to_name)?;
                self.fs.retarget_entry(to_dir, index, child, ctx);
                self.fs.release_link(target, ctx);
            }
            None => self.fs.push_entry(to_dir, to_name, child, ctx)?,
        }
        let index = self.fs.lookup_index(from_dir, from_name)?;
        self.fs.detach(from_dir, index, ctx);

        if child_is_dir && from_dir != to_dir {
            let dotdot = self.fs.lookup_index(child, b"..")?;
            self.fs.retarget_entry(child, dotdot, to_dir, ctx);
            self.fs.update_attr(from_dir, |a| a.nlink -= 1);
            self.fs.update_attr(to_dir, |a| a.nlink += 1);
        }
        self.fs.update_attr(child, |a| a.ctime = ctx.now);
        log::debug!(
            "SERVICE: renamed {:?} in {} to {:?} in {}",
            String::from_utf8_lossy(from_name),
            from_dir,
            String::from_utf8_lossy(to_name),
            to_dir
        );
        Ok(())
    }

    /// List entries of `dir` from index `cookie`, within `max_bytes` of reply
    pub fn readdir(&self, dir: &Handle, cookie: u32, max_bytes: u32) -> Result<ReadDirReply> {
        let dir = self.resolve_dir(dir)?;
        let size = self.fs.attr(dir).size as u32;
        let mut entries = Vec::new();
        let mut used = 0u32;
        let mut index = cookie;
        let eof = loop {
            if index >= size {
                break true;
            }
            let entry = match self.fs.entry_at(dir, index as usize) {
                Some(entry) => entry,
                None => break true,
            };
            let cost = READDIR_ENTRY_OVERHEAD + entry.name.len() as u32;
            if used + cost > max_bytes && !entries.is_empty() {
                break false;
            }
            index += 1;
            used += cost;
            entries.push(ReadDirEntry {
                fileid: entry.ino.0 + FILEID_BASE,
                name: entry.name,
                cookie: index,
            });
        };
        Ok(ReadDirReply { entries, eof })
    }

    pub fn statfs(&self) -> FsStats {
        self.fs.statfs()
    }
}
