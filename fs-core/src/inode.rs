//! Inode records and their on-arena encoding
//!
//! An inode is a 64-byte attribute header followed by a 448-byte inline area.
//! The inline area is interpreted according to the inode's kind; [`Payload`]
//! is the checked view of the kind-specific slots it holds.

use arrayref::{array_ref, array_refs};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Cursor, Read, Write};

use crate::context::Timestamp;
use crate::fs::ArenaFs;
use crate::hook::MutationHook;
use crate::layout::{
    ATTR_SIZE, DIR_ENTRY_SIZE, FILE_OVERFLOW_SLOT, INLINE_SIZE, MAX_NAME_LEN, NIL, ZERO_REF,
};

/// Index into the inode table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNo(pub u32);

/// Index into the block table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNo(pub u32);

impl std::fmt::Display for InodeNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "inode {}", self.0)
    }
}

impl std::fmt::Display for BlockNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block {}", self.0)
    }
}

/// Target of a file block pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockRef {
    /// The shared zero block; the region owns no storage yet
    Zero,
    /// A data block owned by the file
    Data(BlockNo),
}

impl BlockRef {
    pub(crate) fn to_raw(self) -> u32 {
        match self {
            BlockRef::Zero => ZERO_REF,
            BlockRef::Data(block) => block.0,
        }
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        match raw {
            ZERO_REF => BlockRef::Zero,
            NIL => {
                log::error!("INODE: file block pointer holds the nil reference");
                panic!("file block pointer holds the nil reference");
            }
            n => BlockRef::Data(BlockNo(n)),
        }
    }
}

/// Inode kind, stored as the first word of the attribute header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum FileKind {
    Free = 0,
    Regular = 1,
    Directory = 2,
    Symlink = 5,
}

impl FileKind {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(FileKind::Free),
            1 => Some(FileKind::Regular),
            2 => Some(FileKind::Directory),
            5 => Some(FileKind::Symlink),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Decoded attribute header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub kind: FileKind,
    /// Permission bits only; the type bits are derived from `kind`
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    /// Bytes for files and symlinks, entries for directories
    pub size: u64,
    /// Block slots for files, overflow blocks for directories
    pub blocks: u32,
    /// Incremented each time the inode is freed
    pub generation: u32,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

impl Attr {
    /// Attributes of a never-used inode
    pub fn free(generation: u32) -> Self {
        Self {
            kind: FileKind::Free,
            mode: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            size: 0,
            blocks: 0,
            generation,
            atime: Timestamp::default(),
            mtime: Timestamp::default(),
            ctime: Timestamp::default(),
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.kind.code())?;
        writer.write_u32::<LittleEndian>(self.mode)?;
        writer.write_u32::<LittleEndian>(self.nlink)?;
        writer.write_u32::<LittleEndian>(self.uid)?;
        writer.write_u32::<LittleEndian>(self.gid)?;
        writer.write_u64::<LittleEndian>(self.size)?;
        writer.write_u32::<LittleEndian>(self.blocks)?;
        writer.write_u32::<LittleEndian>(self.generation)?;
        for ts in [self.atime, self.mtime, self.ctime] {
            writer.write_u32::<LittleEndian>(ts.sec)?;
            writer.write_u32::<LittleEndian>(ts.usec)?;
        }
        Ok(())
    }

    /// Read a header; an unknown kind code is reported as `InvalidData`
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let code = reader.read_u32::<LittleEndian>()?;
        let kind = FileKind::from_code(code).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, format!("unknown inode kind {}", code))
        })?;
        let mode = reader.read_u32::<LittleEndian>()?;
        let nlink = reader.read_u32::<LittleEndian>()?;
        let uid = reader.read_u32::<LittleEndian>()?;
        let gid = reader.read_u32::<LittleEndian>()?;
        let size = reader.read_u64::<LittleEndian>()?;
        let blocks = reader.read_u32::<LittleEndian>()?;
        let generation = reader.read_u32::<LittleEndian>()?;
        let mut times = [Timestamp::default(); 3];
        for ts in times.iter_mut() {
            ts.sec = reader.read_u32::<LittleEndian>()?;
            ts.usec = reader.read_u32::<LittleEndian>()?;
        }
        Ok(Self {
            kind,
            mode,
            nlink,
            uid,
            gid,
            size,
            blocks,
            generation,
            atime: times[0],
            mtime: times[1],
            ctime: times[2],
        })
    }

    pub fn encode(&self) -> [u8; ATTR_SIZE] {
        let mut buf = [0u8; ATTR_SIZE];
        self.write_to(&mut Cursor::new(&mut buf[..]))
            .expect("fixed-size buffer");
        buf
    }
}

/// Kind-specific slots of the inline area
///
/// Directory entries and file block pointers also live inline; they are
/// reached through the directory and file engines, not through this view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Free { next: Option<InodeNo> },
    Directory { overflow: [Option<BlockNo>; 2] },
    Regular { overflow: Option<BlockNo> },
    Symlink { target: Vec<u8> },
}

impl Payload {
    pub fn kind(&self) -> FileKind {
        match self {
            Payload::Free { .. } => FileKind::Free,
            Payload::Directory { .. } => FileKind::Directory,
            Payload::Regular { .. } => FileKind::Regular,
            Payload::Symlink { .. } => FileKind::Symlink,
        }
    }
}

fn decode_opt(raw: u32) -> Option<u32> {
    if raw == NIL {
        None
    } else {
        Some(raw)
    }
}

fn encode_opt(value: Option<u32>) -> u32 {
    value.unwrap_or(NIL)
}

/// One directory entry: child inode, name length, name bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: InodeNo,
    pub name: Vec<u8>,
}

impl DirEntry {
    pub fn new(ino: InodeNo, name: &[u8]) -> Self {
        Self {
            ino,
            name: name.to_vec(),
        }
    }

    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        assert!(self.name.len() <= MAX_NAME_LEN);
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.ino.0);
        buf[4] = self.name.len() as u8;
        buf[5..5 + self.name.len()].copy_from_slice(&self.name);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let raw = array_ref![bytes, 0, DIR_ENTRY_SIZE];
        let (ino, len, name) = array_refs![raw, 4, 1, MAX_NAME_LEN];
        let len = len[0] as usize;
        if len > MAX_NAME_LEN {
            log::error!("INODE: directory entry name length {} out of range", len);
            panic!("corrupt directory entry: name length {}", len);
        }
        Self {
            ino: InodeNo(LittleEndian::read_u32(ino)),
            name: name[..len].to_vec(),
        }
    }

    /// Whether the entry matches `name` without decoding it
    pub(crate) fn raw_matches(bytes: &[u8], name: &[u8]) -> bool {
        bytes[4] as usize == name.len() && &bytes[5..5 + name.len()] == name
    }
}

impl<H: MutationHook> ArenaFs<H> {
    /// Byte offset of an inode's inline area
    pub(crate) fn inline_offset(&self, ino: InodeNo) -> usize {
        self.geometry.inode_offset(ino.0) + ATTR_SIZE
    }

    /// Decode an inode's attribute header
    pub fn attr(&self, ino: InodeNo) -> Attr {
        let offset = self.geometry.inode_offset(ino.0);
        let bytes = self.arena.read(offset, ATTR_SIZE);
        match Attr::read_from(&mut Cursor::new(bytes)) {
            Ok(attr) => attr,
            Err(e) => {
                log::error!("INODE: {} has a corrupt header: {}", ino, e);
                panic!("corrupt header in {}: {}", ino, e);
            }
        }
    }

    pub fn kind(&self, ino: InodeNo) -> FileKind {
        self.attr(ino).kind
    }

    pub(crate) fn put_attr(&mut self, ino: InodeNo, attr: &Attr) {
        let offset = self.geometry.inode_offset(ino.0);
        self.arena.write(offset, &attr.encode());
    }

    /// Read-modify-write an inode's attribute header
    pub(crate) fn update_attr<F>(&mut self, ino: InodeNo, f: F) -> Attr
    where
        F: FnOnce(&mut Attr),
    {
        let mut attr = self.attr(ino);
        f(&mut attr);
        self.put_attr(ino, &attr);
        attr
    }

    /// Kind-specific inline slots, interpreted by the inode's current kind
    pub fn payload(&self, ino: InodeNo) -> Payload {
        let attr = self.attr(ino);
        let base = self.inline_offset(ino);
        match attr.kind {
            FileKind::Free => Payload::Free {
                next: decode_opt(self.arena.read_u32(base)).map(InodeNo),
            },
            FileKind::Directory => Payload::Directory {
                overflow: [
                    decode_opt(self.arena.read_u32(base)).map(BlockNo),
                    decode_opt(self.arena.read_u32(base + 4)).map(BlockNo),
                ],
            },
            FileKind::Regular => Payload::Regular {
                overflow: decode_opt(self.arena.read_u32(base + FILE_OVERFLOW_SLOT)).map(BlockNo),
            },
            FileKind::Symlink => {
                let len = (attr.size as usize).min(INLINE_SIZE);
                Payload::Symlink {
                    target: self.arena.read(base, len).to_vec(),
                }
            }
        }
    }

    /// Write kind-specific inline slots; the payload must match the inode's kind
    pub(crate) fn set_payload(&mut self, ino: InodeNo, payload: &Payload) {
        let kind = self.kind(ino);
        assert_eq!(
            kind,
            payload.kind(),
            "payload kind does not match {} of kind {:?}",
            ino,
            kind
        );
        let base = self.inline_offset(ino);
        match payload {
            Payload::Free { next } => {
                self.arena.write_u32(base, encode_opt(next.map(|n| n.0)));
            }
            Payload::Directory { overflow } => {
                let mut buf = [0u8; 8];
                LittleEndian::write_u32(&mut buf[0..4], encode_opt(overflow[0].map(|b| b.0)));
                LittleEndian::write_u32(&mut buf[4..8], encode_opt(overflow[1].map(|b| b.0)));
                self.arena.write(base, &buf);
            }
            Payload::Regular { overflow } => {
                self.arena
                    .write_u32(base + FILE_OVERFLOW_SLOT, encode_opt(overflow.map(|b| b.0)));
            }
            Payload::Symlink { target } => {
                assert!(target.len() <= INLINE_SIZE);
                self.arena.write(base, target);
            }
        }
    }

    /// Overflow block slots of a directory
    pub(crate) fn dir_overflow(&self, dir: InodeNo) -> [Option<BlockNo>; 2] {
        match self.payload(dir) {
            Payload::Directory { overflow } => overflow,
            other => panic!("{} is not a directory: {:?}", dir, other.kind()),
        }
    }

    /// Overflow pointer block of a regular file
    pub(crate) fn file_overflow(&self, file: InodeNo) -> Option<BlockNo> {
        match self.payload(file) {
            Payload::Regular { overflow } => overflow,
            other => panic!("{} is not a regular file: {:?}", file, other.kind()),
        }
    }
}
