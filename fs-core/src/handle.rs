//! Opaque file handles handed to clients
//!
//! A handle names an inode together with the generation it had when the
//! handle was issued. Freeing an inode bumps its generation, so handles from
//! before a free-and-reuse cycle stop resolving.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};
use crate::fs::ArenaFs;
use crate::hook::MutationHook;
use crate::inode::{FileKind, InodeNo};

/// Size of a handle on the wire
pub const HANDLE_SIZE: usize = 32;

/// Client-visible reference to an inode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub ino: u32,
    pub generation: u32,
}

impl Handle {
    /// Wire form: inode and generation, zero padded
    pub fn encode(&self) -> [u8; HANDLE_SIZE] {
        let mut buf = [0u8; HANDLE_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.ino);
        LittleEndian::write_u32(&mut buf[4..8], self.generation);
        buf
    }

    /// Parse a wire handle; anything malformed is stale
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HANDLE_SIZE || bytes[8..].iter().any(|&b| b != 0) {
            return Err(FsError::Stale);
        }
        Ok(Self {
            ino: LittleEndian::read_u32(&bytes[0..4]),
            generation: LittleEndian::read_u32(&bytes[4..8]),
        })
    }
}

impl<H: MutationHook> ArenaFs<H> {
    /// Resolve a handle to a live inode
    pub fn handle_to_ref(&self, handle: &Handle) -> Result<InodeNo> {
        if handle.ino >= self.geometry.num_inodes {
            return Err(FsError::Stale);
        }
        let ino = InodeNo(handle.ino);
        let attr = self.attr(ino);
        if attr.kind == FileKind::Free || attr.generation != handle.generation {
            return Err(FsError::Stale);
        }
        Ok(ino)
    }

    /// Handle for a live inode
    pub fn ref_to_handle(&self, ino: InodeNo) -> Handle {
        Handle {
            ino: ino.0,
            generation: self.attr(ino).generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{OpContext, Timestamp};
    use crate::fs::ROOT_INO;
    use crate::hook::NoopHook;
    use crate::layout::PAGE_SIZE;

    #[test]
    fn test_handle_wire_form() {
        let handle = Handle {
            ino: 17,
            generation: 3,
        };
        let bytes = handle.encode();
        assert_eq!(Handle::decode(&bytes).unwrap(), handle);

        let mut padded = bytes;
        padded[20] = 1;
        assert!(matches!(Handle::decode(&padded), Err(FsError::Stale)));
        assert!(matches!(Handle::decode(&bytes[..8]), Err(FsError::Stale)));
    }

    #[test]
    fn test_reuse_makes_old_handle_stale() {
        let ctx = OpContext::root(Timestamp::new(1, 0));
        let mut fs = ArenaFs::format(vec![0u8; 64 * PAGE_SIZE], 32, NoopHook, &ctx).unwrap();
        let file = fs.create_file(&ctx).unwrap();
        fs.link(ROOT_INO, b"f", file, &ctx).unwrap();
        let old = fs.ref_to_handle(file);
        assert_eq!(fs.handle_to_ref(&old).unwrap(), file);

        fs.unlink(ROOT_INO, b"f", false, &ctx).unwrap();
        assert!(matches!(fs.handle_to_ref(&old), Err(FsError::Stale)));

        let reused = fs.create_file(&ctx).unwrap();
        assert_eq!(reused, file);
        assert!(matches!(fs.handle_to_ref(&old), Err(FsError::Stale)));
        assert_eq!(fs.handle_to_ref(&fs.ref_to_handle(reused)).unwrap(), reused);
    }

    #[test]
    fn test_out_of_range_handle_is_stale() {
        let ctx = OpContext::root(Timestamp::new(1, 0));
        let fs = ArenaFs::format(vec![0u8; 64 * PAGE_SIZE], 32, NoopHook, &ctx).unwrap();
        let bogus = Handle {
            ino: fs.geometry().num_inodes,
            generation: 0,
        };
        assert!(matches!(fs.handle_to_ref(&bogus), Err(FsError::Stale)));
    }
}
