//! Inode and block allocator
//!
//! Both tables keep their free entries on a singly linked list threaded
//! through the free records themselves, with head and count in the
//! superblock. Allocation pops the head and freeing pushes onto it.

use thiserror::Error;

use crate::fs::ArenaFs;
use crate::hook::MutationHook;
use crate::inode::{Attr, BlockNo, FileKind, InodeNo, Payload};
use crate::layout::NIL;

/// Table an allocation was drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Inodes,
    Blocks,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Inodes => f.write_str("inodes"),
            Resource::Blocks => f.write_str("blocks"),
        }
    }
}

/// Allocator error type
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("No free {0} available")]
    Exhausted(Resource),
}

impl<H: MutationHook> ArenaFs<H> {
    /// Pop the head of the inode free list
    ///
    /// The inode is still marked free on return; the caller initializes it.
    pub fn alloc_inode(&mut self) -> Result<InodeNo, AllocError> {
        let head = self.inode_free_head();
        if head == NIL {
            log::warn!("ALLOC: no free inodes available");
            return Err(AllocError::Exhausted(Resource::Inodes));
        }
        if head >= self.geometry.num_inodes {
            log::error!("ALLOC: inode free list head {} out of range", head);
            panic!("corrupt inode free list: head {} out of range", head);
        }

        let ino = InodeNo(head);
        let next = match self.payload(ino) {
            Payload::Free { next } => next,
            other => {
                log::error!("ALLOC: {} on the free list has kind {:?}", ino, other.kind());
                panic!("corrupt inode free list: {} is {:?}", ino, other.kind());
            }
        };
        let count = self.free_inode_count() - 1;
        self.set_inode_free_list(next.map_or(NIL, |n| n.0), count);
        log::debug!("ALLOC: allocated {} ({} inodes left)", ino, count);
        Ok(ino)
    }

    /// Push `ino` onto the inode free list, invalidating outstanding handles
    pub fn free_inode(&mut self, ino: InodeNo) {
        let old = self.attr(ino);
        assert_ne!(old.kind, FileKind::Free, "double free of {}", ino);

        let head = self.inode_free_head();
        self.put_attr(ino, &Attr::free(old.generation.wrapping_add(1)));
        let next = if head == NIL { None } else { Some(InodeNo(head)) };
        self.set_payload(ino, &Payload::Free { next });

        let count = self.free_inode_count() + 1;
        self.set_inode_free_list(ino.0, count);
        log::debug!("ALLOC: freed {} ({} inodes free)", ino, count);
    }

    /// Pop the head of the block free list
    ///
    /// The block's contents are left as they were, apart from the link word.
    pub fn alloc_block(&mut self) -> Result<BlockNo, AllocError> {
        let head = self.block_free_head();
        if head == NIL {
            log::warn!("ALLOC: no free blocks available");
            return Err(AllocError::Exhausted(Resource::Blocks));
        }
        if head >= self.geometry.num_blocks {
            log::error!("ALLOC: block free list head {} out of range", head);
            panic!("corrupt block free list: head {} out of range", head);
        }

        let next = self.arena.read_u32(self.geometry.block_offset(head));
        let count = self.free_block_count() - 1;
        self.set_block_free_list(next, count);
        log::debug!("ALLOC: allocated block {} ({} blocks left)", head, count);
        Ok(BlockNo(head))
    }

    /// Push `block` onto the block free list
    pub fn free_block(&mut self, block: BlockNo) {
        let head = self.block_free_head();
        assert_ne!(head, block.0, "double free of {}", block);
        self.arena.write_u32(self.geometry.block_offset(block.0), head);

        let count = self.free_block_count() + 1;
        assert!(count <= self.geometry.num_blocks, "block free count overflow");
        self.set_block_free_list(block.0, count);
        log::debug!("ALLOC: freed {} ({} blocks free)", block, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{OpContext, Timestamp};
    use crate::hook::DirtyPages;
    use crate::layout::{PAGE_SIZE, SB_FREE_BLOCKS};

    fn fresh() -> ArenaFs<DirtyPages> {
        let ctx = OpContext::root(Timestamp::new(10, 0));
        ArenaFs::format(vec![0u8; 64 * PAGE_SIZE], 32, DirtyPages::new(), &ctx).unwrap()
    }

    #[test]
    fn test_alloc_pops_in_order_and_free_pushes() {
        let mut fs = fresh();
        let a = fs.alloc_block().unwrap();
        let b = fs.alloc_block().unwrap();
        assert_eq!((a, b), (BlockNo(0), BlockNo(1)));

        fs.free_block(a);
        assert_eq!(fs.alloc_block().unwrap(), a);
    }

    #[test]
    fn test_free_list_updates_are_declared() {
        let mut fs = fresh();
        fs.hook_mut().take();
        let block = fs.alloc_block().unwrap();
        assert!(fs.hook().contains((SB_FREE_BLOCKS / PAGE_SIZE) as u32));

        fs.hook_mut().take();
        fs.free_block(block);
        let block_page = fs.geometry().block_table_page + block.0;
        assert!(fs.hook().contains(block_page));
        assert!(fs.hook().contains(0));
    }

    #[test]
    fn test_inode_exhaustion() {
        let mut fs = fresh();
        // 64 pages / 32 = 2 inode pages = 16 inodes, root already taken
        for _ in 0..15 {
            let ino = fs.alloc_inode().unwrap();
            fs.update_attr(ino, |a| a.kind = FileKind::Regular);
        }
        assert_eq!(fs.free_inode_count(), 0);
        assert_eq!(fs.alloc_inode(), Err(AllocError::Exhausted(Resource::Inodes)));
    }

    #[test]
    fn test_free_inode_bumps_generation() {
        let mut fs = fresh();
        let ino = fs.alloc_inode().unwrap();
        fs.update_attr(ino, |a| a.kind = FileKind::Regular);
        let generation = fs.attr(ino).generation;

        fs.free_inode(ino);
        let attr = fs.attr(ino);
        assert_eq!(attr.kind, FileKind::Free);
        assert_eq!(attr.generation, generation + 1);
        assert_eq!(fs.alloc_inode().unwrap(), ino);
    }
}
