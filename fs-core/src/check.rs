//! Offline consistency check
//!
//! Walks both free lists and every live inode, and reports each violation of
//! the structural invariants found. Nothing is repaired.

use serde::Serialize;

use crate::file::blocks_for;
use crate::fs::{ArenaFs, ROOT_INO};
use crate::hook::MutationHook;
use crate::inode::{BlockNo, FileKind, InodeNo, Payload};
use crate::layout::{
    DIR_ENTRIES_PER_BLOCK, INLINE_SIZE, MAX_DIR_ENTRIES, NIL, NUM_INLINE_DIR_ENTRIES, ZERO_REF,
};

/// Outcome of a consistency check
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub total_inodes: u32,
    pub live_inodes: u32,
    pub free_listed_inodes: u32,
    pub total_blocks: u32,
    pub live_blocks: u32,
    pub free_listed_blocks: u32,
    pub problems: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    FreeList,
    Inode(InodeNo),
}

impl<H: MutationHook> ArenaFs<H> {
    /// Verify allocator conservation, block ownership and directory structure
    pub fn check(&self) -> CheckReport {
        let num_inodes = self.geometry.num_inodes;
        let num_blocks = self.geometry.num_blocks;
        let mut report = CheckReport {
            total_inodes: num_inodes,
            total_blocks: num_blocks,
            ..Default::default()
        };

        // Inode free list
        let mut on_list = vec![false; num_inodes as usize];
        let mut cursor = self.inode_free_head();
        while cursor != NIL {
            if cursor >= num_inodes {
                report.problems.push(format!("inode free list reaches out-of-range {}", cursor));
                break;
            }
            if on_list[cursor as usize] {
                report.problems.push(format!("inode free list cycles at {}", cursor));
                break;
            }
            on_list[cursor as usize] = true;
            report.free_listed_inodes += 1;
            match self.payload(InodeNo(cursor)) {
                Payload::Free { next } => cursor = next.map_or(NIL, |n| n.0),
                other => {
                    report.problems.push(format!(
                        "inode {} is on the free list but has kind {:?}",
                        cursor,
                        other.kind()
                    ));
                    break;
                }
            }
        }

        // Block free list
        let mut owner: Vec<Option<Owner>> = vec![None; num_blocks as usize];
        let mut cursor = self.block_free_head();
        while cursor != NIL {
            if cursor == ZERO_REF {
                report.problems.push("block free list reaches the zero block".to_string());
                break;
            }
            if cursor >= num_blocks {
                report.problems.push(format!("block free list reaches out-of-range {}", cursor));
                break;
            }
            if owner[cursor as usize].is_some() {
                report.problems.push(format!("block free list cycles at {}", cursor));
                break;
            }
            owner[cursor as usize] = Some(Owner::FreeList);
            report.free_listed_blocks += 1;
            cursor = self.arena.read_u32(self.geometry.block_offset(cursor));
        }

        // Live inodes, their blocks and the links that reach them
        let mut links = vec![0u32; num_inodes as usize];
        let mut claim = |report: &mut CheckReport, block: BlockNo, ino: InodeNo| {
            if block.0 >= num_blocks {
                report.problems.push(format!("{} references out-of-range {}", ino, block));
                return;
            }
            match owner[block.0 as usize] {
                None => owner[block.0 as usize] = Some(Owner::Inode(ino)),
                Some(Owner::FreeList) => {
                    report.problems.push(format!("{} uses free {}", ino, block));
                }
                Some(Owner::Inode(other)) => {
                    report
                        .problems
                        .push(format!("{} is referenced by both {} and {}", block, other, ino));
                }
            }
        };

        for i in 0..num_inodes {
            let ino = InodeNo(i);
            let attr = self.attr(ino);
            if attr.kind == FileKind::Free {
                if !on_list[i as usize] {
                    report.problems.push(format!("free {} is missing from the free list", ino));
                }
                continue;
            }
            report.live_inodes += 1;

            match attr.kind {
                FileKind::Directory => {
                    let size = attr.size as usize;
                    if size > MAX_DIR_ENTRIES {
                        report.problems.push(format!("directory {} holds {} entries", ino, size));
                        continue;
                    }
                    let overflow = self.dir_overflow(ino);
                    let needed = [
                        size > NUM_INLINE_DIR_ENTRIES,
                        size > NUM_INLINE_DIR_ENTRIES + DIR_ENTRIES_PER_BLOCK,
                    ];
                    let mut missing = false;
                    for (slot, need) in overflow.iter().zip(needed) {
                        match slot {
                            Some(block) => claim(&mut report, *block, ino),
                            None if need => missing = true,
                            None => {}
                        }
                    }
                    if missing {
                        report.problems.push(format!("directory {} lacks an overflow block", ino));
                        continue;
                    }
                    if attr.blocks as usize != overflow.iter().flatten().count() {
                        report.problems.push(format!("directory {} block count is {}", ino, attr.blocks));
                    }

                    let entries = self.entries(ino);
                    match entries.first() {
                        Some(dot) if dot.name == b"." && dot.ino == ino => {}
                        _ => report.problems.push(format!("directory {} lacks \".\"", ino)),
                    }
                    match entries.get(1) {
                        Some(dotdot) if dotdot.name == b".." => {
                            if ino == ROOT_INO && dotdot.ino != ROOT_INO {
                                report.problems.push("root \"..\" does not name the root".to_string());
                            }
                        }
                        _ => report.problems.push(format!("directory {} lacks \"..\"", ino)),
                    }
                    for entry in &entries {
                        if entry.ino.0 >= num_inodes {
                            report.problems.push(format!(
                                "directory {} entry {:?} names out-of-range {}",
                                ino,
                                String::from_utf8_lossy(&entry.name),
                                entry.ino
                            ));
                            continue;
                        }
                        if self.kind(entry.ino) == FileKind::Free {
                            report.problems.push(format!(
                                "directory {} entry {:?} names free {}",
                                ino,
                                String::from_utf8_lossy(&entry.name),
                                entry.ino
                            ));
                        }
                        links[entry.ino.0 as usize] += 1;
                    }
                }
                FileKind::Regular => {
                    if attr.blocks as usize != blocks_for(attr.size) {
                        report.problems.push(format!(
                            "file {} covers {} blocks for {} bytes",
                            ino, attr.blocks, attr.size
                        ));
                        continue;
                    }
                    for block in self.owned_blocks(ino) {
                        claim(&mut report, block, ino);
                    }
                }
                FileKind::Symlink => {
                    if attr.size as usize > INLINE_SIZE {
                        report.problems.push(format!("symlink {} is {} bytes", ino, attr.size));
                    }
                }
                FileKind::Free => unreachable!(),
            }
        }

        for i in 0..num_inodes {
            let ino = InodeNo(i);
            let attr = self.attr(ino);
            if attr.kind != FileKind::Free && attr.nlink != links[i as usize] {
                report.problems.push(format!(
                    "{} has link count {} but {} entries name it",
                    ino, attr.nlink, links[i as usize]
                ));
            }
        }

        report.live_blocks = owner
            .iter()
            .filter(|o| matches!(o, Some(Owner::Inode(_))))
            .count() as u32;
        for (block, o) in owner.iter().enumerate() {
            if o.is_none() {
                report.problems.push(format!("block {} is neither free nor owned", block));
            }
        }

        let sb = self.superblock();
        if sb.free_inodes != report.free_listed_inodes {
            report.problems.push(format!(
                "superblock counts {} free inodes, list holds {}",
                sb.free_inodes, report.free_listed_inodes
            ));
        }
        if sb.free_blocks != report.free_listed_blocks {
            report.problems.push(format!(
                "superblock counts {} free blocks, list holds {}",
                sb.free_blocks, report.free_listed_blocks
            ));
        }
        if report.free_listed_inodes + report.live_inodes != num_inodes {
            report.problems.push(format!(
                "inode conservation: {} free + {} live != {}",
                report.free_listed_inodes, report.live_inodes, num_inodes
            ));
        }
        if report.free_listed_blocks + report.live_blocks != num_blocks {
            report.problems.push(format!(
                "block conservation: {} free + {} live != {}",
                report.free_listed_blocks, report.live_blocks, num_blocks
            ));
        }

        if report.is_clean() {
            log::debug!(
                "CHECK: clean, {} live inodes, {} live blocks",
                report.live_inodes,
                report.live_blocks
            );
        } else {
            log::warn!("CHECK: {} problems found", report.problems.len());
        }
        report
    }
}
