//! Error types for the byzfs storage engine
//!
//! Every failure the engine reports is an expected, client-facing outcome.
//! Corruption reached through a bug (a broken free list, an unknown inode
//! kind, a write aimed at the zero page) is not represented here: those paths
//! panic instead of returning.

use serde::Serialize;
use thiserror::Error;

use crate::alloc::{AllocError, Resource};
use crate::backing::StoreError;

/// Why an operation ran out of room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoSpaceCause {
    /// The inode free list is empty
    Inodes,
    /// The block free list is empty
    Blocks,
    /// The directory already holds the maximum number of entries
    DirectoryFull,
    /// The file would exceed inline plus overflow block capacity
    FileTooLarge,
    /// A single transfer larger than one block
    TransferTooLarge,
}

impl std::fmt::Display for NoSpaceCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            NoSpaceCause::Inodes => "no free inodes",
            NoSpaceCause::Blocks => "no free blocks",
            NoSpaceCause::DirectoryFull => "directory too big",
            NoSpaceCause::FileTooLarge => "file too big",
            NoSpaceCause::TransferTooLarge => "transfer larger than one block",
        };
        f.write_str(text)
    }
}

/// Engine error type
#[derive(Error, Debug)]
pub enum FsError {
    #[error("No space left: {0}")]
    NoSpace(NoSpaceCause),
    #[error("Stale file handle")]
    Stale,
    #[error("No such file or directory")]
    NotFound,
    #[error("File exists")]
    Exist,
    #[error("Not a directory")]
    NotDir,
    #[error("Is a directory")]
    IsDir,
    #[error("Directory not empty")]
    NotEmpty,
    #[error("Name too long")]
    NameTooLong,
    #[error("Access denied")]
    Access,
    #[error("Operation does not apply to this file type")]
    WrongType,
    #[error("Invalid arena geometry: {0}")]
    InvalidGeometry(String),
    #[error("Invalid superblock: {0}")]
    InvalidSuperblock(String),
    #[error("Backing store error: {0}")]
    Store(#[from] StoreError),
}

impl From<AllocError> for FsError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::Exhausted(Resource::Inodes) => FsError::NoSpace(NoSpaceCause::Inodes),
            AllocError::Exhausted(Resource::Blocks) => FsError::NoSpace(NoSpaceCause::Blocks),
        }
    }
}

/// Wire-level status vocabulary a dispatcher renders into replies.
///
/// The numbering follows NFS version 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    Perm = 1,
    NoEnt = 2,
    Io = 5,
    Access = 13,
    Exist = 17,
    NotDir = 20,
    IsDir = 21,
    FBig = 27,
    NoSpc = 28,
    NameTooLong = 63,
    NotEmpty = 66,
    Stale = 70,
}

impl Status {
    /// Numeric wire code
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl FsError {
    /// Map onto the wire status a dispatcher sends back
    pub fn status(&self) -> Status {
        match self {
            FsError::NoSpace(_) => Status::NoSpc,
            FsError::Stale => Status::Stale,
            FsError::NotFound => Status::NoEnt,
            FsError::Exist => Status::Exist,
            FsError::NotDir => Status::NotDir,
            FsError::IsDir => Status::IsDir,
            FsError::NotEmpty => Status::NotEmpty,
            FsError::NameTooLong => Status::NameTooLong,
            FsError::Access => Status::Access,
            FsError::WrongType => Status::Io,
            FsError::InvalidGeometry(_) | FsError::InvalidSuperblock(_) | FsError::Store(_) => {
                Status::Io
            }
        }
    }
}

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_exhaustion_maps_to_no_space() {
        let err: FsError = AllocError::Exhausted(Resource::Blocks).into();
        assert!(matches!(err, FsError::NoSpace(NoSpaceCause::Blocks)));
        assert_eq!(err.status(), Status::NoSpc);
        assert_eq!(err.status().code(), 28);
    }

    #[test]
    fn test_client_errors_have_distinct_statuses() {
        assert_eq!(FsError::Stale.status().code(), 70);
        assert_eq!(FsError::NotEmpty.status().code(), 66);
        assert_eq!(FsError::NameTooLong.status().code(), 63);
        assert_eq!(FsError::WrongType.status(), Status::Io);
        assert_eq!(
            FsError::NoSpace(NoSpaceCause::DirectoryFull).to_string(),
            "No space left: directory too big"
        );
    }
}
