//! byzfs core - storage engine for a Byzantine-fault-tolerant replicated file service
//!
//! The whole file system lives in one contiguous region, the arena, which the
//! replication runtime checkpoints and compares across replicas. Every write
//! to the arena is declared to a [`MutationHook`] before it happens.
//!
//! Layering, bottom up:
//! - [`arena`] and [`layout`]: the region, its page partition and superblock
//! - [`alloc`]: inode and block free lists
//! - [`dir`] and [`file`]: directory entries and file data
//! - [`handle`]: client handles with generation checks
//! - [`service`]: one method per protocol operation

#![warn(rust_2018_idioms)]

pub mod alloc;
pub mod arena;
pub mod backing;
pub mod check;
pub mod config;
pub mod context;
pub mod digest;
pub mod dir;
pub mod error;
pub mod file;
pub mod fs;
pub mod handle;
pub mod hook;
pub mod inode;
pub mod layout;
pub mod service;

pub use check::CheckReport;
pub use config::EngineConfig;
pub use context::{OpContext, Timestamp};
pub use digest::PageDigests;
pub use error::{FsError, NoSpaceCause, Result, Status};
pub use fs::{ArenaFs, FsStats, ROOT_INO};
pub use handle::Handle;
pub use hook::{DirtyPages, MutationHook, NoopHook};
pub use inode::{BlockNo, BlockRef, FileKind, InodeNo};
pub use service::{DirOpReply, FileAttr, FileService, ReadDirReply, SetAttr};

/// Re-export common types and traits
pub mod prelude {
    pub use crate::context::OpContext;
    pub use crate::error::{FsError, Result};
    pub use crate::hook::MutationHook;
    pub use crate::service::FileService;
}
