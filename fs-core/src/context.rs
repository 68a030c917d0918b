//! Per-operation inputs supplied by the replication runtime
//!
//! The engine never reads a clock or asks who the caller is. Replicas must
//! agree on these values, so the runtime picks them and threads them through
//! every mutating call.

use serde::{Deserialize, Serialize};

/// Seconds and microseconds since the Unix epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub sec: u32,
    pub usec: u32,
}

impl Timestamp {
    pub const fn new(sec: u32, usec: u32) -> Self {
        Self { sec, usec }
    }
}

/// Non-deterministic inputs agreed on for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpContext {
    /// Time the operation is deemed to execute at
    pub now: Timestamp,
    /// Caller's user id
    pub uid: u32,
    /// Caller's group id
    pub gid: u32,
}

impl OpContext {
    pub fn new(now: Timestamp, uid: u32, gid: u32) -> Self {
        Self { now, uid, gid }
    }

    /// Context owned by the superuser at `now`
    pub fn root(now: Timestamp) -> Self {
        Self::new(now, 0, 0)
    }
}
