//! Mutation-declaration hooks
//!
//! The replication runtime must hear about every page the engine is about to
//! change, before the change happens, so it can maintain incremental state
//! digests and ship minimal deltas during recovery. The arena calls exactly
//! one of these methods ahead of each write.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Declare-before-write contract supplied by the replication runtime
pub trait MutationHook {
    /// A write confined to one page
    fn modify_one(&mut self, page: u32);

    /// A write spanning at most two adjacent pages
    fn modify_two(&mut self, first: u32, second: Option<u32>);

    /// A write spanning an explicit list of pages
    fn modify_list(&mut self, pages: &[u32]);
}

/// Hook for running without replication
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl MutationHook for NoopHook {
    fn modify_one(&mut self, _page: u32) {}

    fn modify_two(&mut self, _first: u32, _second: Option<u32>) {}

    fn modify_list(&mut self, _pages: &[u32]) {}
}

/// Number of declarations received, by flavor
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeclarationCounts {
    pub one: u64,
    pub two: u64,
    pub list: u64,
}

/// Hook that records the set of declared pages
///
/// Used to persist only what changed and to recompute digests incrementally.
#[derive(Debug, Default, Clone)]
pub struct DirtyPages {
    pages: BTreeSet<u32>,
    counts: DeclarationCounts,
}

impl DirtyPages {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages declared since the last `take`
    pub fn pages(&self) -> &BTreeSet<u32> {
        &self.pages
    }

    /// Whether `page` was declared since the last `take`
    pub fn contains(&self, page: u32) -> bool {
        self.pages.contains(&page)
    }

    /// Declarations received over the recorder's lifetime
    pub fn counts(&self) -> DeclarationCounts {
        self.counts
    }

    /// Drain the recorded page set
    pub fn take(&mut self) -> BTreeSet<u32> {
        std::mem::take(&mut self.pages)
    }
}

impl MutationHook for DirtyPages {
    fn modify_one(&mut self, page: u32) {
        self.counts.one += 1;
        self.pages.insert(page);
    }

    fn modify_two(&mut self, first: u32, second: Option<u32>) {
        self.counts.two += 1;
        self.pages.insert(first);
        if let Some(second) = second {
            self.pages.insert(second);
        }
    }

    fn modify_list(&mut self, pages: &[u32]) {
        self.counts.list += 1;
        self.pages.extend(pages.iter().copied());
    }
}

/// A hook shared with the runtime that owns it
impl<H: MutationHook> MutationHook for Arc<Mutex<H>> {
    fn modify_one(&mut self, page: u32) {
        self.lock().modify_one(page);
    }

    fn modify_two(&mut self, first: u32, second: Option<u32>) {
        self.lock().modify_two(first, second);
    }

    fn modify_list(&mut self, pages: &[u32]) {
        self.lock().modify_list(pages);
    }
}
