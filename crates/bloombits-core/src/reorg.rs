//! Reorg invalidation planning.
//!
//! The chain collaborator reports a reorganization as the block number of the
//! common ancestor `N` of the old and new canonical chains. Every section whose
//! range extends beyond `N` was built from blocks that may no longer be
//! canonical and must be rebuilt.

use std::ops::Range;

use crate::cursor::SectionCursor;

/// Which stored sections survive a reorg and which must be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    /// The reported common ancestor.
    pub common_ancestor: u64,
    /// Number of sections that remain valid.
    pub retained: u64,
    /// Previously stored sections whose checkpoints must be removed.
    pub invalidated: Range<u64>,
}

impl Invalidation {
    /// Plan the invalidation for `stored` sections after a reorg to `common_ancestor`.
    pub fn plan(cursor: &SectionCursor, stored: u64, common_ancestor: u64) -> Self {
        let retained = stored.min(cursor.sections_through(common_ancestor));
        Self {
            common_ancestor,
            retained,
            invalidated: retained..stored,
        }
    }

    /// Returns `true` if every stored section survives.
    pub fn is_empty(&self) -> bool {
        self.invalidated.is_empty()
    }

    /// Returns `true` if `section` overlaps the replaced part of the chain.
    pub fn affects(&self, cursor: &SectionCursor, section: u64) -> bool {
        cursor.last_block(section) > self.common_ancestor
    }
}
