//! Section cursor: block/section arithmetic and confirmation rules.

use serde::{Deserialize, Serialize};

/// Maps block numbers onto fixed-size sections.
///
/// The cursor knows:
/// - How many blocks make up a section
/// - The confirmation depth (how many blocks must follow a section's last block)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionCursor {
    /// Blocks per section (a power of two).
    pub section_size: u64,
    /// Minimum number of confirmations before a section may be indexed.
    pub confirmation_depth: u64,
}

impl SectionCursor {
    pub fn new(section_size: u64, confirmation_depth: u64) -> Self {
        Self {
            section_size,
            confirmation_depth,
        }
    }

    /// Section that contains `block`.
    pub fn section_of(&self, block: u64) -> u64 {
        block / self.section_size
    }

    /// Offset of `block` within its section.
    pub fn offset_of(&self, block: u64) -> u64 {
        block % self.section_size
    }

    /// First block of `section`.
    pub fn first_block(&self, section: u64) -> u64 {
        section * self.section_size
    }

    /// Last block of `section`.
    pub fn last_block(&self, section: u64) -> u64 {
        (section + 1) * self.section_size - 1
    }

    /// Number of leading sections whose last block is confirmed at `head`.
    pub fn confirmed_sections(&self, head: u64) -> u64 {
        match (head + 1).checked_sub(self.confirmation_depth) {
            Some(confirmed) => confirmed / self.section_size,
            None => 0,
        }
    }

    /// Returns `true` if `section` can be indexed with the chain at `head`.
    pub fn is_confirmed(&self, section: u64, head: u64) -> bool {
        section < self.confirmed_sections(head)
    }

    /// Number of leading sections lying entirely at or below `block`.
    pub fn sections_through(&self, block: u64) -> u64 {
        (block + 1) / self.section_size
    }
}
