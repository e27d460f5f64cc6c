//! The per-section processing seam driven by the indexer.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::store::WriteBatch;
use crate::types::{BlockHash, BlockHeader};

/// Trait for section processors.
///
/// The indexer drives one section at a time: `reset`, then `process` for every
/// header of the section in ascending order, then `commit`. `commit` only
/// stages writes; the indexer adds the section checkpoint to the same batch
/// and applies it atomically, so a processor never makes a partial section
/// visible. A processor may be reset at any point to abandon a section.
#[async_trait]
pub trait SectionProcessor: Send {
    /// Start a new section. `prev_head` is the head hash of the previous
    /// section, if it is stored.
    async fn reset(&mut self, section: u64, prev_head: Option<BlockHash>) -> Result<(), IndexerError>;

    /// Feed the next canonical header of the current section.
    async fn process(&mut self, header: &BlockHeader) -> Result<(), IndexerError>;

    /// Stage the finished section's output into `batch`.
    async fn commit(&mut self, batch: &mut WriteBatch) -> Result<(), IndexerError>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}
