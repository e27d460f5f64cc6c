//! Error types for the bloombits indexing pipeline.

use thiserror::Error;

/// Errors that can occur while building or persisting sections.
///
/// None of these are fatal to the node: the indexer logs them, leaves the
/// section unfinished and retries on the next head event.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Canonical header #{0} not found")]
    MissingHeader(u64),

    #[error("Canonical chain changed while processing section {section} at block {block_number}")]
    ChainChanged { section: u64, block_number: u64 },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the chain moved under the indexer (recoverable by rebuilding).
    pub fn is_chain_change(&self) -> bool {
        matches!(self, Self::ChainChanged { .. } | Self::MissingHeader(_))
    }
}

/// Errors raised by the bit-plane codec and the sparse bitset compressor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("section size {0} must be non-zero")]
    InvalidSectionSize(u64),

    #[error("bloom for offset {got} added out of order (expected {expected})")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("section offset {offset} out of bounds (section size {section_size})")]
    SectionOutOfBounds { offset: u64, section_size: u64 },

    #[error("bloom bit {0} out of bounds")]
    BitOutOfBounds(u32),

    #[error("section incomplete: {filled} of {section_size} blooms added")]
    Incomplete { filled: u64, section_size: u64 },

    #[error("compressed data exceeds target length {0}")]
    ExceededTarget(usize),

    #[error("compressed data is missing content bytes")]
    MissingData,

    #[error("compressed data contains a zero content byte")]
    ZeroContent,

    #[error("compressed data has {0} unreferenced trailing bytes")]
    UnreferencedData(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_changes_are_told_apart() {
        assert!(IndexerError::MissingHeader(7).is_chain_change());
        assert!(IndexerError::ChainChanged { section: 1, block_number: 9 }.is_chain_change());
        assert!(!IndexerError::Storage("disk full".into()).is_chain_change());
        assert!(!IndexerError::from(CodecError::MissingData).is_chain_change());
    }
}
