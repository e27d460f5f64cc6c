//! bloombits-indexer — the section indexer and its bloom processor.

pub mod bloom_processor;
pub mod builder;
pub mod index_loop;

pub use bloom_processor::BloomSectionProcessor;
pub use builder::IndexerBuilder;
pub use index_loop::{ChainIndexer, IndexerHandle};
