//! Fluent builder API for creating section indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bloombits_core::chain::MemoryChain;
//! use bloombits_indexer::IndexerBuilder;
//! use bloombits_storage::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let indexer = IndexerBuilder::new()
//!     .section_size(4096)
//!     .confirmation_depth(256)
//!     .throttling_ms(100)
//!     .build_bloom(Arc::new(MemoryStore::new()), Arc::new(MemoryChain::new()))?;
//! let handle = indexer.start();
//! handle.close().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bloombits_core::chain::ChainReader;
use bloombits_core::error::IndexerError;
use bloombits_core::indexer::IndexerConfig;
use bloombits_core::processor::SectionProcessor;
use bloombits_core::store::KeyValueStore;

use crate::bloom_processor::BloomSectionProcessor;
use crate::index_loop::ChainIndexer;

/// Fluent builder for [`ChainIndexer`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: IndexerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the checkpoint key namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Set the number of blocks per section.
    pub fn section_size(mut self, size: u64) -> Self {
        self.config.section_size = size;
        self
    }

    /// Set confirmation depth (blocks behind head before a section is indexed).
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    /// Set the pause between sections while catching up, in milliseconds.
    pub fn throttling_ms(mut self, ms: u64) -> Self {
        self.config.throttling_ms = ms;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Validate the configuration and assemble an indexer around `processor`.
    pub fn build(
        self,
        store: Arc<dyn KeyValueStore>,
        chain: Arc<dyn ChainReader>,
        processor: Box<dyn SectionProcessor>,
    ) -> Result<ChainIndexer, IndexerError> {
        self.config.validate()?;
        Ok(ChainIndexer::new(self.config, store, chain, processor))
    }

    /// Shorthand for [`build`](Self::build) with a [`BloomSectionProcessor`].
    pub fn build_bloom(
        self,
        store: Arc<dyn KeyValueStore>,
        chain: Arc<dyn ChainReader>,
    ) -> Result<ChainIndexer, IndexerError> {
        let processor = Box::new(BloomSectionProcessor::new(self.config.section_size));
        self.build(store, chain, processor)
    }
}
