//! bloombits-core — foundation for the sectioned bloom-bits log index.
//!
//! # Architecture
//!
//! ```text
//! ChainReader ──▶ ChainIndexer (bloombits-indexer)
//!                      ├── SectionCursor     (confirmed-section math)
//!                      ├── Invalidation      (reorg → sections to rebuild)
//!                      ├── CheckpointManager (section heads + stored count)
//!                      └── SectionProcessor  ──▶ BitPlaneGenerator → bitutil::compress
//!                                                       │
//!                                                       ▼
//!                                              KeyValueStore (memory / SQLite)
//!                                                       │
//!                      FilterService (bloombits-matcher) ◀┘
//! ```

pub mod bitutil;
pub mod bloom;
pub mod chain;
pub mod checkpoint;
pub mod codec;
pub mod cursor;
pub mod error;
pub mod indexer;
pub mod keys;
pub mod processor;
pub mod reorg;
pub mod store;
pub mod types;

pub use bloom::{bloom_indexes, keccak256, Bloom, BLOOM_BIT_LENGTH, BLOOM_BYTE_LENGTH};
pub use chain::{ChainEvent, ChainReader, MemoryChain};
pub use checkpoint::{CheckpointManager, SectionCheckpoint};
pub use codec::{encode_section, fragment_bit, plane_for_bit, plane_len, BitPlaneGenerator, BitPlanes};
pub use cursor::SectionCursor;
pub use error::{CodecError, IndexerError};
pub use indexer::{IndexStatus, IndexerConfig, IndexerState};
pub use processor::SectionProcessor;
pub use reorg::Invalidation;
pub use store::{BatchOp, KeyValueStore, WriteBatch};
pub use types::{BlockHash, BlockHeader, FragmentId};
