//! Indexer configuration, state and status types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cursor::SectionCursor;
use crate::error::IndexerError;
use crate::types::BlockHash;

/// Configuration for a section indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Key namespace for checkpoints (lets several indexers share a store).
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Blocks per section. Must be a power of two.
    #[serde(default = "default_section_size")]
    pub section_size: u64,
    /// Confirmations the last block of a section needs before it is indexed.
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    /// Pause between consecutive sections while catching up (milliseconds).
    #[serde(default = "default_throttling_ms")]
    pub throttling_ms: u64,
}

fn default_namespace() -> String {
    "bloombits".into()
}
fn default_section_size() -> u64 {
    4096
}
fn default_confirmation_depth() -> u64 {
    256
}
fn default_throttling_ms() -> u64 {
    100
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            section_size: default_section_size(),
            confirmation_depth: default_confirmation_depth(),
            throttling_ms: default_throttling_ms(),
        }
    }
}

impl IndexerConfig {
    /// Check the invariants the codec and section math rely on.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if !self.section_size.is_power_of_two() {
            return Err(IndexerError::Config(format!(
                "section_size {} must be a power of two",
                self.section_size
            )));
        }
        if self.namespace.is_empty() {
            return Err(IndexerError::Config("namespace must not be empty".into()));
        }
        Ok(())
    }

    pub fn cursor(&self) -> SectionCursor {
        SectionCursor::new(self.section_size, self.confirmation_depth)
    }

    pub fn throttling(&self) -> Duration {
        Duration::from_millis(self.throttling_ms)
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Building sections that are confirmed but not yet stored.
    CatchingUp,
    /// Every confirmed section is stored; waiting for new heads.
    Synced,
    /// Invalidating sections after a reorg.
    ReorgRecovery,
    /// The last section build failed; waiting for the next head to retry.
    Stalled,
    /// Shutting down gracefully.
    Stopping,
    /// Terminated.
    Stopped,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::CatchingUp => write!(f, "catching-up"),
            Self::Synced => write!(f, "synced"),
            Self::ReorgRecovery => write!(f, "reorg-recovery"),
            Self::Stalled => write!(f, "stalled"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot of indexing progress, published after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    /// Number of stored (queryable) sections.
    pub stored_sections: u64,
    /// Number of sections confirmed by the latest head.
    pub known_sections: u64,
    /// Head hash of the last stored section.
    pub last_section_head: Option<BlockHash>,
    /// Number of the latest chain head seen.
    pub chain_head: Option<u64>,
    pub state: IndexerState,
}

impl IndexStatus {
    pub fn idle() -> Self {
        Self {
            stored_sections: 0,
            known_sections: 0,
            last_section_head: None,
            chain_head: None,
            state: IndexerState::Idle,
        }
    }

    /// Last block covered by the stored sections, `None` if nothing is stored.
    pub fn last_indexed_block(&self, section_size: u64) -> Option<u64> {
        (self.stored_sections > 0).then(|| self.stored_sections * section_size - 1)
    }
}
