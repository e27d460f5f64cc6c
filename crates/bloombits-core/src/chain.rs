//! The chain collaborator: canonical header access and head notifications.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::bloom::{keccak256, Bloom};
use crate::error::IndexerError;
use crate::types::{BlockHash, BlockHeader};

/// Canonical chain notifications consumed by the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// The canonical chain was extended; carries the new head.
    NewHead(BlockHeader),
    /// The canonical chain was replaced above `common_ancestor`.
    Reorg {
        common_ancestor: u64,
        new_head: BlockHeader,
    },
}

impl ChainEvent {
    /// The head after this event.
    pub fn head(&self) -> &BlockHeader {
        match self {
            Self::NewHead(head) => head,
            Self::Reorg { new_head, .. } => new_head,
        }
    }
}

/// Read access to the canonical chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// The current canonical head, `None` for an empty chain.
    async fn current_head(&self) -> Result<Option<BlockHeader>, IndexerError>;

    /// The canonical header at `number`.
    async fn header_by_number(&self, number: u64) -> Result<Option<BlockHeader>, IndexerError>;

    /// Subscribe to head and reorg notifications.
    fn subscribe(&self) -> broadcast::Receiver<ChainEvent>;
}

// ─── In-memory chain (for testing) ────────────────────────────────────────────

/// In-memory canonical chain for tests, demos and ephemeral nodes.
///
/// Block hashes are derived from `(parent hash, number, bloom)`, so replaying
/// identical blooms after a reorg reproduces identical hashes.
pub struct MemoryChain {
    blocks: RwLock<Vec<BlockHeader>>,
    events: broadcast::Sender<ChainEvent>,
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChain {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            blocks: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Build a chain whose block `i` carries `blooms[i]`, without emitting events.
    pub fn from_blooms(blooms: impl IntoIterator<Item = Bloom>) -> Self {
        let chain = Self::new();
        {
            let mut blocks = chain.blocks.write().unwrap_or_else(PoisonError::into_inner);
            for bloom in blooms {
                let next = next_header(blocks.last(), bloom);
                blocks.push(next);
            }
        }
        chain
    }

    /// Number of canonical blocks.
    pub fn len(&self) -> u64 {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner).len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current head, if any.
    pub fn head(&self) -> Option<BlockHeader> {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner).last().cloned()
    }

    /// The canonical header at `number`.
    pub fn header(&self, number: u64) -> Option<BlockHeader> {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(number as usize)
            .cloned()
    }

    /// Append blocks and announce the new head.
    pub fn extend(&self, blooms: impl IntoIterator<Item = Bloom>) -> Option<BlockHeader> {
        let head = {
            let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
            let before = blocks.len();
            for bloom in blooms {
                let next = next_header(blocks.last(), bloom);
                blocks.push(next);
            }
            if blocks.len() == before {
                return None;
            }
            blocks.last().cloned()
        };
        if let Some(head) = &head {
            tracing::debug!(number = head.number, hash = %head.hash, "memory chain extended");
            let _ = self.events.send(ChainEvent::NewHead(head.clone()));
        }
        head
    }

    /// Replace every block above `common_ancestor` and announce the reorg.
    pub fn reorg(
        &self,
        common_ancestor: u64,
        blooms: impl IntoIterator<Item = Bloom>,
    ) -> Option<BlockHeader> {
        let head = {
            let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
            blocks.truncate(common_ancestor as usize + 1);
            for bloom in blooms {
                let next = next_header(blocks.last(), bloom);
                blocks.push(next);
            }
            blocks.last().cloned()
        }?;
        tracing::debug!(common_ancestor, number = head.number, hash = %head.hash, "memory chain reorganised");
        let _ = self.events.send(ChainEvent::Reorg {
            common_ancestor,
            new_head: head.clone(),
        });
        Some(head)
    }
}

fn next_header(parent: Option<&BlockHeader>, bloom: Bloom) -> BlockHeader {
    let (number, parent_hash) = match parent {
        Some(p) => (p.number + 1, p.hash),
        None => (0, BlockHash::ZERO),
    };
    let mut preimage = Vec::with_capacity(32 + 8 + bloom.0.len());
    preimage.extend_from_slice(parent_hash.as_bytes());
    preimage.extend_from_slice(&number.to_be_bytes());
    preimage.extend_from_slice(&bloom.0);
    BlockHeader {
        number,
        hash: BlockHash(keccak256(&preimage)),
        parent_hash,
        bloom,
    }
}

#[async_trait]
impl ChainReader for MemoryChain {
    async fn current_head(&self) -> Result<Option<BlockHeader>, IndexerError> {
        Ok(self.head())
    }

    async fn header_by_number(&self, number: u64) -> Result<Option<BlockHeader>, IndexerError> {
        Ok(self.header(number))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }
}
