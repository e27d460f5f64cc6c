//! Section checkpoints: which sections are stored, and on which chain.
//!
//! A checkpoint records the head hash (hash of the last block) of a completed
//! section. Fragments are keyed by that same hash, so a reader that finds a
//! checkpoint whose head is no longer canonical knows the fragments are stale.
//! The stored-section count is kept alongside and always moves together with
//! the checkpoints inside one [`WriteBatch`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::keys;
use crate::store::{KeyValueStore, WriteBatch};
use crate::types::BlockHash;

/// A persisted completion record for one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionCheckpoint {
    /// Section index.
    pub section: u64,
    /// Hash of the section's last block.
    pub head: BlockHash,
    /// Unix timestamp of when this checkpoint was written.
    pub updated_at: i64,
}

/// Reads and stages checkpoint records for one indexer namespace.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn KeyValueStore>,
    namespace: Vec<u8>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<Vec<u8>>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Number of sections recorded as stored (0 if never written).
    pub async fn stored_sections(&self) -> Result<u64, IndexerError> {
        match self.store.get(&keys::count_key(&self.namespace)).await? {
            None => Ok(0),
            Some(raw) => {
                let arr: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                    IndexerError::Storage(format!("corrupt section count ({} bytes)", raw.len()))
                })?;
                Ok(u64::from_be_bytes(arr))
            }
        }
    }

    /// Load the checkpoint of `section`, if any.
    pub async fn load(&self, section: u64) -> Result<Option<SectionCheckpoint>, IndexerError> {
        let key = keys::section_head_key(&self.namespace, section);
        match self.store.get(&key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| IndexerError::Storage(format!("corrupt checkpoint {section}: {e}"))),
        }
    }

    /// Head hash of `section`, if the section is stored.
    pub async fn section_head(&self, section: u64) -> Result<Option<BlockHash>, IndexerError> {
        Ok(self.load(section).await?.map(|cp| cp.head))
    }

    /// Stage the checkpoint of a freshly built section.
    pub fn stage_section(
        &self,
        batch: &mut WriteBatch,
        section: u64,
        head: BlockHash,
    ) -> Result<(), IndexerError> {
        let cp = SectionCheckpoint {
            section,
            head,
            updated_at: chrono::Utc::now().timestamp(),
        };
        let value = serde_json::to_vec(&cp).map_err(|e| IndexerError::Other(e.to_string()))?;
        batch.put(keys::section_head_key(&self.namespace, section), value);
        Ok(())
    }

    /// Stage removal of the checkpoint of `section`.
    pub fn stage_removal(&self, batch: &mut WriteBatch, section: u64) {
        batch.delete(keys::section_head_key(&self.namespace, section));
    }

    /// Stage the stored-section counter.
    pub fn stage_count(&self, batch: &mut WriteBatch, stored: u64) {
        batch.put(keys::count_key(&self.namespace), stored.to_be_bytes().to_vec());
    }
}
