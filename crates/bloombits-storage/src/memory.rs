//! In-memory key-value backend.
//!
//! All data is lost when the process exits. Useful for tests, demos and
//! ephemeral nodes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{trace, warn};

use bloombits_core::error::IndexerError;
use bloombits_core::store::{BatchOp, KeyValueStore, WriteBatch};

/// In-memory key-value store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<_> = entries.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        keys.sort();
        keys
    }

    /// Make every subsequent write fail with a storage error (fault injection).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), IndexerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            warn!("memory store rejected a write");
            return Err(IndexerError::Storage("memory store: writes disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), IndexerError> {
        self.check_writable()?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), IndexerError> {
        self.check_writable()?;
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), IndexerError> {
        self.check_writable()?;
        // Held for the whole batch, so readers see all of it or none.
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        trace!(ops = batch.len(), "applying write batch");
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
