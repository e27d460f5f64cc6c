//! The key-value storage collaborator.
//!
//! The index only needs point reads, point writes and an atomic batch write.
//! A section becomes visible to readers through a single [`WriteBatch`] that
//! carries its fragments, its checkpoint and the new section count.

use async_trait::async_trait;

use crate::error::IndexerError;

/// One operation of a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered set of writes applied atomically by [`KeyValueStore::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Trait for the node's key-value store.
///
/// Implementations include `MemoryStore` and `SqliteStore` in
/// `bloombits-storage`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError>;

    /// Write a single value.
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), IndexerError>;

    /// Returns `true` if `key` is present.
    async fn has(&self, key: &[u8]) -> Result<bool, IndexerError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remove `key` (no-op if absent).
    async fn delete(&self, key: &[u8]) -> Result<(), IndexerError>;

    /// Apply every operation of `batch` atomically: readers observe all of them or none.
    async fn write(&self, batch: WriteBatch) -> Result<(), IndexerError>;
}
