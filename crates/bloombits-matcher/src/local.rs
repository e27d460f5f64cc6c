//! Local retrieval backend over the node's key-value store.
//!
//! A fragment is served only when its section checkpoint exists. With a chain
//! reader attached, the checkpoint head is compared against the canonical hash
//! of the section's last block; a stale tag or a missing fragment row is
//! answered by re-deriving the plane from canonical headers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use bloombits_core::bitutil;
use bloombits_core::bloom::Bloom;
use bloombits_core::chain::ChainReader;
use bloombits_core::checkpoint::CheckpointManager;
use bloombits_core::codec::{plane_for_bit, plane_len};
use bloombits_core::cursor::SectionCursor;
use bloombits_core::keys;
use bloombits_core::store::KeyValueStore;
use bloombits_core::types::{BlockHash, FragmentId};

use crate::backend::FragmentBackend;
use crate::error::RetrievalError;

/// [`FragmentBackend`] reading fragments written by the section indexer.
pub struct LocalBackend {
    checkpoints: CheckpointManager,
    cursor: SectionCursor,
    chain: Option<Arc<dyn ChainReader>>,
}

/// How the fragments of one section are served within a call.
enum SectionSource {
    Unavailable,
    /// `canonical` is false when the head no longer matches the attached chain.
    Stored { head: BlockHash, canonical: bool },
    Derived { blooms: Vec<Bloom> },
}

impl LocalBackend {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<Vec<u8>>, section_size: u64) -> Self {
        Self {
            checkpoints: CheckpointManager::new(store, namespace),
            cursor: SectionCursor::new(section_size, 0),
            chain: None,
        }
    }

    /// Verify section heads against `chain` and re-derive stale sections from it.
    pub fn with_chain(mut self, chain: Arc<dyn ChainReader>) -> Self {
        self.chain = Some(chain);
        self
    }

    async fn source(&self, section: u64) -> Result<SectionSource, RetrievalError> {
        let Some(head) = self.checkpoints.section_head(section).await? else {
            return Ok(SectionSource::Unavailable);
        };
        let canonical = match &self.chain {
            Some(chain) => chain
                .header_by_number(self.cursor.last_block(section))
                .await?
                .is_some_and(|header| header.hash == head),
            None => true,
        };
        Ok(SectionSource::Stored { head, canonical })
    }

    async fn derive(&self, chain: &dyn ChainReader, section: u64) -> Result<SectionSource, RetrievalError> {
        let mut blooms = Vec::with_capacity(self.cursor.section_size as usize);
        for number in self.cursor.first_block(section)..=self.cursor.last_block(section) {
            match chain.header_by_number(number).await? {
                Some(header) => blooms.push(header.bloom),
                None => return Ok(SectionSource::Unavailable),
            }
        }
        Ok(SectionSource::Derived { blooms })
    }

    fn derived_plane(&self, blooms: &[Bloom], bit: u16) -> Bytes {
        Bytes::from(plane_for_bit(self.cursor.section_size, blooms, bit))
    }

    /// Read a stored fragment. A non-canonical head, or a missing row while a
    /// chain is attached, is reported as [`RetrievalError::Stale`].
    async fn stored(&self, id: FragmentId, head: &BlockHash, canonical: bool) -> Result<Option<Bytes>, RetrievalError> {
        let stale = RetrievalError::Stale {
            bit: id.bit,
            section: id.section,
        };
        if !canonical {
            return Err(stale);
        }
        let key = keys::fragment_id_key(id, head);
        match self.checkpoints.store().get(&key).await? {
            Some(raw) => bitutil::decompress(&raw, plane_len(self.cursor.section_size))
                .map(|plane| Some(Bytes::from(plane)))
                .map_err(|e| RetrievalError::Backend(format!("fragment {id}: {e}"))),
            None if self.chain.is_some() => Err(stale),
            None => Ok(None),
        }
    }

    async fn fragment(
        &self,
        id: FragmentId,
        source: &mut SectionSource,
    ) -> Result<Option<Bytes>, RetrievalError> {
        if let SectionSource::Stored { head, canonical } = source {
            match self.stored(id, head, *canonical).await {
                Err(RetrievalError::Stale { .. }) => {}
                other => return other,
            }
            let Some(chain) = &self.chain else {
                return Ok(None);
            };
            debug!(%id, stored_head = %head, "stale fragment, re-deriving section");
            *source = self.derive(chain.as_ref(), id.section).await?;
        }
        match source {
            SectionSource::Derived { blooms } => Ok(Some(self.derived_plane(blooms, id.bit))),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl FragmentBackend for LocalBackend {
    async fn retrieve(&self, batch: &[FragmentId]) -> Result<Vec<Option<Bytes>>, RetrievalError> {
        let mut sources: BTreeMap<u64, SectionSource> = BTreeMap::new();
        let mut out = Vec::with_capacity(batch.len());
        for &id in batch {
            if !sources.contains_key(&id.section) {
                let source = self.source(id.section).await?;
                sources.insert(id.section, source);
            }
            let source = sources
                .get_mut(&id.section)
                .ok_or_else(|| RetrievalError::Backend("section source missing".into()))?;
            out.push(self.fragment(id, source).await?);
        }
        Ok(out)
    }
}
