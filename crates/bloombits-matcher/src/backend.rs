//! The retrieval backend seam.

use async_trait::async_trait;
use bytes::Bytes;

use bloombits_core::types::FragmentId;

use crate::error::RetrievalError;

/// Source of decompressed bit-plane fragments.
///
/// Called by scheduler workers with a batch of distinct ids. The result has one
/// entry per id, in order: `Some(plane)` with `ceil(section_size / 8)` bytes,
/// or `None` when the fragment is not available. An `Err` fails the whole batch.
#[async_trait]
pub trait FragmentBackend: Send + Sync + 'static {
    async fn retrieve(&self, batch: &[FragmentId]) -> Result<Vec<Option<Bytes>>, RetrievalError>;
}
