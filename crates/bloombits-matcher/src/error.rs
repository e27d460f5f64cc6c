//! Retrieval and matching error types.

use thiserror::Error;

use bloombits_core::error::IndexerError;

/// Errors raised while retrieving bit-plane fragments.
///
/// Cloneable so one failed backend call can be routed to every waiter of a
/// merged request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrievalError {
    /// The backend call did not finish in time.
    #[error("Retrieval timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The backend failed (storage, network, decoding).
    #[error("Backend error: {0}")]
    Backend(String),

    /// The fragment is not indexed (section not stored yet).
    #[error("Fragment for bit {bit} in section {section} is not available")]
    Unavailable { bit: u16, section: u64 },

    /// The stored fragment belongs to a chain that is no longer canonical.
    #[error("Fragment for bit {bit} in section {section} is stale")]
    Stale { bit: u16, section: u64 },

    /// The scheduler was shut down.
    #[error("Retrieval scheduler closed")]
    Closed,
}

impl RetrievalError {
    /// Returns `true` if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Backend(_))
    }
}

impl From<IndexerError> for RetrievalError {
    fn from(e: IndexerError) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Errors surfaced by a matcher session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// Results from `at_block` on could not be computed.
    #[error("Match incomplete at block {at_block}: {source}")]
    Incomplete {
        at_block: u64,
        #[source]
        source: RetrievalError,
    },

    #[error("Invalid block range {start}..={end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("Invalid configuration: {0}")]
    Config(String),
}
