//! Shared types for the indexing and matching pipeline.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::bloom::Bloom;

// ─── BlockHash ────────────────────────────────────────────────────────────────

/// A 32-byte block hash.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub const ZERO: Self = Self([0u8; 32]);

    /// Parse a hash from hex (with or without `0x`).
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps tracing output readable.
        write!(f, "0x{}…", hex::encode(&self.0[..4]))
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockHash::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid block hash: {s}")))
    }
}

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// The part of a block header the indexer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: BlockHash,
    /// Parent block hash.
    pub parent_hash: BlockHash,
    /// Event bloom of all logs emitted in the block.
    pub bloom: Bloom,
}

impl BlockHeader {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockHeader) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

// ─── FragmentId ───────────────────────────────────────────────────────────────

/// Identifies one bit-plane fragment: bloom bit `bit` over section `section`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentId {
    pub bit: u16,
    pub section: u64,
}

impl FragmentId {
    pub fn new(bit: u16, section: u64) -> Self {
        Self { bit, section }
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bit {} / section {}", self.bit, self.section)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
