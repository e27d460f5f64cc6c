//! Storage key derivation.
//!
//! Fragment keys are global and bit-exact across implementations:
//! `"B" ++ bit (u16 BE) ++ section (u64 BE) ++ section head hash`.
//! Checkpoint keys live under the indexer's namespace.

use crate::types::{BlockHash, FragmentId};

/// Prefix of every bit-plane fragment key.
pub const FRAGMENT_PREFIX: &[u8] = b"B";
/// Suffix of per-section checkpoint keys.
pub const SECTION_HEAD_PREFIX: &[u8] = b"shead";
/// Suffix of the stored-section counter key.
pub const COUNT_KEY: &[u8] = b"count";

/// Key of the fragment for `(bit, section)` built on the chain ending at `head`.
pub fn fragment_key(bit: u16, section: u64, head: &BlockHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(FRAGMENT_PREFIX.len() + 2 + 8 + 32);
    key.extend_from_slice(FRAGMENT_PREFIX);
    key.extend_from_slice(&bit.to_be_bytes());
    key.extend_from_slice(&section.to_be_bytes());
    key.extend_from_slice(head.as_bytes());
    key
}

/// Same as [`fragment_key`], taking a [`FragmentId`].
pub fn fragment_id_key(id: FragmentId, head: &BlockHash) -> Vec<u8> {
    fragment_key(id.bit, id.section, head)
}

/// Key of the checkpoint record for `section`.
pub fn section_head_key(namespace: &[u8], section: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(namespace.len() + SECTION_HEAD_PREFIX.len() + 8);
    key.extend_from_slice(namespace);
    key.extend_from_slice(SECTION_HEAD_PREFIX);
    key.extend_from_slice(&section.to_be_bytes());
    key
}

/// Key of the stored-section counter.
pub fn count_key(namespace: &[u8]) -> Vec<u8> {
    [namespace, COUNT_KEY].concat()
}
