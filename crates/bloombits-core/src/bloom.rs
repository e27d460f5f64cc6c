//! The 2048-bit event bloom attached to every block.
//!
//! Bit `i` lives in byte `255 - i / 8` under mask `1 << (i % 8)`, so bit 0 is
//! the lowest bit of the last byte. A log value (contract address or topic)
//! sets three bits derived from its Keccak-256 hash.

use std::fmt;

use tiny_keccak::{Hasher, Keccak};

/// Number of bits in a block bloom.
pub const BLOOM_BIT_LENGTH: usize = 2048;
/// Number of bytes in a block bloom.
pub const BLOOM_BYTE_LENGTH: usize = BLOOM_BIT_LENGTH / 8;

/// A fixed-width block bloom filter.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bloom(pub [u8; BLOOM_BYTE_LENGTH]);

impl Default for Bloom {
    fn default() -> Self {
        Self([0u8; BLOOM_BYTE_LENGTH])
    }
}

impl fmt::Debug for Bloom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = self.0.iter().map(|b| b.count_ones()).sum::<u32>();
        write!(f, "Bloom({set} bits set)")
    }
}

impl Bloom {
    /// Build a bloom from raw bytes; returns `None` unless exactly 256 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; BLOOM_BYTE_LENGTH] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Build a bloom with exactly the given bit positions set.
    pub fn from_bits(bits: impl IntoIterator<Item = u16>) -> Self {
        let mut bloom = Self::default();
        for bit in bits {
            bloom.set_bit(bit);
        }
        bloom
    }

    /// Set bloom bit `bit` (`bit < 2048`, higher values wrap).
    pub fn set_bit(&mut self, bit: u16) {
        let bit = bit as usize % BLOOM_BIT_LENGTH;
        self.0[BLOOM_BYTE_LENGTH - 1 - bit / 8] |= 1 << (bit % 8);
    }

    /// Returns `true` if bloom bit `bit` is set.
    pub fn is_set(&self, bit: u16) -> bool {
        let bit = bit as usize % BLOOM_BIT_LENGTH;
        self.0[BLOOM_BYTE_LENGTH - 1 - bit / 8] & (1 << (bit % 8)) != 0
    }

    /// Add a log value (address or topic bytes) to the bloom.
    pub fn accrue(&mut self, value: &[u8]) {
        for bit in bloom_indexes(value) {
            self.set_bit(bit);
        }
    }

    /// Returns `true` if the value may have been added (false positives possible).
    pub fn contains(&self, value: &[u8]) -> bool {
        bloom_indexes(value).iter().all(|&bit| self.is_set(bit))
    }

    /// Iterate over the set bit positions in ascending order.
    pub fn set_bits(&self) -> impl Iterator<Item = u16> + '_ {
        (0..BLOOM_BIT_LENGTH as u16).filter(move |&bit| self.is_set(bit))
    }
}

/// The three bloom bit positions a value maps to.
pub fn bloom_indexes(value: &[u8]) -> [u16; 3] {
    let hash = keccak256(value);
    let mut idxs = [0u16; 3];
    for (i, idx) in idxs.iter_mut().enumerate() {
        let hi = hash[2 * i] as u16;
        let lo = hash[2 * i + 1] as u16;
        *idx = ((hi << 8) | lo) & (BLOOM_BIT_LENGTH as u16 - 1);
    }
    idxs
}

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}
