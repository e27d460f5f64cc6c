//! Bit-plane codec: transposes a section of block blooms into 2048 planes.
//!
//! ```text
//!              block offset within the section →
//!  bloom bit   0 1 2 3 4 5 6 7 | 8 9 …
//!      0       . . . . . . . . | . .
//!      5       1 . 1 . . . . . | . .      plane 5 = [0b1010_0000, …]
//!      9       . . 1 1 . . . . | . .      plane 9 = [0b0011_0000, …]
//! ```
//!
//! Within a plane, offset `i` is byte `i / 8`, mask `0x80 >> (i % 8)`.

use crate::bloom::{Bloom, BLOOM_BIT_LENGTH, BLOOM_BYTE_LENGTH};
use crate::error::CodecError;

/// All 2048 planes of one section, indexed by bloom bit.
pub type BitPlanes = Vec<Vec<u8>>;

/// Incrementally builds the bit planes of one section.
#[derive(Debug, Clone)]
pub struct BitPlaneGenerator {
    planes: BitPlanes,
    section_size: u64,
    next_offset: u64,
}

impl BitPlaneGenerator {
    /// Create a generator for sections of `section_size` blocks.
    pub fn new(section_size: u64) -> Result<Self, CodecError> {
        if section_size == 0 {
            return Err(CodecError::InvalidSectionSize(section_size));
        }
        Ok(Self {
            planes: vec![vec![0u8; plane_len(section_size)]; BLOOM_BIT_LENGTH],
            section_size,
            next_offset: 0,
        })
    }

    pub fn section_size(&self) -> u64 {
        self.section_size
    }

    /// Number of blooms added so far.
    pub fn filled(&self) -> u64 {
        self.next_offset
    }

    /// Returns `true` once every offset of the section has been added.
    pub fn is_complete(&self) -> bool {
        self.next_offset == self.section_size
    }

    /// Add the bloom of the block at `offset` within the section.
    ///
    /// Offsets must arrive in strictly ascending order starting at zero.
    pub fn add_bloom(&mut self, offset: u64, bloom: &Bloom) -> Result<(), CodecError> {
        if offset >= self.section_size {
            return Err(CodecError::SectionOutOfBounds {
                offset,
                section_size: self.section_size,
            });
        }
        if offset != self.next_offset {
            return Err(CodecError::OutOfOrder {
                expected: self.next_offset,
                got: offset,
            });
        }
        let byte_index = (offset / 8) as usize;
        let shift = 7 - (offset % 8) as u8;

        for byt in 0..BLOOM_BYTE_LENGTH {
            let bloom_byte = bloom.0[BLOOM_BYTE_LENGTH - 1 - byt];
            if bloom_byte == 0 {
                continue;
            }
            let base = 8 * byt;
            for j in 0..8 {
                self.planes[base + j][byte_index] |= ((bloom_byte >> j) & 1) << shift;
            }
        }
        self.next_offset += 1;
        Ok(())
    }

    /// The finished plane for bloom bit `bit`.
    pub fn bit_plane(&self, bit: u32) -> Result<&[u8], CodecError> {
        if !self.is_complete() {
            return Err(CodecError::Incomplete {
                filled: self.next_offset,
                section_size: self.section_size,
            });
        }
        self.planes
            .get(bit as usize)
            .map(Vec::as_slice)
            .ok_or(CodecError::BitOutOfBounds(bit))
    }

    /// Consume the generator and return all planes.
    pub fn into_planes(self) -> Result<BitPlanes, CodecError> {
        if !self.is_complete() {
            return Err(CodecError::Incomplete {
                filled: self.next_offset,
                section_size: self.section_size,
            });
        }
        Ok(self.planes)
    }
}

/// Length in bytes of one plane; sections shorter than 8 blocks still use a full byte.
pub fn plane_len(section_size: u64) -> usize {
    ((section_size + 7) / 8) as usize
}

/// Transpose the ordered blooms of one full section into its 2048 planes.
pub fn encode_section<'a, I>(section_size: u64, blooms: I) -> Result<BitPlanes, CodecError>
where
    I: IntoIterator<Item = &'a Bloom>,
{
    let mut gen = BitPlaneGenerator::new(section_size)?;
    for (offset, bloom) in blooms.into_iter().enumerate() {
        gen.add_bloom(offset as u64, bloom)?;
    }
    gen.into_planes()
}

/// Derive a single plane without building the other 2047.
pub fn plane_for_bit<'a, I>(section_size: u64, blooms: I, bit: u16) -> Vec<u8>
where
    I: IntoIterator<Item = &'a Bloom>,
{
    let mut plane = vec![0u8; plane_len(section_size)];
    for (offset, bloom) in blooms.into_iter().enumerate().take(section_size as usize) {
        if bloom.is_set(bit) {
            plane[offset / 8] |= 0x80 >> (offset % 8);
        }
    }
    plane
}

/// Test the bit of block `offset` in a plane.
pub fn fragment_bit(fragment: &[u8], offset: u64) -> bool {
    fragment
        .get((offset / 8) as usize)
        .map(|byte| byte & (0x80 >> (offset % 8)) != 0)
        .unwrap_or(false)
}
