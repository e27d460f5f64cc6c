//! Compiled matcher: which planes a section needs and how to combine them.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use bloombits_core::codec::{fragment_bit, plane_len};

use crate::error::MatchError;
use crate::filter::{is_wildcard_group, Alternative, FilterQuery};

/// Traversal order of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Oldest block first.
    #[default]
    Ascending,
    /// Newest block first.
    Descending,
}

/// A [`FilterQuery`] compiled for a fixed section size.
#[derive(Debug, Clone)]
pub struct Matcher {
    section_size: u64,
    groups: Vec<Vec<Alternative>>,
    required: Vec<u16>,
}

impl Matcher {
    pub fn new(section_size: u64, query: &FilterQuery) -> Result<Self, MatchError> {
        if section_size == 0 {
            return Err(MatchError::Config("section_size must be non-zero".into()));
        }
        let groups: Vec<Vec<Alternative>> = query
            .groups()
            .iter()
            .filter(|group| !is_wildcard_group(group))
            .cloned()
            .collect();
        let required = groups
            .iter()
            .flatten()
            .flatten()
            .copied()
            .collect::<BTreeSet<u16>>()
            .into_iter()
            .collect();
        Ok(Self {
            section_size,
            groups,
            required,
        })
    }

    pub fn section_size(&self) -> u64 {
        self.section_size
    }

    /// Distinct bloom bits whose planes a section evaluation needs, ascending.
    pub fn required_bits(&self) -> &[u16] {
        &self.required
    }

    /// Returns `true` if the query matches every block.
    pub fn is_wildcard(&self) -> bool {
        self.groups.is_empty()
    }

    /// Combine the planes of one section into a match vector.
    ///
    /// Returns `None` if a required plane is missing or has the wrong length.
    pub fn evaluate(&self, planes: &HashMap<u16, Bytes>) -> Option<Vec<u8>> {
        let len = plane_len(self.section_size);
        let mut result = vec![0xffu8; len];
        for group in &self.groups {
            let mut any = vec![0u8; len];
            for alternative in group {
                let mut all = vec![0xffu8; len];
                for bit in alternative {
                    let plane = planes.get(bit).filter(|p| p.len() == len)?;
                    for (acc, byte) in all.iter_mut().zip(plane.iter()) {
                        *acc &= byte;
                    }
                }
                for (acc, byte) in any.iter_mut().zip(&all) {
                    *acc |= byte;
                }
            }
            for (acc, byte) in result.iter_mut().zip(&any) {
                *acc &= byte;
            }
        }
        Some(result)
    }

    /// Block numbers of `section` set in `vector` at offsets `lo..=hi`, in `direction` order.
    pub fn matching_blocks(
        &self,
        section: u64,
        vector: &[u8],
        lo: u64,
        hi: u64,
        direction: Direction,
    ) -> Vec<u64> {
        let base = section * self.section_size;
        let hi = hi.min(self.section_size - 1);
        let mut blocks: Vec<u64> = (lo..=hi)
            .filter(|&offset| fragment_bit(vector, offset))
            .map(|offset| base + offset)
            .collect();
        if direction == Direction::Descending {
            blocks.reverse();
        }
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planes(entries: &[(u16, u8)]) -> HashMap<u16, Bytes> {
        entries.iter().map(|&(bit, byte)| (bit, Bytes::from(vec![byte]))).collect()
    }

    #[test]
    fn compiles_required_bits() {
        let q = FilterQuery::from_bit_groups([vec![9u16, 5], vec![], vec![5]]).unwrap();
        let m = Matcher::new(4, &q).unwrap();
        assert_eq!(m.required_bits(), &[5, 9]);
        assert!(!m.is_wildcard());

        let wildcard = Matcher::new(4, &FilterQuery::from_bit_groups([Vec::<u16>::new()]).unwrap()).unwrap();
        assert!(wildcard.is_wildcard());
        assert!(wildcard.required_bits().is_empty());
    }

    #[test]
    fn four_block_scenario() {
        // Blocks 0..4 carry {5}, {}, {5, 9}, {9}.
        let p = planes(&[(5, 0b1010_0000), (9, 0b0011_0000)]);

        let only5 = Matcher::new(4, &FilterQuery::from_bit_groups([vec![5u16]]).unwrap()).unwrap();
        let v = only5.evaluate(&p).unwrap();
        assert_eq!(only5.matching_blocks(0, &v, 0, 3, Direction::Ascending), vec![0, 2]);

        let both = Matcher::new(4, &FilterQuery::from_bit_groups([vec![5u16], vec![9]]).unwrap()).unwrap();
        let v = both.evaluate(&p).unwrap();
        assert_eq!(both.matching_blocks(0, &v, 0, 3, Direction::Ascending), vec![2]);

        let either = Matcher::new(4, &FilterQuery::from_bit_groups([vec![5u16, 9]]).unwrap()).unwrap();
        let v = either.evaluate(&p).unwrap();
        assert_eq!(either.matching_blocks(0, &v, 0, 3, Direction::Descending), vec![3, 2, 0]);
    }

    #[test]
    fn missing_or_short_plane_fails() {
        let m = Matcher::new(16, &FilterQuery::from_bit_groups([vec![1u16]]).unwrap()).unwrap();
        assert!(m.evaluate(&HashMap::new()).is_none());
        assert!(m.evaluate(&planes(&[(1, 0xff)])).is_none());
    }

    #[test]
    fn matching_blocks_respects_bounds() {
        let m = Matcher::new(8, &FilterQuery::default()).unwrap();
        let v = m.evaluate(&HashMap::new()).unwrap();
        assert_eq!(m.matching_blocks(2, &v, 3, 5, Direction::Ascending), vec![19, 20, 21]);
    }
}
