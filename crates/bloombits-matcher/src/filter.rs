//! Filter queries: an AND of OR-groups over bloom bits.

use bloombits_core::bloom::{bloom_indexes, Bloom, BLOOM_BIT_LENGTH};

use crate::error::MatchError;

/// A set of bloom bits that must all be set. A value (address or topic)
/// contributes its three bloom bits; a raw bit position is a singleton.
pub type Alternative = Vec<u16>;

/// A filter query: a block matches iff every group has at least one
/// alternative whose bits are all set in the block's bloom.
///
/// A group with no alternatives, or with an alternative that has no bits,
/// matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterQuery {
    groups: Vec<Vec<Alternative>>,
}

impl FilterQuery {
    /// Build a query from groups of values, e.g. `[[addr_a, addr_b], [topic0]]`.
    pub fn from_values<G, V>(groups: impl IntoIterator<Item = G>) -> Self
    where
        G: IntoIterator<Item = V>,
        V: AsRef<[u8]>,
    {
        let groups = groups
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .map(|value| normalize(bloom_indexes(value.as_ref()).to_vec()))
                    .collect()
            })
            .collect();
        Self { groups }
    }

    /// Build a query from groups of raw bit positions; any set bit of a group suffices.
    pub fn from_bit_groups<G>(groups: impl IntoIterator<Item = G>) -> Result<Self, MatchError>
    where
        G: IntoIterator<Item = u16>,
    {
        let mut out = Vec::new();
        for group in groups {
            let mut alternatives = Vec::new();
            for bit in group {
                check_bit(bit)?;
                alternatives.push(vec![bit]);
            }
            out.push(alternatives);
        }
        Ok(Self { groups: out })
    }

    /// Build a query from explicit alternatives.
    pub fn from_alternatives(groups: Vec<Vec<Alternative>>) -> Result<Self, MatchError> {
        let mut out = Vec::with_capacity(groups.len());
        for group in groups {
            let mut alternatives = Vec::with_capacity(group.len());
            for alternative in group {
                for &bit in &alternative {
                    check_bit(bit)?;
                }
                alternatives.push(normalize(alternative));
            }
            out.push(alternatives);
        }
        Ok(Self { groups: out })
    }

    pub fn groups(&self) -> &[Vec<Alternative>] {
        &self.groups
    }

    /// Ground truth: evaluate the query directly against one block's bloom.
    pub fn matches_bloom(&self, bloom: &Bloom) -> bool {
        self.groups.iter().all(|group| {
            is_wildcard_group(group)
                || group
                    .iter()
                    .any(|alternative| alternative.iter().all(|&bit| bloom.is_set(bit)))
        })
    }
}

/// Returns `true` if `group` can never exclude a block.
pub fn is_wildcard_group(group: &[Alternative]) -> bool {
    group.is_empty() || group.iter().any(Vec::is_empty)
}

fn normalize(mut bits: Alternative) -> Alternative {
    bits.sort_unstable();
    bits.dedup();
    bits
}

fn check_bit(bit: u16) -> Result<(), MatchError> {
    if bit as usize >= BLOOM_BIT_LENGTH {
        return Err(MatchError::Config(format!("bloom bit {bit} out of range")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bloom(bits: &[u16]) -> Bloom {
        Bloom::from_bits(bits.iter().copied())
    }

    #[test]
    fn bit_groups_are_or_within_and_across() {
        let q = FilterQuery::from_bit_groups([vec![5u16], vec![9]]).unwrap();
        assert!(!q.matches_bloom(&bloom(&[5])));
        assert!(q.matches_bloom(&bloom(&[5, 9])));

        let q = FilterQuery::from_bit_groups([vec![5u16, 9]]).unwrap();
        assert!(q.matches_bloom(&bloom(&[9])));
        assert!(!q.matches_bloom(&bloom(&[1])));
    }

    #[test]
    fn empty_groups_are_wildcards() {
        let q = FilterQuery::from_bit_groups([Vec::<u16>::new(), vec![3]]).unwrap();
        assert!(q.matches_bloom(&bloom(&[3])));
        assert!(FilterQuery::default().matches_bloom(&bloom(&[])));
        assert!(is_wildcard_group(&[vec![1], vec![]]));
    }

    #[test]
    fn values_match_their_own_bloom() {
        let address = [0x11u8; 20];
        let q = FilterQuery::from_values([[address]]);
        let mut b = Bloom::default();
        b.accrue(&address);
        assert!(q.matches_bloom(&b));
        assert!(!q.matches_bloom(&Bloom::default()));
    }

    #[test]
    fn alternatives_need_every_bit() {
        let q = FilterQuery::from_alternatives(vec![vec![vec![3, 1, 2, 2]]]).unwrap();
        assert_eq!(q.groups()[0][0], vec![1, 2, 3]);
        assert!(!q.matches_bloom(&bloom(&[1, 2])));
        assert!(q.matches_bloom(&bloom(&[1, 2, 3])));
    }

    #[test]
    fn out_of_range_bits_are_rejected() {
        assert!(FilterQuery::from_bit_groups([vec![2048u16]]).is_err());
        assert!(FilterQuery::from_alternatives(vec![vec![vec![1, 4000]]]).is_err());
    }
}
