//! The bloom-bits section processor.
//!
//! Streams the headers of one section through a [`BitPlaneGenerator`] and, on
//! commit, stages all 2048 compressed planes under keys tagged with the
//! section head hash.

use async_trait::async_trait;
use tracing::debug;

use bloombits_core::bitutil;
use bloombits_core::codec::BitPlaneGenerator;
use bloombits_core::error::IndexerError;
use bloombits_core::keys;
use bloombits_core::processor::SectionProcessor;
use bloombits_core::store::WriteBatch;
use bloombits_core::types::{BlockHash, BlockHeader};

/// Section processor that writes bloom bit-plane fragments.
pub struct BloomSectionProcessor {
    section_size: u64,
    section: u64,
    generator: Option<BitPlaneGenerator>,
    head: Option<BlockHash>,
}

impl BloomSectionProcessor {
    pub fn new(section_size: u64) -> Self {
        Self {
            section_size,
            section: 0,
            generator: None,
            head: None,
        }
    }
}

#[async_trait]
impl SectionProcessor for BloomSectionProcessor {
    async fn reset(&mut self, section: u64, _prev_head: Option<BlockHash>) -> Result<(), IndexerError> {
        self.generator = Some(BitPlaneGenerator::new(self.section_size)?);
        self.section = section;
        self.head = None;
        Ok(())
    }

    async fn process(&mut self, header: &BlockHeader) -> Result<(), IndexerError> {
        let generator = self
            .generator
            .as_mut()
            .ok_or_else(|| IndexerError::Other("bloom processor used before reset".into()))?;
        let first = self.section * self.section_size;
        let offset = header.number.checked_sub(first).ok_or_else(|| {
            IndexerError::Other(format!(
                "header #{} precedes section {}",
                header.number, self.section
            ))
        })?;
        generator.add_bloom(offset, &header.bloom)?;
        self.head = Some(header.hash);
        Ok(())
    }

    async fn commit(&mut self, batch: &mut WriteBatch) -> Result<(), IndexerError> {
        let generator = self
            .generator
            .take()
            .ok_or_else(|| IndexerError::Other("bloom processor committed before reset".into()))?;
        let planes = generator.into_planes()?;
        let head = self
            .head
            .take()
            .ok_or_else(|| IndexerError::Other("bloom processor committed an empty section".into()))?;

        let mut bytes = 0usize;
        for (bit, plane) in planes.iter().enumerate() {
            let compressed = bitutil::compress(plane);
            bytes += compressed.len();
            batch.put(keys::fragment_key(bit as u16, self.section, &head), compressed);
        }
        debug!(section = self.section, head = %head, bytes, "bloom bits staged");
        Ok(())
    }

    fn name(&self) -> &str {
        "bloombits"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bloombits_core::bloom::Bloom;
    use bloombits_core::codec::fragment_bit;
    use bloombits_core::store::BatchOp;
    use bloombits_core::CodecError;

    fn header(number: u64, bits: &[u16]) -> BlockHeader {
        BlockHeader {
            number,
            hash: BlockHash([number as u8 + 1; 32]),
            parent_hash: BlockHash([number as u8; 32]),
            bloom: Bloom::from_bits(bits.iter().copied()),
        }
    }

    #[tokio::test]
    async fn commit_stages_every_plane_under_head() {
        let mut p = BloomSectionProcessor::new(8);
        p.reset(1, None).await.unwrap();
        for n in 8..16 {
            let bits: &[u16] = if n % 2 == 0 { &[7] } else { &[] };
            p.process(&header(n, bits)).await.unwrap();
        }
        let mut batch = WriteBatch::new();
        p.commit(&mut batch).await.unwrap();
        assert_eq!(batch.len(), 2048);

        let head = BlockHash([16; 32]);
        let want = keys::fragment_key(7, 1, &head);
        let plane = batch
            .ops()
            .iter()
            .find_map(|op| match op {
                BatchOp::Put { key, value } if *key == want => Some(value.clone()),
                _ => None,
            })
            .unwrap();
        let plane = bitutil::decompress(&plane, 1).unwrap();
        assert!(fragment_bit(&plane, 0));
        assert!(!fragment_bit(&plane, 1));
        assert_eq!(plane, vec![0b1010_1010]);
    }

    #[tokio::test]
    async fn rejects_gaps_and_foreign_headers() {
        let mut p = BloomSectionProcessor::new(8);
        p.reset(1, None).await.unwrap();
        assert!(matches!(p.process(&header(3, &[])).await, Err(IndexerError::Other(_))));
        assert!(matches!(
            p.process(&header(9, &[])).await,
            Err(IndexerError::Codec(CodecError::OutOfOrder { expected: 0, got: 1 }))
        ));
    }

    #[tokio::test]
    async fn incomplete_section_cannot_commit() {
        let mut p = BloomSectionProcessor::new(8);
        p.reset(0, None).await.unwrap();
        p.process(&header(0, &[1])).await.unwrap();
        let mut batch = WriteBatch::new();
        assert!(matches!(
            p.commit(&mut batch).await,
            Err(IndexerError::Codec(CodecError::Incomplete { filled: 1, .. }))
        ));
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn process_before_reset_fails() {
        let mut p = BloomSectionProcessor::new(8);
        assert!(p.process(&header(0, &[])).await.is_err());
    }
}
