//! Sparse bitset compression for stored fragments.
//!
//! Most planes are almost entirely zero. A buffer is encoded as a bitset of
//! which bytes are non-zero, followed by the non-zero bytes themselves; the
//! bitset is encoded the same way, recursively. If the encoding is not shorter
//! than the input, the input is stored verbatim and recognised on decode by
//! its length being equal to the target.

use crate::error::CodecError;

/// Compress `data`, returning it unchanged if compression does not help.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let encoded = encode(data);
    if encoded.len() < data.len() {
        encoded
    } else {
        data.to_vec()
    }
}

/// Decompress `data` back into a buffer of exactly `target` bytes.
pub fn decompress(data: &[u8], target: usize) -> Result<Vec<u8>, CodecError> {
    if data.len() > target {
        return Err(CodecError::ExceededTarget(target));
    }
    if data.len() == target {
        return Ok(data.to_vec());
    }
    let (out, consumed) = decode_partial(data, target)?;
    if consumed != data.len() {
        return Err(CodecError::UnreferencedData(data.len() - consumed));
    }
    Ok(out)
}

fn encode(data: &[u8]) -> Vec<u8> {
    match data.len() {
        0 => return Vec::new(),
        1 if data[0] == 0 => return Vec::new(),
        1 => return data.to_vec(),
        _ => {}
    }
    let mut nonzero_bitset = vec![0u8; (data.len() + 7) / 8];
    let mut nonzero_bytes = Vec::with_capacity(data.len());
    for (i, &b) in data.iter().enumerate() {
        if b != 0 {
            nonzero_bytes.push(b);
            nonzero_bitset[i / 8] |= 0x80 >> (i % 8);
        }
    }
    if nonzero_bytes.is_empty() {
        return Vec::new();
    }
    let mut out = encode(&nonzero_bitset);
    out.extend_from_slice(&nonzero_bytes);
    out
}

/// Decode a prefix of `data` into `target` bytes, returning how much was consumed.
fn decode_partial(data: &[u8], target: usize) -> Result<(Vec<u8>, usize), CodecError> {
    if target == 0 {
        return Ok((Vec::new(), 0));
    }
    let mut out = vec![0u8; target];
    if data.is_empty() {
        return Ok((out, 0));
    }
    if target == 1 {
        out[0] = data[0];
        let consumed = usize::from(data[0] != 0);
        return Ok((out, consumed));
    }
    let (nonzero_bitset, mut ptr) = decode_partial(data, (target + 7) / 8)?;
    for i in 0..8 * nonzero_bitset.len() {
        if nonzero_bitset[i / 8] & (0x80 >> (i % 8)) == 0 {
            continue;
        }
        let byte = *data.get(ptr).ok_or(CodecError::MissingData)?;
        if i >= out.len() {
            return Err(CodecError::ExceededTarget(target));
        }
        if byte == 0 {
            return Err(CodecError::ZeroContent);
        }
        out[i] = byte;
        ptr += 1;
    }
    Ok((out, ptr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_compresses_to_nothing() {
        let data = vec![0u8; 512];
        let c = compress(&data);
        assert!(c.is_empty());
        assert_eq!(decompress(&c, 512).unwrap(), data);
    }

    #[test]
    fn sparse_buffer_shrinks() {
        let mut data = vec![0u8; 512];
        data[3] = 0x80;
        data[400] = 0x11;
        let c = compress(&data);
        assert!(c.len() < 16, "compressed to {} bytes", c.len());
        assert_eq!(decompress(&c, 512).unwrap(), data);
    }

    #[test]
    fn dense_buffer_stored_verbatim() {
        let data: Vec<u8> = (1..=64).collect();
        let c = compress(&data);
        assert_eq!(c, data);
        assert_eq!(decompress(&c, 64).unwrap(), data);
    }

    #[test]
    fn known_encoding() {
        // Byte 0 and byte 2 are non-zero: bitset 0b1010_0000 then the bytes.
        let data = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(compress(&data), vec![0b1010_0000, 0x01, 0x02]);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(
            decompress(&[1, 2, 3], 2).unwrap_err(),
            CodecError::ExceededTarget(2)
        );
        // Bitset says two bytes follow, only one present.
        assert_eq!(
            decompress(&[0b1100_0000, 0x05], 8).unwrap_err(),
            CodecError::MissingData
        );
        assert_eq!(
            decompress(&[0b1000_0000, 0x00], 8).unwrap_err(),
            CodecError::ZeroContent
        );
        assert_eq!(
            decompress(&[0b1000_0000, 0x05, 0x07], 8).unwrap_err(),
            CodecError::UnreferencedData(1)
        );
    }
}
