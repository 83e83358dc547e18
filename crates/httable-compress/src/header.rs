//! The versioned block-compression frame header, byte-for-byte grounded on
//! `BlockCompressionHeader.cc`: magic, a declared header length (to allow
//! future padding), the compression type, a Fletcher-32 payload checksum,
//! the uncompressed/compressed lengths, and a trailing 2-byte header
//! checksum covering every header byte written before it.

use httable_checksum::fletcher32;
use httable_error::{HypertableError, Result};

use crate::CompressionType;

pub const BLOCK_MAGIC: [u8; 10] = *b"Hypertbl\0\0";

/// Fixed header length with no reserved padding: `magic(10) +
/// header_len(1) + compression_type(1) + payload_checksum(4) +
/// uncompressed_len(4) + compressed_len(4) + header_checksum(2)`.
pub const FIXED_HEADER_LEN: u8 = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub compression_type: CompressionType,
    pub payload_checksum: u32,
    pub uncompressed_len: u32,
    pub compressed_len: u32,
}

impl BlockHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FIXED_HEADER_LEN as usize);
        buf.extend_from_slice(&BLOCK_MAGIC);
        buf.push(FIXED_HEADER_LEN);
        buf.push(self.compression_type.to_u8());
        buf.extend_from_slice(&self.payload_checksum.to_le_bytes());
        buf.extend_from_slice(&self.uncompressed_len.to_le_bytes());
        buf.extend_from_slice(&self.compressed_len.to_le_bytes());
        let header_checksum = (fletcher32(&buf) >> 16) as u16;
        buf.extend_from_slice(&header_checksum.to_le_bytes());
        debug_assert_eq!(buf.len(), FIXED_HEADER_LEN as usize);
        buf
    }

    /// Decodes a header, returning it plus the number of bytes consumed
    /// (the header length, so the caller can find the payload's start).
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 11 {
            return Err(HypertableError::SerializationInputOverrun {
                wanted: 11,
                available: buf.len(),
            });
        }
        if buf[0..10] != BLOCK_MAGIC {
            return Err(HypertableError::BlockCompressorBadHeader);
        }
        let header_len = buf[10] as usize;
        if buf.len() < header_len {
            return Err(HypertableError::SerializationInputOverrun {
                wanted: header_len,
                available: buf.len(),
            });
        }
        if header_len < 12 {
            return Err(HypertableError::BlockCompressorBadHeader);
        }

        let compression_type = CompressionType::from_u8(buf[11])?;
        let payload_checksum = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let uncompressed_len = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let compressed_len = u32::from_le_bytes(buf[20..24].try_into().unwrap());

        let stored_checksum = u16::from_le_bytes(buf[header_len - 2..header_len].try_into().unwrap());
        let computed_checksum = (fletcher32(&buf[..header_len - 2]) >> 16) as u16;
        if stored_checksum != computed_checksum {
            return Err(HypertableError::BlockCompressorBadHeader);
        }

        Ok((
            Self {
                compression_type,
                payload_checksum,
                uncompressed_len,
                compressed_len,
            },
            header_len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let header = BlockHeader {
            compression_type: CompressionType::None,
            payload_checksum: 0xdead_beef,
            uncompressed_len: 1024,
            compressed_len: 1024,
        };
        let bytes = header.encode();
        let (decoded, consumed) = BlockHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header, "header must round-trip exactly");
        assert_eq!(consumed, FIXED_HEADER_LEN as usize);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut header = BlockHeader {
            compression_type: CompressionType::None,
            payload_checksum: 1,
            uncompressed_len: 1,
            compressed_len: 1,
        }
        .encode();
        header[0] ^= 0xff;
        let err = BlockHeader::decode(&header).expect_err("corrupted magic must fail");
        assert!(matches!(err, HypertableError::BlockCompressorBadHeader));
    }

    #[test]
    fn decode_rejects_corrupted_header_checksum() {
        let mut header = BlockHeader {
            compression_type: CompressionType::None,
            payload_checksum: 1,
            uncompressed_len: 1,
            compressed_len: 1,
        }
        .encode();
        let last = header.len() - 1;
        header[last] ^= 0xff;
        let err = BlockHeader::decode(&header).expect_err("corrupted header checksum must fail");
        assert!(matches!(err, HypertableError::BlockCompressorBadHeader));
    }
}
