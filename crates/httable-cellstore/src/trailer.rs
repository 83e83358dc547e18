//! The fixed-size record at the end of every cell store, carrying enough
//! metadata to locate and validate the block index and bloom filter
//! without scanning the file.

use httable_checksum::fletcher32;
use httable_compress::CompressionType;
use httable_error::{HypertableError, Result};
use httable_types::BloomPolicy;

pub const TRAILER_MAGIC: [u8; 8] = *b"HtTrlr01";

/// `magic(8) + compression_type(1) + bloom_policy(1) + 11 u64 fields(88)
/// + bloom_num_hashes(4) + creation_timestamp(8) + trailer_checksum(4)`.
pub const TRAILER_LEN: usize = 8 + 1 + 1 + 11 * 8 + 4 + 8 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub index_offset: u64,
    pub index_length: u64,
    pub bloom_offset: u64,
    pub bloom_length: u64,
    pub total_entries: u64,
    pub total_bytes: u64,
    pub compression_type: CompressionType,
    pub bloom_policy: BloomPolicy,
    pub bloom_items_estimate: u64,
    pub bloom_items_actual: u64,
    pub bloom_num_hashes: u32,
    pub bloom_num_bits: u64,
    pub expiration_time: u64,
    pub expirable_data: u64,
    pub creation_timestamp: u64,
}

fn bloom_policy_to_u8(p: BloomPolicy) -> u8 {
    match p {
        BloomPolicy::Disabled => 0,
        BloomPolicy::Row => 1,
        BloomPolicy::RowColumn => 2,
    }
}

fn bloom_policy_from_u8(v: u8) -> Result<BloomPolicy> {
    match v {
        0 => Ok(BloomPolicy::Disabled),
        1 => Ok(BloomPolicy::Row),
        2 => Ok(BloomPolicy::RowColumn),
        _ => Err(HypertableError::InvalidMetadata(format!("unknown bloom policy byte {v}"))),
    }
}

impl Trailer {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TRAILER_LEN);
        buf.extend_from_slice(&TRAILER_MAGIC);
        buf.push(self.compression_type.to_u8());
        buf.push(bloom_policy_to_u8(self.bloom_policy));
        for field in [
            self.index_offset,
            self.index_length,
            self.bloom_offset,
            self.bloom_length,
            self.total_entries,
            self.total_bytes,
            self.bloom_items_estimate,
            self.bloom_items_actual,
            self.bloom_num_bits,
            self.expiration_time,
            self.expirable_data,
        ] {
            buf.extend_from_slice(&field.to_le_bytes());
        }
        buf.extend_from_slice(&self.bloom_num_hashes.to_le_bytes());
        // creation_timestamp is checksummed but stored after the checksum
        // field is computed over everything preceding it, mirroring the
        // block header's "checksum covers everything written so far".
        buf.extend_from_slice(&self.creation_timestamp.to_le_bytes());
        let checksum = fletcher32(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        debug_assert_eq!(buf.len(), TRAILER_LEN);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < TRAILER_LEN {
            return Err(HypertableError::SerializationInputOverrun {
                wanted: TRAILER_LEN,
                available: buf.len(),
            });
        }
        let buf = &buf[buf.len() - TRAILER_LEN..];
        if buf[0..8] != TRAILER_MAGIC {
            return Err(HypertableError::InvalidMetadata("cell store trailer magic mismatch".into()));
        }

        let checksum_at = TRAILER_LEN - 4;
        let stored_checksum = u32::from_le_bytes(buf[checksum_at..].try_into().unwrap());
        let computed_checksum = fletcher32(&buf[..checksum_at]);
        if stored_checksum != computed_checksum {
            return Err(HypertableError::InvalidMetadata("cell store trailer checksum mismatch".into()));
        }

        let compression_type = CompressionType::from_u8(buf[8])?;
        let bloom_policy = bloom_policy_from_u8(buf[9])?;

        let mut pos = 10;
        let mut next_u64 = || {
            let v = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
            pos += 8;
            v
        };
        let index_offset = next_u64();
        let index_length = next_u64();
        let bloom_offset = next_u64();
        let bloom_length = next_u64();
        let total_entries = next_u64();
        let total_bytes = next_u64();
        let bloom_items_estimate = next_u64();
        let bloom_items_actual = next_u64();
        let bloom_num_bits = next_u64();
        let expiration_time = next_u64();
        let expirable_data = next_u64();
        let bloom_num_hashes = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let creation_timestamp = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());

        Ok(Self {
            index_offset,
            index_length,
            bloom_offset,
            bloom_length,
            total_entries,
            total_bytes,
            compression_type,
            bloom_policy,
            bloom_items_estimate,
            bloom_items_actual,
            bloom_num_hashes,
            bloom_num_bits,
            expiration_time,
            expirable_data,
            creation_timestamp,
        })
    }
}
