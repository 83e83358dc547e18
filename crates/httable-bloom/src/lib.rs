//! Probabilistic membership filter, persisted with a Fletcher-32 checksum
//! exactly as the original Hypertable's `BloomFilterWithChecksum` does:
//! the serialized form is `[checksum(4, little-endian)][bit array]`, with
//! the checksum computed over the bit array alone.

mod murmur2;

use httable_checksum::fletcher32;
use httable_error::{HypertableError, Result};
use murmur2::murmur_hash2;

/// Sizes and holds a bloom filter for `items_estimate` items at
/// `false_positive_prob`, using `bits = n * (-ln p) / ln2^2` and
/// `k = -log2(p)` hash functions (rounded to the nearest integer, minimum
/// 1).
#[derive(Debug, Clone)]
pub struct BloomFilter {
    num_bits: u64,
    num_hashes: u32,
    bits: Vec<u8>,
    items_estimate: u64,
    false_positive_prob: f64,
}

fn size_bits(items_estimate: u64, false_positive_prob: f64) -> u64 {
    if items_estimate == 0 {
        return 8;
    }
    let n = items_estimate as f64;
    let p = false_positive_prob;
    let bits = n * (-p.ln()) / (std::f64::consts::LN_2 * std::f64::consts::LN_2);
    (bits.ceil() as u64).max(8)
}

fn num_hash_functions(false_positive_prob: f64) -> u32 {
    let k = -false_positive_prob.log2();
    (k.round() as u32).max(1)
}

impl BloomFilter {
    pub fn new(items_estimate: u64, false_positive_prob: f64) -> Self {
        let num_bits = size_bits(items_estimate, false_positive_prob);
        let num_hashes = num_hash_functions(false_positive_prob);
        let num_bytes = ((num_bits + 7) / 8) as usize;
        Self {
            num_bits,
            num_hashes,
            bits: vec![0u8; num_bytes],
            items_estimate,
            false_positive_prob,
        }
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn set_bit(&mut self, bit: u64) {
        let byte = (bit / 8) as usize;
        let offset = (bit % 8) as u8;
        self.bits[byte] |= 1 << offset;
    }

    fn get_bit(&self, bit: u64) -> bool {
        let byte = (bit / 8) as usize;
        let offset = (bit % 8) as u8;
        (self.bits[byte] >> offset) & 1 == 1
    }

    /// Each hash function's seed is the previous hash function's output;
    /// the first seed is the key's length, matching
    /// `BloomFilterWithChecksum.h`.
    fn bit_positions(&self, key: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let mut hash = key.len() as u32;
        (0..self.num_hashes).map(move |_| {
            hash = murmur_hash2(key, hash);
            (hash as u64) % self.num_bits
        })
    }

    pub fn insert(&mut self, key: &[u8]) {
        let positions: Vec<u64> = self.bit_positions(key).collect();
        for bit in positions {
            self.set_bit(bit);
        }
    }

    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bit_positions(key).all(|bit| self.get_bit(bit))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let checksum = fletcher32(&self.bits);
        let mut buf = Vec::with_capacity(4 + self.bits.len());
        buf.extend_from_slice(&(checksum as i32).to_le_bytes());
        buf.extend_from_slice(&self.bits);
        buf
    }

    pub fn deserialize(
        buf: &[u8],
        num_bits: u64,
        num_hashes: u32,
        items_estimate: u64,
        false_positive_prob: f64,
    ) -> Result<Self> {
        if buf.len() < 4 {
            return Err(HypertableError::SerializationInputOverrun {
                wanted: 4,
                available: buf.len(),
            });
        }
        let stored_checksum = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as u32;
        let bits = buf[4..].to_vec();
        let computed = fletcher32(&bits);
        if stored_checksum != computed {
            return Err(HypertableError::BloomFilterChecksumMismatch {
                expected: stored_checksum,
                actual: computed,
            });
        }
        Ok(Self {
            num_bits,
            num_hashes,
            bits,
            items_estimate,
            false_positive_prob,
        })
    }

    pub fn items_estimate(&self) -> u64 {
        self.items_estimate
    }

    pub fn false_positive_prob(&self) -> f64 {
        self.false_positive_prob
    }
}
