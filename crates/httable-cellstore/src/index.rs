//! The in-memory block index: for each data block, its first key plus
//! the `(file_offset, frame_length)` needed to read it back. Persisted as
//! one compressed block-compression frame.

use httable_checksum::{decode_bytes32, decode_vint64, encode_bytes32, encode_vint64};
use httable_error::{HypertableError, Result};
use httable_types::SerializedKeyOwned;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub first_key: SerializedKeyOwned,
    pub file_offset: u64,
    pub frame_length: u64,
}

/// An ordered (by `first_key`) list of block index entries, with binary
/// search for the block that should contain a given key.
#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    entries: Vec<BlockIndexEntry>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: BlockIndexEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[BlockIndexEntry] {
        &self.entries
    }

    /// Returns the index of the block that should be scanned first for
    /// `key`: the last block whose `first_key <= key`, or block 0 if
    /// `key` precedes every block's first key.
    pub fn block_for_key(&self, key: &SerializedKeyOwned) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        match self.entries.binary_search_by(|e| e.first_key.cmp(key)) {
            Ok(i) => Some(i),
            Err(0) => Some(0),
            Err(i) => Some(i - 1),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_vint64(&mut buf, self.entries.len() as u64);
        for entry in &self.entries {
            encode_bytes32(&mut buf, entry.first_key.as_bytes());
            encode_vint64(&mut buf, entry.file_offset);
            encode_vint64(&mut buf, entry.frame_length);
        }
        buf
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        let (count, mut pos) = decode_vint64(buf)?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (key_bytes, consumed) = decode_bytes32(&buf[pos..])?;
            let first_key = SerializedKeyOwned::from_bytes(key_bytes.to_vec());
            pos += consumed;
            let (file_offset, consumed) = decode_vint64(&buf[pos..])?;
            pos += consumed;
            let (frame_length, consumed) = decode_vint64(&buf[pos..])?;
            pos += consumed;
            entries.push(BlockIndexEntry {
                first_key,
                file_offset,
                frame_length,
            });
        }
        if !entries.windows(2).all(|w| w[0].first_key < w[1].first_key) {
            return Err(HypertableError::InvalidMetadata("block index keys are not strictly ascending".into()));
        }
        Ok(Self { entries })
    }
}
