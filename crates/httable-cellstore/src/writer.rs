//! Builds one immutable cell store: cells must arrive in ascending key
//! order; blocks are flushed once the buffered, still-uncompressed
//! payload reaches the target size.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use httable_bloom::BloomFilter;
use httable_compress::{encode_block, BlockCodec};
use httable_error::{HypertableError, Result};
use httable_fs::Filesystem;
use httable_types::{BloomPolicy, FamilyId, SerializedKeyOwned, Value};

use crate::index::{BlockIndex, BlockIndexEntry};
use crate::payload::encode_pairs;
use crate::trailer::Trailer;

/// Per-access-group parameters a cell store is written under.
pub struct CellStoreProps {
    pub target_block_size: u32,
    pub codec: Box<dyn BlockCodec>,
    pub bloom_policy: BloomPolicy,
    pub bloom_items_estimate: u64,
    pub bloom_false_positive_prob: f64,
    /// Per-family TTL in seconds, used only to populate the trailer's
    /// `expiration_time`/`expirable_data` fields. Empty means no family
    /// in this access group expires cells by age.
    pub family_ttls: HashMap<FamilyId, u64>,
}

pub struct CellStoreWriter {
    fs: Arc<dyn Filesystem>,
    fd: httable_fs::FileHandle,
    props: CellStoreProps,
    buffer: Vec<(SerializedKeyOwned, Value)>,
    buffer_bytes: usize,
    last_key: Option<SerializedKeyOwned>,
    index: BlockIndex,
    file_offset: u64,
    bloom_keys: HashSet<Vec<u8>>,
    total_entries: u64,
    total_bytes: u64,
    expiration_time: u64,
    expirable_data: u64,
}

fn bloom_key(policy: BloomPolicy, decoded: &httable_types::DecodedKey<'_>) -> Option<Vec<u8>> {
    match policy {
        BloomPolicy::Disabled => None,
        BloomPolicy::Row => Some(decoded.row.to_vec()),
        BloomPolicy::RowColumn => {
            let mut key = Vec::with_capacity(decoded.row.len() + decoded.qualifier.len() + 2);
            key.extend_from_slice(decoded.row);
            key.push(0);
            key.push(decoded.family);
            key.extend_from_slice(decoded.qualifier);
            Some(key)
        }
    }
}

impl CellStoreWriter {
    pub fn create(fs: Arc<dyn Filesystem>, path: &str, props: CellStoreProps) -> Result<Self> {
        let fd = fs.create(path, true, 0, 0, 0)?;
        Ok(Self {
            fs,
            fd,
            props,
            buffer: Vec::new(),
            buffer_bytes: 0,
            last_key: None,
            index: BlockIndex::new(),
            file_offset: 0,
            bloom_keys: HashSet::new(),
            total_entries: 0,
            total_bytes: 0,
            expiration_time: 0,
            expirable_data: 0,
        })
    }

    /// Appends one cell. Keys must be strictly greater than the
    /// previously added key; violating this fails with
    /// [`HypertableError::BadKeyOrder`] and leaves the writer's state
    /// unchanged.
    pub fn add(&mut self, key: SerializedKeyOwned, value: Value) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= *last {
                return Err(HypertableError::BadKeyOrder);
            }
        }

        let decoded = key.decode()?;
        if let Some(ttl) = self.props.family_ttls.get(&decoded.family) {
            let expires_at = decoded.timestamp.saturating_add(*ttl);
            self.expiration_time = self.expiration_time.max(expires_at);
            self.expirable_data += key.as_bytes().len() as u64 + value.as_bytes().len() as u64;
        }
        if let Some(bloom_key) = bloom_key(self.props.bloom_policy, &decoded) {
            self.bloom_keys.insert(bloom_key);
        }

        let added_bytes = key.as_bytes().len() + value.as_bytes().len();
        self.buffer_bytes += added_bytes;
        self.total_entries += 1;
        self.total_bytes += added_bytes as u64;
        self.last_key = Some(key.clone());
        self.buffer.push((key, value));

        if self.buffer_bytes >= self.props.target_block_size as usize {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let first_key = self.buffer[0].0.clone();
        let mut payload = Vec::new();
        encode_pairs(&mut payload, &self.buffer);
        let frame = encode_block(self.props.codec.as_ref(), &payload)?;
        self.fs.append(self.fd, &frame, false)?;
        self.index.push(BlockIndexEntry {
            first_key,
            file_offset: self.file_offset,
            frame_length: frame.len() as u64,
        });
        self.file_offset += frame.len() as u64;
        self.buffer.clear();
        self.buffer_bytes = 0;
        Ok(())
    }

    /// Flushes the final partial block, writes the bloom filter, block
    /// index and trailer, and closes the file. `creation_timestamp` is
    /// stamped into the trailer verbatim.
    pub fn finalize(mut self, creation_timestamp: u64) -> Result<Trailer> {
        self.flush_block()?;

        let (bloom_offset, bloom_length, bloom_num_hashes, bloom_num_bits, bloom_items_actual) =
            if self.props.bloom_policy == BloomPolicy::Disabled {
                (0, 0, 0, 0, 0)
            } else {
                let items_estimate = self.props.bloom_items_estimate.max(self.bloom_keys.len() as u64).max(1);
                let mut filter = BloomFilter::new(items_estimate, self.props.bloom_false_positive_prob);
                for key in &self.bloom_keys {
                    filter.insert(key);
                }
                let bytes = filter.serialize();
                let offset = self.file_offset;
                self.fs.append(self.fd, &bytes, false)?;
                self.file_offset += bytes.len() as u64;
                (offset, bytes.len() as u64, filter.num_hashes(), filter.num_bits(), self.bloom_keys.len() as u64)
            };

        let index_offset = self.file_offset;
        let index_payload = self.index.serialize();
        let index_frame = encode_block(self.props.codec.as_ref(), &index_payload)?;
        self.fs.append(self.fd, &index_frame, false)?;
        let index_length = index_frame.len() as u64;
        self.file_offset += index_length;

        let trailer = Trailer {
            index_offset,
            index_length,
            bloom_offset,
            bloom_length,
            total_entries: self.total_entries,
            total_bytes: self.total_bytes,
            compression_type: self.props.codec.compression_type(),
            bloom_policy: self.props.bloom_policy,
            bloom_items_estimate: self.props.bloom_items_estimate,
            bloom_items_actual,
            bloom_num_hashes,
            bloom_num_bits,
            expiration_time: self.expiration_time,
            expirable_data: self.expirable_data,
            creation_timestamp,
        };
        let trailer_bytes = trailer.encode();
        self.fs.append(self.fd, &trailer_bytes, true)?;
        self.fs.close(self.fd)?;
        Ok(trailer)
    }
}
