//! One frame of a commit-log file: a small fixed-plus-
//! variable header carrying enough metadata to validate and skip the
//! frame without first decompressing it, followed by the compressed
//! payload — either `(SerializedKey, Value)` pairs for a data frame, or a
//! raw directory path for a `link` control frame (the same pair framing
//! `CellStore` blocks use, kept independent here so this crate does not
//! need to depend on `httable-cellstore`).

use httable_checksum::{decode_bytes32, decode_vint32, encode_bytes32, encode_vint32, fletcher32};
use httable_compress::{codec_for, BlockCodec, CompressionType};
use httable_error::{HypertableError, Result};
use httable_types::{SerializedKeyOwned, TableId, Value};

pub const FRAME_MAGIC: [u8; 10] = *b"HTCOMMITLG";

/// Sentinel `table_id` marking a control frame (currently only `link`
/// records) rather than a batch of mutations for a real table.
pub const LINK_TABLE_ID: TableId = TableId::MAX;

/// `magic(10) + header_len(2) + uncompressed_len(4) + compressed_len(4)
/// + compression_type(2) + payload_checksum(4) + timestamp(8)`, before
/// the variable-length table identifier.
const FIXED_PREFIX_LEN: usize = 10 + 2 + 4 + 4 + 2 + 4 + 8;

/// A decoded frame header. `header_len` is the offset at which the
/// compressed payload begins, relative to the frame's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub header_len: u16,
    pub uncompressed_len: u32,
    pub compressed_len: u32,
    pub compression_type: CompressionType,
    pub payload_checksum: u32,
    pub timestamp: u64,
    pub table_id: TableId,
}

impl FrameHeader {
    pub fn frame_len(&self) -> usize {
        self.header_len as usize + self.compressed_len as usize
    }
}

pub fn encode_pairs(buf: &mut Vec<u8>, pairs: &[(SerializedKeyOwned, Value)]) {
    for (key, value) in pairs {
        encode_bytes32(buf, key.as_bytes());
        value.encode(buf);
    }
}

pub fn decode_pairs(buf: &[u8]) -> Result<Vec<(SerializedKeyOwned, Value)>> {
    let mut pos = 0;
    let mut out = Vec::new();
    while pos < buf.len() {
        let (key_bytes, consumed) = decode_bytes32(&buf[pos..])?;
        pos += consumed;
        let (value, consumed) = Value::decode(&buf[pos..])?;
        pos += consumed;
        out.push((SerializedKeyOwned::from_bytes(key_bytes.to_vec()), value));
    }
    Ok(out)
}

/// Compresses an arbitrary `payload` and frames it per the layout above.
/// If the compressed form is not smaller than the original, falls back to
/// storing it uncompressed, mirroring `httable_compress::encode_block`.
pub fn encode_frame_raw(codec: &dyn BlockCodec, table_id: TableId, timestamp: u64, payload: &[u8]) -> Result<Vec<u8>> {
    let compressed = codec.compress(payload)?;
    let (compression_type, body) = if compressed.len() < payload.len() {
        (codec.compression_type(), compressed)
    } else {
        (CompressionType::None, payload.to_vec())
    };
    let payload_checksum = fletcher32(&body);

    let mut table_id_bytes = Vec::new();
    encode_vint32(&mut table_id_bytes, table_id);
    let header_len = u16::try_from(FIXED_PREFIX_LEN + table_id_bytes.len()).expect("commit log header must fit in u16");

    let mut frame = Vec::with_capacity(header_len as usize + body.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&header_len.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&(compression_type.to_u8() as u16).to_le_bytes());
    frame.extend_from_slice(&payload_checksum.to_le_bytes());
    frame.extend_from_slice(&timestamp.to_le_bytes());
    frame.extend_from_slice(&table_id_bytes);
    debug_assert_eq!(frame.len(), header_len as usize);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Compresses `pairs` and frames them as a data frame for `table_id`.
pub fn encode_frame(codec: &dyn BlockCodec, table_id: TableId, timestamp: u64, pairs: &[(SerializedKeyOwned, Value)]) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    encode_pairs(&mut payload, pairs);
    encode_frame_raw(codec, table_id, timestamp, &payload)
}

/// Decodes one frame's header from the start of `buf`. Returns `Ok(None)`
/// — not an error — if `buf` is too short to contain a complete header;
/// the caller treats that as a truncated tail rather than corruption.
pub fn decode_frame_header(buf: &[u8]) -> Result<Option<FrameHeader>> {
    if buf.len() < FIXED_PREFIX_LEN {
        return Ok(None);
    }
    if buf[0..10] != FRAME_MAGIC {
        return Err(HypertableError::InvalidMetadata("commit log frame magic mismatch".into()));
    }
    let header_len = u16::from_le_bytes(buf[10..12].try_into().unwrap());
    if buf.len() < header_len as usize {
        return Ok(None);
    }
    let uncompressed_len = u32::from_le_bytes(buf[12..16].try_into().unwrap());
    let compressed_len = u32::from_le_bytes(buf[16..20].try_into().unwrap());
    let compression_type = CompressionType::from_u8(u16::from_le_bytes(buf[20..22].try_into().unwrap()) as u8)?;
    let payload_checksum = u32::from_le_bytes(buf[22..26].try_into().unwrap());
    let timestamp = u64::from_le_bytes(buf[26..34].try_into().unwrap());
    let (table_id, _) = decode_vint32(&buf[34..header_len as usize])?;

    Ok(Some(FrameHeader {
        header_len,
        uncompressed_len,
        compressed_len,
        compression_type,
        payload_checksum,
        timestamp,
        table_id,
    }))
}

/// Validates and decompresses the body of a frame whose header has
/// already been decoded, returning the original (uncompressed) payload.
pub fn decompress_body(header: &FrameHeader, frame: &[u8]) -> Result<Vec<u8>> {
    let body_end = header.frame_len();
    if frame.len() < body_end {
        return Err(HypertableError::BlockCompressorTruncated);
    }
    let body = &frame[header.header_len as usize..body_end];
    let actual_checksum = fletcher32(body);
    if actual_checksum != header.payload_checksum {
        return Err(HypertableError::BlockCompressorChecksumMismatch {
            expected: header.payload_checksum,
            actual: actual_checksum,
        });
    }
    let codec = codec_for(header.compression_type);
    codec.decompress(body, header.uncompressed_len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httable_compress::NoneCodec;
    use httable_types::Cell;

    fn sample_pairs() -> Vec<(SerializedKeyOwned, Value)> {
        vec![
            (SerializedKeyOwned::encode(&Cell::insert("r1", 1, "q", 100, "v1")).unwrap(), Value::new(b"v1".to_vec())),
            (SerializedKeyOwned::encode(&Cell::insert("r2", 1, "q", 100, "v2")).unwrap(), Value::new(b"v2".to_vec())),
        ]
    }

    #[test]
    fn encode_decode_frame_round_trips() {
        let pairs = sample_pairs();
        let frame = encode_frame(&NoneCodec, 7, 1_700_000_000, &pairs).unwrap();
        let header = decode_frame_header(&frame).unwrap().expect("complete frame must decode a header");
        assert_eq!(header.table_id, 7);
        assert_eq!(header.timestamp, 1_700_000_000);
        assert_eq!(header.frame_len(), frame.len());

        let payload = decompress_body(&header, &frame).unwrap();
        let decoded = decode_pairs(&payload).unwrap();
        assert_eq!(decoded, pairs, "pairs must round-trip through a frame");
    }

    #[test]
    fn decode_frame_header_reports_truncated_prefix_as_none() {
        let pairs = sample_pairs();
        let frame = encode_frame(&NoneCodec, 1, 1, &pairs).unwrap();
        let truncated = &frame[..FIXED_PREFIX_LEN - 1];
        assert!(decode_frame_header(truncated).unwrap().is_none());
    }

    #[test]
    fn decode_frame_header_reports_truncated_variable_section_as_none() {
        let pairs = sample_pairs();
        let frame = encode_frame(&NoneCodec, 300, 1, &pairs).unwrap();
        // table_id=300 needs 2 vint bytes, so cutting right at the fixed
        // prefix still leaves the header incomplete.
        let truncated = &frame[..FIXED_PREFIX_LEN];
        assert!(decode_frame_header(truncated).unwrap().is_none());
    }

    #[test]
    fn bad_magic_is_rejected_as_corruption_not_truncation() {
        let pairs = sample_pairs();
        let mut frame = encode_frame(&NoneCodec, 1, 1, &pairs).unwrap();
        frame[0] ^= 0xff;
        let err = decode_frame_header(&frame).expect_err("corrupted magic must be an error, not a truncation");
        assert!(matches!(err, HypertableError::InvalidMetadata(_)));
    }

    #[test]
    fn decompress_body_rejects_checksum_mismatch() {
        let pairs = sample_pairs();
        let mut frame = encode_frame(&NoneCodec, 1, 1, &pairs).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        let header = decode_frame_header(&frame).unwrap().unwrap();
        let err = decompress_body(&header, &frame).expect_err("corrupted payload must fail checksum");
        assert!(matches!(err, HypertableError::BlockCompressorChecksumMismatch { .. }));
    }
}
