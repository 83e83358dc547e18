//! Block compression codecs and the versioned block header shared by
//! `CellStore` data blocks and `CommitLog` frames.

mod codec;
mod header;
mod lzo;
mod quicklz;

pub use codec::{codec_for, BlockCodec, CompressionType, NoneCodec};
pub use header::{BlockHeader, BLOCK_MAGIC, FIXED_HEADER_LEN};
pub use lzo::LzoCodec;
pub use quicklz::QuicklzCodec;

use httable_checksum::fletcher32;
use httable_error::{HypertableError, Result};

/// Compresses `payload` with `codec` and frames it as
/// `header || compressed_payload`. If the compressed form is not smaller
/// than the original, the frame is rewritten with [`NoneCodec`] instead.
pub fn encode_block(codec: &dyn BlockCodec, payload: &[u8]) -> Result<Vec<u8>> {
    let compressed = codec.compress(payload)?;
    let (compression_type, body) = if compressed.len() < payload.len() {
        (codec.compression_type(), compressed)
    } else {
        (CompressionType::None, payload.to_vec())
    };

    let header = BlockHeader {
        compression_type,
        payload_checksum: fletcher32(&body),
        uncompressed_len: payload.len() as u32,
        compressed_len: body.len() as u32,
    };

    let mut frame = header.encode();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes one frame produced by [`encode_block`], returning the
/// decompressed payload and the total number of bytes the frame occupied
/// (header + compressed body), so the caller can advance past it.
pub fn decode_block(frame: &[u8]) -> Result<(Vec<u8>, usize)> {
    let (header, header_len) = BlockHeader::decode(frame)?;
    let body_end = header_len + header.compressed_len as usize;
    if frame.len() < body_end {
        return Err(HypertableError::BlockCompressorTruncated);
    }
    let body = &frame[header_len..body_end];

    let actual_checksum = fletcher32(body);
    if actual_checksum != header.payload_checksum {
        return Err(HypertableError::BlockCompressorChecksumMismatch {
            expected: header.payload_checksum,
            actual: actual_checksum,
        });
    }

    let codec = codec_for(header.compression_type);
    let payload = codec.decompress(body, header.uncompressed_len as usize)?;
    Ok((payload, body_end))
}
