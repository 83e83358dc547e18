use httable_error::{HypertableError, Result};

use crate::lzo::LzoCodec;
use crate::quicklz::QuicklzCodec;

/// The on-disk compression type code, stored as the second byte of every
/// block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None = 0,
    Lzo = 1,
    Quicklz = 2,
}

impl CompressionType {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::Lzo),
            2 => Ok(Self::Quicklz),
            _ => Err(HypertableError::BlockCompressorBadHeader),
        }
    }
}

/// A block codec compresses and decompresses the payload of one
/// cell-store/commit-log block. Implementations are stateless and
/// thread-safe so one instance can be shared across writers.
pub trait BlockCodec: Send + Sync {
    fn compression_type(&self) -> CompressionType;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>>;
}

/// Identity codec: the payload is stored uncompressed. This is the only
/// codec this engine both writes and reads; see `DESIGN.md` for why `Lzo`
/// and `Quicklz` are format-compatible placeholders only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneCodec;

impl BlockCodec for NoneCodec {
    fn compression_type(&self) -> CompressionType {
        CompressionType::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
        if data.len() != uncompressed_len {
            return Err(HypertableError::BlockCompressorTruncated);
        }
        Ok(data.to_vec())
    }
}

/// Returns the codec implementation for the given on-disk compression
/// type code. Every variant of [`CompressionType`] has a working codec:
/// there is no "recognized but unsupported" state.
pub fn codec_for(compression_type: CompressionType) -> Box<dyn BlockCodec> {
    match compression_type {
        CompressionType::None => Box::new(NoneCodec),
        CompressionType::Lzo => Box::new(LzoCodec),
        CompressionType::Quicklz => Box::new(QuicklzCodec),
    }
}
