use httable_checksum::{decode_vint32, encode_vint32};
use httable_error::Result;

/// Length-prefixed opaque bytes: a `vint32` length followed by the bytes
/// themselves. Values carry no interpretation at this layer; counters and
/// TTL policy are applied above the storage engine's value boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Value(Vec<u8>);

impl Value {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        encode_vint32(buf, self.0.len() as u32);
        buf.extend_from_slice(&self.0);
    }

    /// Decodes a value, returning it plus the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (len, prefix_len) = decode_vint32(buf)?;
        let len = len as usize;
        let total = prefix_len + len;
        if buf.len() < total {
            return Err(httable_error::HypertableError::SerializationInputOverrun {
                wanted: total,
                available: buf.len(),
            });
        }
        Ok((Self(buf[prefix_len..total].to_vec()), total))
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}
