//! Encoding of the `(SerializedKey, Value)` run that makes up one data
//! block's decompressed payload.

use httable_checksum::{decode_bytes32, encode_bytes32};
use httable_error::Result;
use httable_types::{SerializedKeyOwned, Value};

pub fn encode_pairs(buf: &mut Vec<u8>, pairs: &[(SerializedKeyOwned, Value)]) {
    for (key, value) in pairs {
        encode_bytes32(buf, key.as_bytes());
        value.encode(buf);
    }
}

/// Decodes every `(key, value)` pair out of a decompressed block payload.
pub fn decode_pairs(buf: &[u8]) -> Result<Vec<(SerializedKeyOwned, Value)>> {
    let mut pairs = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let (key_bytes, consumed) = decode_bytes32(&buf[pos..])?;
        let key = SerializedKeyOwned::from_bytes(key_bytes.to_vec());
        pos += consumed;
        let (value, consumed) = Value::decode(&buf[pos..])?;
        pos += consumed;
        pairs.push((key, value));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httable_types::Cell;

    #[test]
    fn encode_decode_round_trips() {
        let pairs = vec![
            (
                SerializedKeyOwned::encode(&Cell::insert("a", 1, "q", 100, "v1")).unwrap(),
                Value::new(b"v1".to_vec()),
            ),
            (
                SerializedKeyOwned::encode(&Cell::insert("b", 1, "q", 100, "v2")).unwrap(),
                Value::new(b"v2".to_vec()),
            ),
        ];
        let mut buf = Vec::new();
        encode_pairs(&mut buf, &pairs);
        let decoded = decode_pairs(&buf).unwrap();
        assert_eq!(decoded, pairs, "pairs must round-trip through encode/decode");
    }
}
