//! Variable-length integer encoding: 7 bits of payload per byte, high bit
//! set on every byte but the last (the "continuation" bit), little-endian
//! group order — i.e. the same shape as protobuf's base-128 varint.

use httable_error::{HypertableError, Result};

const CONTINUATION: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7f;

pub fn encode_vint32(buf: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & PAYLOAD_MASK as u32) as u8;
        value >>= 7;
        if value != 0 {
            buf.push(byte | CONTINUATION);
        } else {
            buf.push(byte);
            break;
        }
    }
}

pub fn encode_vint64(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & PAYLOAD_MASK as u64) as u8;
        value >>= 7;
        if value != 0 {
            buf.push(byte | CONTINUATION);
        } else {
            buf.push(byte);
            break;
        }
    }
}

/// Decodes a vint32, returning the value and the number of bytes consumed.
pub fn decode_vint32(buf: &[u8]) -> Result<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= 5 {
            return Err(HypertableError::internal("vint32 longer than 5 bytes"));
        }
        value |= ((byte & PAYLOAD_MASK) as u32) << (7 * i);
        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(HypertableError::SerializationInputOverrun {
        wanted: buf.len() + 1,
        available: buf.len(),
    })
}

pub fn decode_vint64(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= 10 {
            return Err(HypertableError::internal("vint64 longer than 10 bytes"));
        }
        value |= ((byte & PAYLOAD_MASK) as u64) << (7 * i);
        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(HypertableError::SerializationInputOverrun {
        wanted: buf.len() + 1,
        available: buf.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_round_trips_as_one_byte() {
        let mut buf = Vec::new();
        encode_vint32(&mut buf, 0);
        assert_eq!(buf, vec![0], "zero must encode as a single zero byte");
        let (v, n) = decode_vint32(&buf).unwrap();
        assert_eq!((v, n), (0, 1));
    }

    #[test]
    fn decode_rejects_empty_buffer() {
        let err = decode_vint32(&[]).expect_err("empty buffer must fail");
        assert!(matches!(err, HypertableError::SerializationInputOverrun { .. }));
    }

    proptest! {
        #[test]
        fn vint32_round_trips(value: u32) {
            let mut buf = Vec::new();
            encode_vint32(&mut buf, value);
            let (decoded, consumed) = decode_vint32(&buf).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, buf.len());
        }

        #[test]
        fn vint64_round_trips(value: u64) {
            let mut buf = Vec::new();
            encode_vint64(&mut buf, value);
            let (decoded, consumed) = decode_vint64(&buf).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, buf.len());
        }
    }
}
