//! Length-prefixed byte string encodings: `str16` (2-byte length, bytes,
//! trailing NUL) used for short identifier-like strings, and `bytes32`
//! (4-byte length, bytes, no terminator) used for opaque payloads such as
//! a cell [`crate::varint`]-framed value.

use httable_error::{HypertableError, Result};

fn overrun(wanted: usize, available: usize) -> HypertableError {
    HypertableError::SerializationInputOverrun { wanted, available }
}

pub fn encode_str16(buf: &mut Vec<u8>, s: &[u8]) {
    let len = u16::try_from(s.len()).expect("str16 payload must fit in u16");
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s);
    buf.push(0);
}

/// Decodes a `str16` field, returning the string (without its trailing
/// NUL) and the number of bytes consumed including the length prefix and
/// terminator.
pub fn decode_str16(buf: &[u8]) -> Result<(&[u8], usize)> {
    if buf.len() < 2 {
        return Err(overrun(2, buf.len()));
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let total = 2 + len + 1;
    if buf.len() < total {
        return Err(overrun(total, buf.len()));
    }
    let s = &buf[2..2 + len];
    Ok((s, total))
}

pub fn encode_bytes32(buf: &mut Vec<u8>, s: &[u8]) {
    let len = u32::try_from(s.len()).expect("bytes32 payload must fit in u32");
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s);
}

pub fn decode_bytes32(buf: &[u8]) -> Result<(&[u8], usize)> {
    if buf.len() < 4 {
        return Err(overrun(4, buf.len()));
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let total = 4 + len;
    if buf.len() < total {
        return Err(overrun(total, buf.len()));
    }
    Ok((&buf[4..total], total))
}
