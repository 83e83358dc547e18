//! Serialization primitives and the checksums shared by the engine's
//! on-disk formats: cell-store blocks, the bloom filter, commit-log
//! frames, and metalog entries all checksum their payload with
//! [`fletcher32`]; [`adler32`] is available for formats that call for it
//! instead.

mod adler32;
mod fletcher32;
mod strings;
mod varint;

pub use adler32::adler32;
pub use fletcher32::fletcher32;
pub use strings::{decode_bytes32, decode_str16, encode_bytes32, encode_str16};
pub use varint::{decode_vint32, decode_vint64, encode_vint32, encode_vint64};
