//! The canonical on-disk key format: one byte string whose raw
//! lexicographic (`memcmp`) order is the table's total order.
//!
//! Layout (the flag byte sits after the qualifier rather than at offset 0,
//! so two keys differing only in flag still compare by row/family/
//! qualifier first):
//!
//! ```text
//! row(NUL-terminated) | family_id(1) | qualifier(NUL-terminated)
//!     | flag(1) | ~timestamp(8, big-endian) | ~revision(8, big-endian)
//! ```
//!
//! `~x` denotes the one's complement of `x`, which turns ascending integer
//! order into descending byte order so that, within one row/family/
//! qualifier, the newest timestamp sorts first.

use httable_error::{HypertableError, Result};

use crate::cell::{Cell, CellFlag};
use crate::FamilyId;

const NUL: u8 = 0;

/// An owned, encoded key. `Ord`/`PartialOrd` are derived from the
/// underlying byte vector, which is exactly the total order the format is
/// designed to produce under plain byte comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SerializedKeyOwned(Vec<u8>);

/// A borrowed view over an encoded key's bytes, used by scanners reading
/// keys out of a block buffer without copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SerializedKey<'a>(&'a [u8]);

/// The logical fields recovered by decoding a [`SerializedKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey<'a> {
    pub row: &'a [u8],
    pub family: FamilyId,
    pub qualifier: &'a [u8],
    pub flag: CellFlag,
    pub timestamp: u64,
    pub revision: u64,
}

fn check_no_interior_nul(field: &[u8], what: &'static str) -> Result<()> {
    if field.contains(&NUL) {
        return Err(HypertableError::internal(format!(
            "{what} contains an embedded NUL byte, which is not representable in a SerializedKey"
        )));
    }
    Ok(())
}

impl SerializedKeyOwned {
    pub fn encode(cell: &Cell) -> Result<Self> {
        check_no_interior_nul(&cell.row, "row")?;
        check_no_interior_nul(&cell.qualifier, "qualifier")?;

        let mut buf = Vec::with_capacity(cell.row.len() + cell.qualifier.len() + 20);
        buf.extend_from_slice(&cell.row);
        buf.push(NUL);
        buf.push(cell.family);
        buf.extend_from_slice(&cell.qualifier);
        buf.push(NUL);
        buf.push(cell.flag as u8);
        buf.extend_from_slice(&(!cell.timestamp).to_be_bytes());
        buf.extend_from_slice(&(!cell.revision).to_be_bytes());
        Ok(Self(buf))
    }

    pub fn as_key(&self) -> SerializedKey<'_> {
        SerializedKey(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn decode(&self) -> Result<DecodedKey<'_>> {
        self.as_key().decode()
    }
}

impl<'a> SerializedKey<'a> {
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn to_owned_key(&self) -> SerializedKeyOwned {
        SerializedKeyOwned(self.0.to_vec())
    }

    /// Decode the logical fields out of the raw bytes. Fails with
    /// [`HypertableError::SerializationInputOverrun`] if the buffer is too
    /// short to contain a well-formed key.
    pub fn decode(&self) -> Result<DecodedKey<'a>> {
        let bytes = self.0;
        let overrun = |wanted: usize| HypertableError::SerializationInputOverrun {
            wanted,
            available: bytes.len(),
        };

        let row_end = memchr(bytes, NUL).ok_or_else(|| overrun(1))?;
        let row = &bytes[..row_end];
        let mut pos = row_end + 1;

        if pos >= bytes.len() {
            return Err(overrun(pos + 1));
        }
        let family = bytes[pos];
        pos += 1;

        let qual_end = pos + memchr(&bytes[pos..], NUL).ok_or_else(|| overrun(pos + 1))?;
        let qualifier = &bytes[pos..qual_end];
        pos = qual_end + 1;

        if pos >= bytes.len() {
            return Err(overrun(pos + 1));
        }
        let flag = CellFlag::from_u8(bytes[pos])
            .ok_or_else(|| HypertableError::internal(format!("invalid cell flag byte {}", bytes[pos])))?;
        pos += 1;

        if pos + 16 > bytes.len() {
            return Err(overrun(pos + 16));
        }
        let ts_bytes: [u8; 8] = bytes[pos..pos + 8].try_into().unwrap();
        let timestamp = !u64::from_be_bytes(ts_bytes);
        pos += 8;
        let rev_bytes: [u8; 8] = bytes[pos..pos + 8].try_into().unwrap();
        let revision = !u64::from_be_bytes(rev_bytes);

        Ok(DecodedKey {
            row,
            family,
            qualifier,
            flag,
            timestamp,
            revision,
        })
    }
}

fn memchr(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}
