//! The metalog entity that tracks a range's in-flight split. A range has at most one split in flight at a time, so
//! this entity always uses the same fixed id; the metalog's
//! last-write-wins-by-id collapse means replay sees only the most
//! recent of `Started`/`Complete`.

use httable_checksum::{decode_bytes32, encode_bytes32};
use httable_error::{HypertableError, Result};
use httable_metalog::MetaLogEntity;

const SPLIT_ENTITY_TYPE: u32 = 1;
const SPLIT_ENTITY_ID: u32 = 0;

const TAG_STARTED: u8 = 0;
const TAG_COMPLETE: u8 = 1;

/// Recorded state of a range's split, as journaled by [`httable_metalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitEntity {
    /// The off-going half's writes are being captured in `split_log_dir`
    /// while the split row has not yet been handed off to the master.
    Started { split_row: Vec<u8>, split_log_dir: String },
    /// The new half has been handed off; nothing is left in flight.
    Complete,
}

impl MetaLogEntity for SplitEntity {
    fn entity_type() -> u32 {
        SPLIT_ENTITY_TYPE
    }

    fn entity_id(&self) -> u32 {
        SPLIT_ENTITY_ID
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            SplitEntity::Started { split_row, split_log_dir } => {
                buf.push(TAG_STARTED);
                encode_bytes32(&mut buf, split_row);
                encode_bytes32(&mut buf, split_log_dir.as_bytes());
            }
            SplitEntity::Complete => buf.push(TAG_COMPLETE),
        }
        buf
    }

    fn decode(_id: u32, payload: &[u8]) -> Result<Self> {
        let tag = *payload
            .first()
            .ok_or_else(|| HypertableError::InvalidMetadata("empty split entity payload".into()))?;
        match tag {
            TAG_STARTED => {
                let (split_row, consumed) = decode_bytes32(&payload[1..])?;
                let split_row = split_row.to_vec();
                let (dir, _) = decode_bytes32(&payload[1 + consumed..])?;
                let split_log_dir = String::from_utf8(dir.to_vec())
                    .map_err(|e| HypertableError::InvalidMetadata(format!("split log dir is not valid UTF-8: {e}")))?;
                Ok(SplitEntity::Started { split_row, split_log_dir })
            }
            TAG_COMPLETE => Ok(SplitEntity::Complete),
            other => Err(HypertableError::InvalidMetadata(format!("unknown split entity tag {other}"))),
        }
    }
}
