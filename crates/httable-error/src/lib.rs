//! Error type for the Hypertable storage engine.
//!
//! A single enum, one variant per error kind named in the error handling
//! design, used everywhere in the workspace. No crate below this one
//! defines its own error type.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HypertableError>;

#[derive(Debug, Error)]
pub enum HypertableError {
    // I/O & framing
    #[error("local I/O error: {0}")]
    LocalIoError(String),
    #[error("request timed out after {timeout_ms}ms")]
    RequestTimeout { timeout_ms: u64 },
    #[error("request truncated")]
    RequestTruncated,
    #[error("response truncated")]
    ResponseTruncated,
    #[error("broken connection")]
    CommBrokenConnection,
    #[error("not connected")]
    CommNotConnected,
    #[error("serialization input overrun: wanted {wanted} bytes, {available} available")]
    SerializationInputOverrun { wanted: usize, available: usize },

    // Format & integrity
    #[error("block compressor: bad header (magic mismatch)")]
    BlockCompressorBadHeader,
    #[error("block compressor: checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    BlockCompressorChecksumMismatch { expected: u32, actual: u32 },
    #[error("block compressor: inflate error: {0}")]
    BlockCompressorInflateError(String),
    #[error("block compressor: truncated frame")]
    BlockCompressorTruncated,
    #[error("bloom filter checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    BloomFilterChecksumMismatch { expected: u32, actual: u32 },
    #[error("metalog checksum mismatch for entity id {id}")]
    MetaLogChecksumMismatch { id: u32 },
    #[error("comm header checksum mismatch")]
    CommHeaderChecksumMismatch,
    #[error("truncated commit log file {file}")]
    TruncatedCommitLog { file: PathBuf },
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("bad key order: attempted key does not sort after the previously added key")]
    BadKeyOrder,
    #[error("bad schema: {0}")]
    BadSchema(String),

    // Semantic
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("namespace does not exist: {0}")]
    NamespaceDoesNotExist(String),
    #[error("namespace exists: {0}")]
    NamespaceExists(String),
    #[error("table exists: {0}")]
    TableExists(String),
    #[error("range not found")]
    RangeNotFound,
    #[error("range already loaded")]
    RangeAlreadyLoaded,
    #[error("range mismatch")]
    RangeMismatch,
    #[error("generation mismatch: expected {expected}, got {actual}")]
    GenerationMismatch { expected: u64, actual: u64 },
    #[error("schema generation mismatch: expected {expected}, got {actual}")]
    SchemaGenerationMismatch { expected: u64, actual: u64 },
    #[error("partial update: {rejected_count} cells out of range")]
    PartialUpdate { rejected_count: usize },
    #[error("too many columns: {count} exceeds limit {limit}")]
    TooManyColumns { count: usize, limit: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

impl HypertableError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn local_io(msg: impl Into<String>) -> Self {
        Self::LocalIoError(msg.into())
    }
}

impl From<std::io::Error> for HypertableError {
    fn from(e: std::io::Error) -> Self {
        Self::LocalIoError(e.to_string())
    }
}
