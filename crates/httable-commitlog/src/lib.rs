//! The durable, ordered, block-compressed mutation log every range writes
//! to before inserting into its access-group caches.

mod frame;
mod reader;
mod writer;

pub use frame::{FrameHeader, FRAME_MAGIC, LINK_TABLE_ID};
pub use reader::{CommitLogEntry, CommitLogReader, CommitLogScanResult};
pub use writer::CommitLogWriter;
