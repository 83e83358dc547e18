//! The merge-scanning half of the cell cache and cell store pairing: a
//! tagged-variant cursor enum plus the k-way merge and filter pipeline
//! built on top of it.

mod cursor;
mod merge;

pub use cursor::CursorHandle;
pub use merge::MergeScanner;
