//! Immutable, sorted on-disk cell store: data blocks, a block index, a
//! bloom filter, and a trailer. Cells are appended in
//! ascending key order by a [`CellStoreWriter`] and later read back
//! through [`CellStore`] and its lazily block-loading scanner.

mod index;
mod payload;
mod reader;
mod trailer;
mod writer;

pub use index::{BlockIndex, BlockIndexEntry};
pub use reader::{CellStore, CellStoreScanner};
pub use trailer::{Trailer, TRAILER_LEN, TRAILER_MAGIC};
pub use writer::{CellStoreProps, CellStoreWriter};
