//! Core data model types for the Hypertable storage engine: the logical
//! [`Cell`] tuple, its canonical on-disk [`SerializedKey`] encoding, values,
//! and table/schema/range descriptors.

mod cell;
mod key;
mod range;
mod scan;
mod schema;
mod value;

pub use cell::{Cell, CellFlag};
pub use key::{DecodedKey, SerializedKey, SerializedKeyOwned};
pub use range::RangeSpec;
pub use scan::{FamilyMask, ScanContext};
pub use schema::{AccessGroupSpec, BloomPolicy, ColumnFamilySpec, Schema};
pub use value::Value;

/// Stable numeric identifier for a table, assigned by the (out-of-scope)
/// namespace service.
pub type TableId = u32;

/// Column family identifier, in `[1, 255]` per the schema's family id space.
pub type FamilyId = u8;
