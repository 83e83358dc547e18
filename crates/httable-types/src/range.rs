use serde::{Deserialize, Serialize};

use crate::TableId;

/// Identifies a row-interval partition of one table's generation. Ranges
/// are `(start_row, end_row]`: `start_row` is exclusive, `end_row` is
/// inclusive, matching the invariant that the union of a table's ranges is
/// a disjoint cover of the row space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub table_id: TableId,
    pub table_generation: u64,
    /// `None` means the range starts at the beginning of the row space.
    pub start_row_exclusive: Option<Vec<u8>>,
    /// `None` means the range extends to the end of the row space (this
    /// is the last range of a table).
    pub end_row_inclusive: Option<Vec<u8>>,
}

impl RangeSpec {
    pub fn contains_row(&self, row: &[u8]) -> bool {
        let after_start = match &self.start_row_exclusive {
            Some(start) => row > start.as_slice(),
            None => true,
        };
        let within_end = match &self.end_row_inclusive {
            Some(end) => row <= end.as_slice(),
            None => true,
        };
        after_start && within_end
    }
}
