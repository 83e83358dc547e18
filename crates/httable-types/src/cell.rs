use crate::FamilyId;

/// Discriminates an insert from the three delete scopes a mutation can
/// carry. Ordered so that `DELETE_ROW < DELETE_COLUMN_FAMILY < DELETE_CELL <
/// INSERT` as a `u8`, which matches the flag byte's role as the
/// most-significant byte of a [`crate::SerializedKey`]: deletes at a given
/// timestamp must sort before inserts at the same row/family/qualifier so a
/// merge scanner can observe the tombstone before the cell it suppresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CellFlag {
    DeleteRow = 0,
    DeleteColumnFamily = 1,
    DeleteCell = 2,
    Insert = 3,
}

impl CellFlag {
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::DeleteRow),
            1 => Some(Self::DeleteColumnFamily),
            2 => Some(Self::DeleteCell),
            3 => Some(Self::Insert),
            _ => None,
        }
    }

    pub const fn is_delete(self) -> bool {
        !matches!(self, Self::Insert)
    }
}

/// The logical tuple a client writes or a scanner emits: `(row, family,
/// qualifier, timestamp, revision, flag, value)`.
///
/// `row` and `family` are required to be non-empty; `qualifier` may be
/// empty. `DELETE_ROW` cells carry an empty family and qualifier;
/// `DELETE_COLUMN_FAMILY` cells carry an empty qualifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub row: Vec<u8>,
    pub family: FamilyId,
    pub qualifier: Vec<u8>,
    pub timestamp: u64,
    pub revision: u64,
    pub flag: CellFlag,
    pub value: Vec<u8>,
}

impl Cell {
    pub fn insert(
        row: impl Into<Vec<u8>>,
        family: FamilyId,
        qualifier: impl Into<Vec<u8>>,
        timestamp: u64,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            row: row.into(),
            family,
            qualifier: qualifier.into(),
            timestamp,
            revision: timestamp,
            flag: CellFlag::Insert,
            value: value.into(),
        }
    }

    pub fn delete_cell(
        row: impl Into<Vec<u8>>,
        family: FamilyId,
        qualifier: impl Into<Vec<u8>>,
        timestamp: u64,
    ) -> Self {
        Self {
            row: row.into(),
            family,
            qualifier: qualifier.into(),
            timestamp,
            revision: timestamp,
            flag: CellFlag::DeleteCell,
            value: Vec::new(),
        }
    }

    pub fn delete_column_family(row: impl Into<Vec<u8>>, family: FamilyId, timestamp: u64) -> Self {
        Self {
            row: row.into(),
            family,
            qualifier: Vec::new(),
            timestamp,
            revision: timestamp,
            flag: CellFlag::DeleteColumnFamily,
            value: Vec::new(),
        }
    }

    pub fn delete_row(row: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Self {
            row: row.into(),
            family: 0,
            qualifier: Vec::new(),
            timestamp,
            revision: timestamp,
            flag: CellFlag::DeleteRow,
            value: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_ordering_puts_deletes_before_inserts() {
        assert!(
            CellFlag::DeleteRow < CellFlag::Insert,
            "DELETE_ROW must sort before INSERT for same-timestamp tombstone semantics"
        );
        assert!(
            CellFlag::DeleteColumnFamily < CellFlag::DeleteCell,
            "DELETE_COLUMN_FAMILY must sort before DELETE_CELL"
        );
    }

    #[test]
    fn delete_row_has_empty_family_and_qualifier() {
        let c = Cell::delete_row("r1", 10);
        assert!(c.qualifier.is_empty(), "DELETE_ROW qualifier must be empty");
        assert_eq!(c.flag, CellFlag::DeleteRow, "flag must be DELETE_ROW");
    }
}
