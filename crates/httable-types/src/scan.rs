//! The parameters a scan is evaluated under: the key
//! range, which families to return, version/time limits, and whether
//! tombstones themselves should be emitted rather than applied.

use crate::key::SerializedKeyOwned;
use crate::FamilyId;

/// A bitmap over the 256 possible family ids, used to restrict a scan to
/// a subset of an access group's column families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyMask([u64; 4]);

impl FamilyMask {
    pub fn empty() -> Self {
        Self([0; 4])
    }

    pub fn all() -> Self {
        Self([u64::MAX; 4])
    }

    pub fn insert(&mut self, id: FamilyId) {
        let word = (id / 64) as usize;
        let bit = id % 64;
        self.0[word] |= 1 << bit;
    }

    pub fn contains(&self, id: FamilyId) -> bool {
        let word = (id / 64) as usize;
        let bit = id % 64;
        self.0[word] & (1 << bit) != 0
    }
}

impl Default for FamilyMask {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<FamilyId> for FamilyMask {
    fn from_iter<T: IntoIterator<Item = FamilyId>>(iter: T) -> Self {
        let mut mask = Self::empty();
        for id in iter {
            mask.insert(id);
        }
        mask
    }
}

/// Everything a cursor or merge scanner needs to decide which cells to
/// surface. Built once per scan request and shared, read-only, by every
/// child cursor.
#[derive(Debug, Clone)]
pub struct ScanContext {
    /// Inclusive lower bound. `None` means "from the first key".
    pub start_key: Option<SerializedKeyOwned>,
    /// Exclusive upper bound. `None` means "to the last key".
    pub end_key: Option<SerializedKeyOwned>,
    pub families: FamilyMask,
    /// Set when the scan is restricted to one row, enabling a bloom
    /// filter probe before touching a cell store at all.
    pub single_row: Option<Vec<u8>>,
    pub max_versions: Option<u32>,
    pub min_timestamp: u64,
    pub max_timestamp: u64,
    /// Wall-clock time (seconds) the TTL filter evaluates cell age against.
    pub now: u64,
    /// Debug path: suppress tombstone application and emit `DELETE_*`
    /// cells verbatim instead.
    pub return_deletes: bool,
}

impl ScanContext {
    pub fn everything(now: u64) -> Self {
        Self {
            start_key: None,
            end_key: None,
            families: FamilyMask::all(),
            single_row: None,
            max_versions: None,
            min_timestamp: 0,
            max_timestamp: u64::MAX,
            now,
            return_deletes: false,
        }
    }

    /// Whether `key`'s row falls below `start_key`'s row (used to skip a
    /// whole block before doing any per-key comparison).
    pub fn before_start(&self, key: &SerializedKeyOwned) -> bool {
        match &self.start_key {
            Some(start) => key < start,
            None => false,
        }
    }

    pub fn past_end(&self, key: &SerializedKeyOwned) -> bool {
        match &self.end_key {
            Some(end) => key >= end,
            None => false,
        }
    }
}
