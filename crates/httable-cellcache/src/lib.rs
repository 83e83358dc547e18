//! In-memory ordered multimap from [`SerializedKey`] to [`Value`] holding
//! the recent, not-yet-compacted mutations of one access group.
//!
//! Writers append to the *active* cache under the access group's mutex.
//! When a minor compaction begins, the active cache is atomically swapped
//! for an empty one and the old contents become the *frozen* cache;
//! scanners created afterward snapshot both halves.

use std::collections::BTreeMap;
use std::sync::Arc;

use httable_types::{SerializedKeyOwned, Value};

/// An in-memory sorted map of cells, tracking its own byte and cell
/// counts so an access group can cheaply decide when to compact.
#[derive(Debug, Clone, Default)]
pub struct CellCache {
    map: BTreeMap<SerializedKeyOwned, Value>,
    byte_size: usize,
    cell_count: usize,
}

impl CellCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: SerializedKeyOwned, value: Value) {
        let added_bytes = key.as_bytes().len() + value.as_bytes().len();
        if let Some(prev) = self.map.insert(key, value) {
            // Same key re-inserted (should not happen for distinct
            // revisions, but keeps the byte accounting correct if it
            // ever does): back out the old size before adding the new one.
            self.byte_size -= prev.as_bytes().len();
        } else {
            self.cell_count += 1;
        }
        self.byte_size += added_bytes;
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    pub fn is_empty(&self) -> bool {
        self.cell_count == 0
    }

    /// All keys currently in the active cache, in ascending order. Used
    /// by an access group to gather split-row candidates without waiting
    /// for a freeze.
    pub fn keys(&self) -> impl Iterator<Item = &SerializedKeyOwned> {
        self.map.keys()
    }

    /// Freezes this cache into an immutable, shareable snapshot and
    /// leaves `self` empty, ready to become the new active cache.
    pub fn freeze(&mut self) -> CellCacheSnapshot {
        let frozen = std::mem::take(self);
        CellCacheSnapshot(Arc::new(frozen))
    }

    pub fn snapshot(&self) -> CellCacheSnapshot {
        CellCacheSnapshot(Arc::new(self.clone()))
    }
}

/// An immutable, cheaply cloneable view of a [`CellCache`] at a point in
/// time, used to build scanners that must not observe later writes.
#[derive(Debug, Clone)]
pub struct CellCacheSnapshot(Arc<CellCache>);

impl CellCacheSnapshot {
    pub fn byte_size(&self) -> usize {
        self.0.byte_size
    }

    pub fn cell_count(&self) -> usize {
        self.0.cell_count
    }

    /// All keys in this snapshot, in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &SerializedKeyOwned> {
        self.0.map.keys()
    }

    /// A cursor over all entries at or after `start` (inclusive), or from
    /// the beginning if `start` is `None`.
    pub fn scanner(&self, start: Option<&SerializedKeyOwned>) -> CellCacheScanner {
        let entries: Vec<(SerializedKeyOwned, Value)> = match start {
            Some(start) => self
                .0
                .map
                .range(start.clone()..)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => self.0.map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        CellCacheScanner { entries, pos: 0 }
    }
}

/// A forward cursor over a [`CellCacheSnapshot`]'s entries in key order.
pub struct CellCacheScanner {
    entries: Vec<(SerializedKeyOwned, Value)>,
    pos: usize,
}

impl CellCacheScanner {
    pub fn peek(&self) -> Option<(&SerializedKeyOwned, &Value)> {
        self.entries.get(self.pos).map(|(k, v)| (k, v))
    }

    pub fn advance(&mut self) {
        if self.pos < self.entries.len() {
            self.pos += 1;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httable_types::Cell;

    fn key(cell: &Cell) -> SerializedKeyOwned {
        SerializedKeyOwned::encode(cell).unwrap()
    }

    #[test]
    fn insert_tracks_byte_and_cell_counts() {
        let mut cache = CellCache::new();
        let cell = Cell::insert("r1", 1, "q1", 100, "v1");
        let k = key(&cell);
        let expected_bytes = k.as_bytes().len() + cell.value.len();
        cache.insert(k, Value::new(cell.value.clone()));
        assert_eq!(cache.cell_count(), 1, "one insert must increment cell_count to 1");
        assert_eq!(cache.byte_size(), expected_bytes, "byte_size must equal key+value lengths");
    }

    #[test]
    fn freeze_empties_active_and_preserves_contents_in_snapshot() {
        let mut cache = CellCache::new();
        let cell = Cell::insert("r1", 1, "q1", 100, "v1");
        cache.insert(key(&cell), Value::new(cell.value.clone()));
        let snapshot = cache.freeze();
        assert!(cache.is_empty(), "active cache must be empty after freeze");
        assert_eq!(snapshot.cell_count(), 1, "frozen snapshot must retain the cell");
    }

    #[test]
    fn scanner_yields_entries_in_key_order() {
        let mut cache = CellCache::new();
        cache.insert(key(&Cell::insert("b", 1, "q", 100, "v")), Value::new(b"v".to_vec()));
        cache.insert(key(&Cell::insert("a", 1, "q", 100, "v")), Value::new(b"v".to_vec()));
        let snapshot = cache.snapshot();
        let mut scanner = snapshot.scanner(None);
        let (first, _) = scanner.peek().unwrap();
        let first_row = first.decode().unwrap().row.to_vec();
        assert_eq!(first_row, b"a", "scanner must yield row \"a\" before row \"b\"");
        scanner.advance();
        let (second, _) = scanner.peek().unwrap();
        assert_eq!(second.decode().unwrap().row, b"b");
        scanner.advance();
        assert!(scanner.is_exhausted(), "scanner must be exhausted after two entries");
    }

    #[test]
    fn writes_after_snapshot_are_not_observed() {
        let mut cache = CellCache::new();
        cache.insert(key(&Cell::insert("a", 1, "q", 100, "v")), Value::new(b"v".to_vec()));
        let snapshot = cache.snapshot();
        cache.insert(key(&Cell::insert("z", 1, "q", 100, "v")), Value::new(b"v".to_vec()));
        assert_eq!(snapshot.cell_count(), 1, "snapshot must not see writes made after it was taken");
    }
}
