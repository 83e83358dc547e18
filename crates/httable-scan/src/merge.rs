//! K-way merge over a cell cache cursor and one cursor per live cell
//! store, applying the filter pipeline in order: range, family mask, TTL,
//! tombstone propagation, max_versions, and the time predicate.
//! `return_deletes` bypasses only tombstone propagation — `DELETE_*`
//! cells are emitted verbatim instead of suppressing older inserts — but
//! max_versions and the time bound still apply to every cell, tombstones
//! included.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use httable_error::Result;
use httable_types::{CellFlag, FamilyId, ScanContext, SerializedKeyOwned, Value};

use crate::cursor::CursorHandle;

struct HeapItem {
    key: SerializedKeyOwned,
    value: Value,
    source: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so a max-heap (`BinaryHeap`'s only mode) pops the
        // smallest key first, matching the table's ascending order.
        other.key.cmp(&self.key)
    }
}

/// Merges an access group's cache cursor and its cell-store cursors into
/// one ascending stream, with per-row tombstone and version bookkeeping
/// reset each time the current row changes.
pub struct MergeScanner {
    cursors: Vec<CursorHandle>,
    heap: BinaryHeap<HeapItem>,
    scan_ctx: ScanContext,
    family_ttls: HashMap<FamilyId, u64>,
    current_row: Option<Vec<u8>>,
    active_delete_row: Option<u64>,
    active_delete_cf: HashMap<FamilyId, u64>,
    active_delete_cell: HashMap<(FamilyId, Vec<u8>), u64>,
    versions_seen: HashMap<(FamilyId, Vec<u8>), u32>,
}

impl MergeScanner {
    pub fn new(
        mut cursors: Vec<CursorHandle>,
        scan_ctx: ScanContext,
        family_ttls: HashMap<FamilyId, u64>,
    ) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (source, cursor) in cursors.iter_mut().enumerate() {
            if let Some((key, value)) = cursor.peek()? {
                heap.push(HeapItem { key, value, source });
            }
        }
        Ok(Self {
            cursors,
            heap,
            scan_ctx,
            family_ttls,
            current_row: None,
            active_delete_row: None,
            active_delete_cf: HashMap::new(),
            active_delete_cell: HashMap::new(),
            versions_seen: HashMap::new(),
        })
    }

    fn refill_from(&mut self, source: usize) -> Result<()> {
        self.cursors[source].advance();
        if let Some((key, value)) = self.cursors[source].peek()? {
            self.heap.push(HeapItem { key, value, source });
        }
        Ok(())
    }

    fn reset_row_state(&mut self, row: Vec<u8>) {
        self.current_row = Some(row);
        self.active_delete_row = None;
        self.active_delete_cf.clear();
        self.active_delete_cell.clear();
        self.versions_seen.clear();
    }

    /// Returns the next cell the filter pipeline decides to surface, or
    /// `None` once every cursor is exhausted or the scan range is
    /// exceeded.
    pub fn next(&mut self) -> Result<Option<(SerializedKeyOwned, Value)>> {
        loop {
            let Some(item) = self.heap.pop() else { return Ok(None) };
            self.refill_from(item.source)?;

            let key = item.key;
            let value = item.value;

            if self.scan_ctx.past_end(&key) {
                return Ok(None);
            }
            if self.scan_ctx.before_start(&key) {
                continue;
            }

            let decoded = key.decode()?;
            let family = decoded.family;
            let flag = decoded.flag;
            let timestamp = decoded.timestamp;
            let row = decoded.row.to_vec();
            let qualifier = decoded.qualifier.to_vec();

            if self.current_row.as_deref() != Some(row.as_slice()) {
                self.reset_row_state(row);
            }

            if !self.scan_ctx.families.contains(family) {
                continue;
            }

            if let Some(ttl) = self.family_ttls.get(&family) {
                if self.scan_ctx.now.saturating_sub(timestamp) > *ttl {
                    continue;
                }
            }

            match flag {
                CellFlag::DeleteRow => {
                    if !self.scan_ctx.return_deletes {
                        self.active_delete_row = Some(self.active_delete_row.map_or(timestamp, |t| t.max(timestamp)));
                        continue;
                    }
                }
                CellFlag::DeleteColumnFamily => {
                    if !self.scan_ctx.return_deletes {
                        self.active_delete_cf
                            .entry(family)
                            .and_modify(|t| *t = (*t).max(timestamp))
                            .or_insert(timestamp);
                        continue;
                    }
                }
                CellFlag::DeleteCell => {
                    if !self.scan_ctx.return_deletes {
                        self.active_delete_cell
                            .entry((family, qualifier.clone()))
                            .and_modify(|t| *t = (*t).max(timestamp))
                            .or_insert(timestamp);
                        continue;
                    }
                }
                CellFlag::Insert => {
                    if let Some(t) = self.active_delete_row {
                        if timestamp <= t {
                            continue;
                        }
                    }
                    if let Some(t) = self.active_delete_cf.get(&family) {
                        if timestamp <= *t {
                            continue;
                        }
                    }
                    if let Some(t) = self.active_delete_cell.get(&(family, qualifier.clone())) {
                        if timestamp <= *t {
                            continue;
                        }
                    }
                }
            }

            if timestamp < self.scan_ctx.min_timestamp || timestamp >= self.scan_ctx.max_timestamp {
                continue;
            }

            if let Some(max_versions) = self.scan_ctx.max_versions {
                let count = self.versions_seen.entry((family, qualifier)).or_insert(0);
                if *count >= max_versions {
                    continue;
                }
                *count += 1;
            }

            return Ok(Some((key, value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httable_cellcache::CellCache;
    use httable_types::Cell;

    fn cache_cursor(cells: Vec<Cell>) -> CursorHandle {
        let mut cache = CellCache::new();
        for cell in cells {
            let key = SerializedKeyOwned::encode(&cell).unwrap();
            cache.insert(key, Value::new(cell.value));
        }
        let snapshot = cache.snapshot();
        // Leak the snapshot's backing cache into a scanner with owned
        // entries; CellCacheScanner copies everything up front so this
        // is sound once the snapshot itself is dropped.
        CursorHandle::Cache(snapshot.scanner(None))
    }

    #[test]
    fn insert_survives_when_no_delete_present() {
        let mut scanner = MergeScanner::new(
            vec![cache_cursor(vec![Cell::insert("r", 1, "q", 100, "v")])],
            ScanContext::everything(1000),
            HashMap::new(),
        )
        .unwrap();
        let (key, value) = scanner.next().unwrap().expect("the one insert must be emitted");
        assert_eq!(key.decode().unwrap().row, b"r");
        assert_eq!(value.as_bytes(), b"v");
        assert!(scanner.next().unwrap().is_none(), "scanner must be exhausted after one cell");
    }

    #[test]
    fn delete_row_suppresses_older_inserts_in_same_row() {
        let cells = vec![
            Cell::delete_row("r", 200),
            Cell::insert("r", 1, "q1", 150, "old"),
            Cell::insert("r", 2, "q2", 250, "new"),
        ];
        let mut scanner = MergeScanner::new(vec![cache_cursor(cells)], ScanContext::everything(1000), HashMap::new()).unwrap();
        let (_, value) = scanner.next().unwrap().expect("the insert after the delete must survive");
        assert_eq!(value.as_bytes(), b"new", "only the insert newer than the DELETE_ROW timestamp must survive");
        assert!(scanner.next().unwrap().is_none());
    }

    #[test]
    fn delete_cell_suppresses_only_its_exact_key() {
        let cells = vec![
            Cell::delete_cell("r", 1, "q1", 150),
            Cell::insert("r", 1, "q1", 100, "old-q1"),
            Cell::insert("r", 1, "q2", 100, "q2-untouched"),
        ];
        let mut scanner = MergeScanner::new(vec![cache_cursor(cells)], ScanContext::everything(1000), HashMap::new()).unwrap();
        let (key, _) = scanner.next().unwrap().expect("q2's insert must survive");
        assert_eq!(key.decode().unwrap().qualifier, b"q2");
        assert!(scanner.next().unwrap().is_none(), "q1's insert must be suppressed by the delete_cell");
    }

    #[test]
    fn max_versions_limits_returned_versions_per_qualifier() {
        let cells = vec![
            Cell::insert("r", 1, "q", 300, "v3"),
            Cell::insert("r", 1, "q", 200, "v2"),
            Cell::insert("r", 1, "q", 100, "v1"),
        ];
        let mut ctx = ScanContext::everything(1000);
        ctx.max_versions = Some(2);
        let mut scanner = MergeScanner::new(vec![cache_cursor(cells)], ctx, HashMap::new()).unwrap();
        let mut values = Vec::new();
        while let Some((_, v)) = scanner.next().unwrap() {
            values.push(String::from_utf8(v.into_bytes()).unwrap());
        }
        assert_eq!(values, vec!["v3", "v2"], "only the two newest versions must be returned");
    }

    #[test]
    fn return_deletes_emits_tombstones_verbatim_and_skips_suppression() {
        let cells = vec![Cell::delete_row("r", 200), Cell::insert("r", 1, "q", 100, "old")];
        let mut ctx = ScanContext::everything(1000);
        ctx.return_deletes = true;
        let mut scanner = MergeScanner::new(vec![cache_cursor(cells)], ctx, HashMap::new()).unwrap();
        let (first_key, _) = scanner.next().unwrap().unwrap();
        assert_eq!(first_key.decode().unwrap().flag, CellFlag::DeleteRow, "delete marker must be emitted first (it sorts first)");
        let (second_key, _) = scanner.next().unwrap().unwrap();
        assert_eq!(second_key.decode().unwrap().flag, CellFlag::Insert, "insert must not be suppressed when return_deletes is set");
        assert!(scanner.next().unwrap().is_none());
    }

    #[test]
    fn return_deletes_still_honors_max_versions() {
        let cells = vec![
            Cell::delete_cell("r", 1, "q", 300),
            Cell::insert("r", 1, "q", 200, "v2"),
            Cell::insert("r", 1, "q", 100, "v1"),
        ];
        let mut ctx = ScanContext::everything(1000);
        ctx.return_deletes = true;
        ctx.max_versions = Some(2);
        let mut scanner = MergeScanner::new(vec![cache_cursor(cells)], ctx, HashMap::new()).unwrap();
        let mut flags = Vec::new();
        while let Some((key, _)) = scanner.next().unwrap() {
            flags.push(key.decode().unwrap().flag);
        }
        assert_eq!(
            flags,
            vec![CellFlag::DeleteCell, CellFlag::Insert],
            "max_versions must still cap the cells returned even with return_deletes set"
        );
    }

    #[test]
    fn return_deletes_still_honors_time_predicate() {
        let cells = vec![Cell::delete_row("r", 50), Cell::insert("r", 1, "q", 500, "in-range")];
        let mut ctx = ScanContext::everything(1000);
        ctx.return_deletes = true;
        ctx.min_timestamp = 100;
        let mut scanner = MergeScanner::new(vec![cache_cursor(cells)], ctx, HashMap::new()).unwrap();
        let (key, _) = scanner.next().unwrap().expect("the insert inside [min_timestamp, max_timestamp) must survive");
        assert_eq!(key.decode().unwrap().flag, CellFlag::Insert);
        assert!(
            scanner.next().unwrap().is_none(),
            "the delete marker older than min_timestamp must still be filtered out"
        );
    }

    #[test]
    fn ttl_discards_expired_cells() {
        let cells = vec![Cell::insert("r", 1, "q", 100, "v")];
        let mut family_ttls = HashMap::new();
        family_ttls.insert(1u8, 50);
        let scanner = MergeScanner::new(vec![cache_cursor(cells)], ScanContext::everything(200), family_ttls);
        let mut scanner = scanner.unwrap();
        assert!(scanner.next().unwrap().is_none(), "cell older than its family's TTL must be discarded");
    }
}
