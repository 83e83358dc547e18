//! Merges the per-access-group scanners a range's `create_scanner`
//! selects into one ascending stream, the same k-way
//! heap merge `httable-scan`'s `MergeScanner` uses one layer down to
//! combine a single group's cache and store cursors.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use httable_error::Result;
use httable_scan::MergeScanner;
use httable_types::{SerializedKeyOwned, Value};

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
        other.key.cmp(&self.key)
    }
}

/// A composite cursor over every access group a scan touches, merging
/// their already-filtered streams into one key-ordered sequence.
pub struct RangeScanner {
    scanners: Vec<MergeScanner>,
    heap: BinaryHeap<HeapItem>,
}

impl RangeScanner {
    pub(crate) fn new(mut scanners: Vec<MergeScanner>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(scanners.len());
        for (source, scanner) in scanners.iter_mut().enumerate() {
            if let Some((key, value)) = scanner.next()? {
                heap.push(HeapItem { key, value, source });
            }
        }
        Ok(Self { scanners, heap })
    }

    pub fn next(&mut self) -> Result<Option<(SerializedKeyOwned, Value)>> {
        let Some(item) = self.heap.pop() else { return Ok(None) };
        if let Some((key, value)) = self.scanners[item.source].next()? {
            self.heap.push(HeapItem { key, value, source: item.source });
        }
        Ok(Some((item.key, item.value)))
    }
}
