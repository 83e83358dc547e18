//! Server-side scanner handles: `create_scanner` returns
//! an id plus the first block; `fetch_scanblock` pulls subsequent
//! blocks; `destroy_scanner` drops the handle, releasing the snapshot
//! references the scan was holding.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use httable_error::{HypertableError, Result};
use httable_range::RangeScanner;
use httable_types::{SerializedKeyOwned, Value};
use parking_lot::Mutex;

/// Cells are handed back to a client in blocks of this many cells, the
/// unit `fetch_scanblock` returns one of at a time.
pub const SCAN_BLOCK_LEN: usize = 256;

pub type ScannerId = u64;

/// A scan may span several of a table's ranges; since ranges cover
/// disjoint, non-overlapping row intervals in ascending order, draining
/// each range's scanner in turn (rather than a key-ordered merge) already
/// yields the correctly ordered overall stream.
struct MultiRangeScanner {
    scanners: Vec<RangeScanner>,
    current: usize,
}

impl MultiRangeScanner {
    fn new(scanners: Vec<RangeScanner>) -> Self {
        Self { scanners, current: 0 }
    }

    fn next(&mut self) -> Result<Option<(SerializedKeyOwned, Value)>> {
        while self.current < self.scanners.len() {
            if let Some(pair) = self.scanners[self.current].next()? {
                return Ok(Some(pair));
            }
            self.current += 1;
        }
        Ok(None)
    }
}

/// Live scanners keyed by id, with the id allocator. One server may host
/// many concurrent scanners across many ranges.
pub struct ScannerRegistry {
    next_id: AtomicU64,
    scanners: Mutex<HashMap<ScannerId, MultiRangeScanner>>,
}

impl Default for ScannerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), scanners: Mutex::new(HashMap::new()) }
    }

    /// Registers a scanner (built from one `RangeScanner` per range the
    /// request touches) and pulls its first block, mirroring
    /// `create_scanner`'s combined id-plus-initial-block response.
    pub fn register_and_fetch_first_block(&self, scanners: Vec<RangeScanner>) -> Result<(ScannerId, Vec<(SerializedKeyOwned, Value)>)> {
        let mut scanner = MultiRangeScanner::new(scanners);
        let block = pull_block(&mut scanner)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.scanners.lock().insert(id, scanner);
        Ok((id, block))
    }

    pub fn fetch_scanblock(&self, id: ScannerId) -> Result<Vec<(SerializedKeyOwned, Value)>> {
        let mut scanners = self.scanners.lock();
        let scanner = scanners.get_mut(&id).ok_or(HypertableError::RangeNotFound)?;
        pull_block(scanner)
    }

    /// Drops the scanner, releasing whatever snapshot references it held.
    pub fn destroy_scanner(&self, id: ScannerId) {
        self.scanners.lock().remove(&id);
    }

    pub fn live_count(&self) -> usize {
        self.scanners.lock().len()
    }
}

fn pull_block(scanner: &mut MultiRangeScanner) -> Result<Vec<(SerializedKeyOwned, Value)>> {
    let mut block = Vec::with_capacity(SCAN_BLOCK_LEN);
    while block.len() < SCAN_BLOCK_LEN {
        match scanner.next()? {
            Some(pair) => block.push(pair),
            None => break,
        }
    }
    Ok(block)
}
