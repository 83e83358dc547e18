//! LRU cache of decompressed cell-store blocks, keyed by `(file_id,
//! file_offset)`, with `checkout`/`checkin` reference counting so a
//! scanner holding a block never has it evicted out from under it.
//!
//! A `CheckoutGuard` whose `Drop` releases the pin stands in for manual
//! checkout/checkin bookkeeping.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

struct Entry {
    bytes: Arc<Vec<u8>>,
    ref_count: AtomicU32,
}

struct Inner {
    map: LruCache<u64, Entry>,
    used_memory: usize,
}

struct Shared {
    inner: Mutex<Inner>,
    max_memory: usize,
}

fn composite_key(file_id: u32, file_offset: u64) -> u64 {
    ((file_id as u64) << 32) | (file_offset & 0xffff_ffff)
}

/// A handle on a checked-out block. While held, the block is pinned
/// (`ref_count > 0`) and therefore never evicted. Dropping the guard
/// checks the block back in.
pub struct CheckoutGuard {
    cache: FileBlockCache,
    key: u64,
    bytes: Arc<Vec<u8>>,
}

impl CheckoutGuard {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for CheckoutGuard {
    fn drop(&mut self) {
        self.cache.checkin(self.key);
    }
}

/// Thread-safe, cheaply cloneable (an `Arc` inside) file block cache.
#[derive(Clone)]
pub struct FileBlockCache(Arc<Shared>);

impl FileBlockCache {
    pub fn new(max_memory: usize) -> Self {
        Self(Arc::new(Shared {
            inner: Mutex::new(Inner {
                map: LruCache::unbounded(),
                used_memory: 0,
            }),
            max_memory,
        }))
    }

    pub fn max_memory(&self) -> usize {
        self.0.max_memory
    }

    pub fn used_memory(&self) -> usize {
        self.0.inner.lock().used_memory
    }

    /// Looks up `(file_id, file_offset)`, promoting it to most-recently
    /// used and incrementing its ref count, if present.
    pub fn checkout(&self, file_id: u32, file_offset: u64) -> Option<CheckoutGuard> {
        let key = composite_key(file_id, file_offset);
        let mut inner = self.0.inner.lock();
        let entry = inner.map.get(&key)?;
        entry.ref_count.fetch_add(1, Ordering::AcqRel);
        let bytes = entry.bytes.clone();
        drop(inner);
        Some(CheckoutGuard {
            cache: self.clone(),
            key,
            bytes,
        })
    }

    fn checkin(&self, key: u64) {
        let inner = self.0.inner.lock();
        if let Some(entry) = inner.map.peek(&key) {
            let prev = entry.ref_count.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(prev > 0, "checkin must not underflow ref_count");
        }
    }

    pub fn contains(&self, file_id: u32, file_offset: u64) -> bool {
        let key = composite_key(file_id, file_offset);
        self.0.inner.lock().map.contains(&key)
    }

    /// Inserts `bytes` for `(file_id, file_offset)` and immediately checks
    /// it out (ref_count starts at 1). Evicts unpinned LRU entries until
    /// there is room; returns `None` if `bytes.len() > max_memory` or if
    /// eviction cannot free enough room because every resident entry is
    /// pinned (starvation is allowed rather than evicting a pinned entry).
    pub fn insert_and_checkout(&self, file_id: u32, file_offset: u64, bytes: Vec<u8>) -> Option<CheckoutGuard> {
        let len = bytes.len();
        if len > self.0.max_memory {
            return None;
        }
        let key = composite_key(file_id, file_offset);
        let mut inner = self.0.inner.lock();

        if !Self::make_room(&mut inner, self.0.max_memory, len) {
            return None;
        }

        let arc_bytes = Arc::new(bytes);
        inner.map.put(
            key,
            Entry {
                bytes: arc_bytes.clone(),
                ref_count: AtomicU32::new(1),
            },
        );
        inner.used_memory += len;
        drop(inner);

        Some(CheckoutGuard {
            cache: self.clone(),
            key,
            bytes: arc_bytes,
        })
    }

    fn make_room(inner: &mut Inner, max_memory: usize, needed: usize) -> bool {
        while inner.used_memory + needed > max_memory {
            let victim = inner
                .map
                .iter()
                .rev()
                .find(|(_, e)| e.ref_count.load(Ordering::Acquire) == 0)
                .map(|(k, _)| *k);
            match victim {
                Some(k) => {
                    if let Some(entry) = inner.map.pop(&k) {
                        inner.used_memory -= entry.bytes.len();
                    }
                }
                None => return false,
            }
        }
        true
    }
}
