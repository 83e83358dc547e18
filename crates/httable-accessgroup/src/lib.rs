//! Holds one access group's writable cell cache, its frozen cache (while
//! a minor compaction drains it), and its ordered list of immutable cell
//! stores, and runs the compaction passes that turn cache contents into
//! new stores.
//!
//! Live cell stores are retired by reference count rather than by a
//! bespoke pin/unpin scheme: [`httable_cellstore::CellStoreScanner`]
//! already keeps its own `Arc<CellStore>` clone for the life of a scan
//! (see `httable-cellstore/src/reader.rs`), so a store superseded by a
//! compaction is simply moved to a retiring list and its file deleted
//! once `Arc::strong_count` drops back to one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use httable_blockcache::FileBlockCache;
use httable_cellcache::{CellCache, CellCacheSnapshot};
use httable_cellstore::{CellStore, CellStoreProps, CellStoreWriter};
use httable_commitlog::CommitLogWriter;
use httable_compress::{codec_for, CompressionType};
use httable_error::{HypertableError, Result};
use httable_fs::Filesystem;
use httable_scan::{CursorHandle, MergeScanner};
use httable_types::{AccessGroupSpec, FamilyId, ScanContext, SerializedKeyOwned, Value};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::{debug, info};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn store_path(dir: &str, index: u64) -> String {
    format!("{dir}/{index:020}")
}

/// Which compaction pass to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionKind {
    /// Drains the frozen cache into one new store; existing live stores
    /// are left untouched.
    Minor,
    /// Merges the frozen cache (if any) and every live store into one.
    Major,
    /// Merges the frozen cache (if any) and the oldest `stores` live
    /// stores into one, to bound read amplification without paying for
    /// a full major compaction.
    Merging { stores: usize },
}

struct LiveStore {
    path: String,
    store: Arc<CellStore>,
}

struct State {
    active: CellCache,
    frozen: Option<CellCacheSnapshot>,
    live: Vec<LiveStore>,
}

/// One physically-clustered set of column families: a writable cache, an
/// optional frozen cache under compaction, and an ordered (oldest to
/// newest) list of immutable cell stores.
pub struct AccessGroup {
    spec: AccessGroupSpec,
    start_row: Option<Vec<u8>>,
    end_row: Option<Vec<u8>>,
    fs: Arc<dyn Filesystem>,
    dir: String,
    block_cache: FileBlockCache,
    commit_log: Arc<CommitLogWriter>,
    family_ttls: HashMap<FamilyId, u64>,
    state: RwLock<State>,
    next_file_index: AtomicU64,
    retiring: Mutex<Vec<LiveStore>>,
}

impl AccessGroup {
    /// Opens (or creates) the access group's store directory, loading
    /// any cell stores already present so a range server restart resumes
    /// with the same on-disk state it had before crashing.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        spec: AccessGroupSpec,
        start_row: Option<Vec<u8>>,
        end_row: Option<Vec<u8>>,
        fs: Arc<dyn Filesystem>,
        dir: impl Into<String>,
        block_cache: FileBlockCache,
        commit_log: Arc<CommitLogWriter>,
        family_ttls: HashMap<FamilyId, u64>,
    ) -> Result<Self> {
        let dir = dir.into();
        fs.mkdirs(&dir)?;

        let mut indices: Vec<u64> = fs.readdir(&dir)?.iter().filter_map(|n| n.parse().ok()).collect();
        indices.sort_unstable();

        let mut live = Vec::with_capacity(indices.len());
        for index in &indices {
            let path = store_path(&dir, *index);
            let store = CellStore::open(fs.clone(), &path, start_row.clone(), end_row.clone())?;
            live.push(LiveStore { path, store });
        }
        let next_file_index = indices.last().map_or(0, |i| i + 1);

        Ok(Self {
            spec,
            start_row,
            end_row,
            fs,
            dir,
            block_cache,
            commit_log,
            family_ttls,
            state: RwLock::new(State {
                active: CellCache::new(),
                frozen: None,
                live,
            }),
            next_file_index: AtomicU64::new(next_file_index),
            retiring: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Column families physically clustered into this group, used by a
    /// range to route cells and scans to the right group.
    pub fn family_ids(&self) -> &[FamilyId] {
        &self.spec.family_ids
    }

    /// The configured split-pressure threshold for this group, in bytes.
    pub fn split_threshold(&self) -> u64 {
        self.spec.split_threshold
    }

    /// Total bytes currently held across the active cache, the frozen
    /// cache (if any), and every live store's on-disk payload — the
    /// figure a range compares against `split_threshold` to decide
    /// whether it has grown enough to split.
    pub fn total_bytes(&self) -> u64 {
        let state = self.state.read();
        let active_bytes = state.active.byte_size() as u64;
        let frozen_bytes = state.frozen.as_ref().map_or(0, CellCacheSnapshot::byte_size) as u64;
        let live_bytes: u64 = state.live.iter().map(|l| l.store.trailer().total_bytes).sum();
        active_bytes + frozen_bytes + live_bytes
    }

    fn allocate_store_path(&self) -> String {
        let index = self.next_file_index.fetch_add(1, Ordering::Relaxed);
        store_path(&self.dir, index)
    }

    fn cell_store_props(&self) -> CellStoreProps {
        CellStoreProps {
            target_block_size: self.spec.target_block_size,
            codec: codec_for(CompressionType::None),
            bloom_policy: self.spec.bloom_policy,
            bloom_items_estimate: 0,
            bloom_false_positive_prob: self.spec.bloom_false_positive_prob,
            family_ttls: self.family_ttls.clone(),
        }
    }

    /// Inserts one already-encoded cell into the active cache. The key's
    /// row must not precede the access group's start row.
    pub fn add(&self, key: SerializedKeyOwned, value: Value) -> Result<()> {
        if let Some(start) = &self.start_row {
            let decoded = key.decode()?;
            if decoded.row < start.as_slice() {
                return Err(HypertableError::RangeMismatch);
            }
        }
        self.state.write().active.insert(key, value);
        Ok(())
    }

    /// Builds a merge scanner over a snapshot of the active cache, the
    /// frozen cache (if a compaction is in progress), and every live
    /// cell store.
    pub fn create_scanner(&self, scan_ctx: ScanContext) -> Result<MergeScanner> {
        let state = self.state.read();
        let mut cursors = Vec::with_capacity(2 + state.live.len());

        cursors.push(CursorHandle::Cache(state.active.snapshot().scanner(scan_ctx.start_key.as_ref())));
        if let Some(frozen) = &state.frozen {
            cursors.push(CursorHandle::Cache(frozen.scanner(scan_ctx.start_key.as_ref())));
        }
        for live in &state.live {
            cursors.push(CursorHandle::Store(live.store.create_scanner(scan_ctx.clone(), self.block_cache.clone())));
        }
        drop(state);

        MergeScanner::new(cursors, scan_ctx, self.family_ttls.clone())
    }

    /// Whether the active plus frozen cache bytes have crossed the
    /// minor-compaction threshold.
    pub fn needs_compaction(&self) -> bool {
        let state = self.state.read();
        let active_bytes = state.active.byte_size() as u64;
        let frozen_bytes = state.frozen.as_ref().map_or(0, CellCacheSnapshot::byte_size) as u64;
        active_bytes + frozen_bytes >= self.spec.minor_compaction_threshold
    }

    pub fn run_compaction(&self, kind: CompactionKind) -> Result<()> {
        match kind {
            CompactionKind::Minor => self.run_minor_compaction(),
            CompactionKind::Major => self.run_merge_compaction(None),
            CompactionKind::Merging { stores } => self.run_merge_compaction(Some(stores)),
        }
    }

    /// Atomically swaps the active cache for an empty one, scans the
    /// frozen half into a new cell store, then publishes the store and
    /// drops the frozen half. Tombstones are kept in the output unless
    /// this access group currently has no live stores below it (the
    /// deepest level), in which case they have nothing left to mask and
    /// are safely dropped instead.
    fn run_minor_compaction(&self) -> Result<()> {
        let (frozen, is_deepest_level) = {
            let mut state = self.state.write();
            if state.frozen.is_some() {
                return Err(HypertableError::internal(
                    "a minor compaction is already draining this access group's frozen cache",
                ));
            }
            if state.active.is_empty() {
                return Ok(());
            }
            let snapshot = state.active.freeze();
            state.frozen = Some(snapshot.clone());
            let is_deepest_level = state.live.is_empty();
            (snapshot, is_deepest_level)
        };

        let mut scan_ctx = ScanContext::everything(now_millis());
        scan_ctx.return_deletes = !is_deepest_level;
        let cursor = CursorHandle::Cache(frozen.scanner(None));
        let mut scanner = MergeScanner::new(vec![cursor], scan_ctx, self.family_ttls.clone())?;

        let path = self.allocate_store_path();
        let mut writer = CellStoreWriter::create(self.fs.clone(), &path, self.cell_store_props())?;
        let mut cutoff_ts = 0u64;
        while let Some((key, value)) = scanner.next()? {
            cutoff_ts = cutoff_ts.max(key.decode()?.timestamp);
            writer.add(key, value)?;
        }
        writer.finalize(now_millis())?;
        let store = CellStore::open(self.fs.clone(), &path, self.start_row.clone(), self.end_row.clone())?;

        {
            let mut state = self.state.write();
            state.live.push(LiveStore { path: path.clone(), store });
            state.frozen = None;
        }

        self.commit_log.purge(cutoff_ts)?;
        info!(dir = %self.dir, path = %path, "minor compaction complete");
        Ok(())
    }

    /// Merges the frozen cache (if any) and either every live store
    /// (`subset_len = None`, a major compaction) or just its oldest
    /// `subset_len` stores (a bounded "merging" compaction) into one new
    /// store, applying full tombstone semantics since every level the
    /// merge spans is included in its input.
    fn run_merge_compaction(&self, subset_len: Option<usize>) -> Result<()> {
        let (frozen, subset, remainder_start) = {
            let state = self.state.read();
            let subset_len = subset_len.unwrap_or(state.live.len()).min(state.live.len());
            let subset: Vec<Arc<CellStore>> = state.live[..subset_len].iter().map(|l| l.store.clone()).collect();
            (state.frozen.clone(), subset, subset_len)
        };

        let now = now_millis();
        let mut scan_ctx = ScanContext::everything(now);
        scan_ctx.return_deletes = false;
        let mut cursors = Vec::with_capacity(1 + subset.len());
        if let Some(frozen) = &frozen {
            cursors.push(CursorHandle::Cache(frozen.scanner(None)));
        }
        for store in &subset {
            cursors.push(CursorHandle::Store(store.create_scanner(scan_ctx.clone(), self.block_cache.clone())));
        }
        let mut scanner = MergeScanner::new(cursors, scan_ctx, self.family_ttls.clone())?;

        let path = self.allocate_store_path();
        let mut writer = CellStoreWriter::create(self.fs.clone(), &path, self.cell_store_props())?;
        let mut cutoff_ts = 0u64;
        let mut wrote_any = false;
        while let Some((key, value)) = scanner.next()? {
            cutoff_ts = cutoff_ts.max(key.decode()?.timestamp);
            writer.add(key, value)?;
            wrote_any = true;
        }
        writer.finalize(now)?;

        if !wrote_any {
            // Nothing survived the merge (every input cell was a
            // tombstone's victim); still replace the inputs with an
            // empty placeholder store so the live list shrinks.
            debug!(dir = %self.dir, "merge compaction produced an empty store");
        }
        let store = CellStore::open(self.fs.clone(), &path, self.start_row.clone(), self.end_row.clone())?;

        let mut retiring = Vec::new();
        {
            let mut state = self.state.write();
            if frozen.is_some() {
                state.frozen = None;
            }
            let mut replaced: Vec<LiveStore> = state.live.drain(..remainder_start).collect();
            retiring.append(&mut replaced);
            state.live.insert(0, LiveStore { path: path.clone(), store });
        }
        self.retiring.lock().append(&mut retiring);

        self.commit_log.purge(cutoff_ts)?;
        info!(dir = %self.dir, path = %path, stores_merged = subset.len(), "merge compaction complete");
        Ok(())
    }

    /// Recovers from a failed compaction by merging the frozen cache's
    /// entries back into the active cache and clearing the frozen slot,
    /// so writes and a future compaction attempt are not stuck behind
    /// it. Returns `true` if there was a frozen cache to recover.
    pub fn abandon_failed_compaction(&self) -> bool {
        let mut state = self.state.write();
        let Some(frozen) = state.frozen.take() else {
            return false;
        };
        let mut scanner = frozen.scanner(None);
        while let Some((key, value)) = scanner.peek() {
            let key = key.clone();
            let value = value.clone();
            scanner.advance();
            state.active.insert(key, value);
        }
        true
    }

    /// Deletes the underlying file of every retired store no scanner
    /// still holds a reference to. Returns the number reaped; safe to
    /// call periodically from a maintenance tick.
    pub fn reap_retired(&self) -> Result<usize> {
        let mut retiring = self.retiring.lock();
        let mut reaped = 0;
        let mut still_pending = Vec::with_capacity(retiring.len());
        for entry in retiring.drain(..) {
            if Arc::strong_count(&entry.store) == 1 {
                self.fs.rmdir(&entry.path)?;
                reaped += 1;
            } else {
                still_pending.push(entry);
            }
        }
        *retiring = still_pending;
        Ok(reaped)
    }

    /// Picks a row strictly between `start_row` and `end_row` that
    /// roughly bisects the access group's data, by taking the median of
    /// every first-key the cache and each store's block index offer as a
    /// candidate, then jittering among the handful of candidates nearest
    /// the median so many similarly shaped ranges don't all choose the
    /// exact same relative split point at once.
    pub fn find_split_row(&self) -> Option<Vec<u8>> {
        let state = self.state.read();
        let mut candidates: Vec<Vec<u8>> = Vec::new();

        for key in state.active.keys() {
            if let Ok(decoded) = key.decode() {
                candidates.push(decoded.row.to_vec());
            }
        }
        if let Some(frozen) = &state.frozen {
            for key in frozen.keys() {
                if let Ok(decoded) = key.decode() {
                    candidates.push(decoded.row.to_vec());
                }
            }
        }
        for live in &state.live {
            for entry in live.store.block_index().entries() {
                if let Ok(decoded) = entry.first_key.decode() {
                    candidates.push(decoded.row.to_vec());
                }
            }
        }
        drop(state);

        candidates.retain(|row| {
            self.start_row.as_deref().map_or(true, |start| row.as_slice() > start)
                && self.end_row.as_deref().map_or(true, |end| row.as_slice() < end)
        });
        candidates.sort_unstable();
        candidates.dedup();
        if candidates.is_empty() {
            return None;
        }

        let mid = candidates.len() / 2;
        let span = candidates.len().min(3);
        let low = mid.saturating_sub(span / 2);
        let high = (mid + span / 2).min(candidates.len() - 1);
        let chosen = if low >= high { low } else { rand::thread_rng().gen_range(low..=high) };
        Some(candidates[chosen].clone())
    }
}
