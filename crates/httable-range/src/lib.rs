//! Aggregates one or more access groups covering the same row interval:
//! routes updates to them after a commit-log append, builds composite
//! scanners across them, drives their maintenance, and carries out a
//! two-phase split.
//!
//! Locking follows a fixed global order: this crate's `spec` read-write
//! lock stands in for `range.rw_lock`, taken before any access group's
//! own mutex. `update` only ever takes a read lock on `spec` — multiple
//! updates proceed concurrently, with `httable_commitlog::CommitLogWriter`'s
//! own internal mutex the only thing serializing the actual commit order,
//! matching "serialization is determined by log-append order only".
//! Only `split_complete` takes `spec`'s write lock, to narrow this
//! range's own bounds once the off-going half has been handed off.

mod scanner;
mod split;

use std::collections::HashMap;
use std::sync::Arc;

use httable_accessgroup::{AccessGroup, CompactionKind};
use httable_commitlog::{CommitLogReader, CommitLogWriter};
use httable_compress::{codec_for, CompressionType};
use httable_error::{HypertableError, Result};
use httable_fs::Filesystem;
use httable_metalog::{MetaLogReader, MetaLogWriter};
use httable_types::{FamilyId, RangeSpec, ScanContext, SerializedKeyOwned, Value};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

pub use scanner::RangeScanner;
pub use split::SplitEntity;

/// Result of a successful `update`: the commit point (highest timestamp
/// in the batch) and how many cells were rejected as out of range.
/// `rejected_count > 0` is the `PARTIAL_UPDATE` case; it is carried here
/// rather than as an error so the cells that did commit are not lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub commit_ts: u64,
    pub rejected_count: usize,
}

/// Result of one `maintenance_tick` pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MaintenanceReport {
    pub compacted_groups: Vec<String>,
    pub stores_reaped: usize,
    pub should_split: bool,
}

/// What a caller needs to finish placing the new half of a completed
/// split: the routing info for the child range and the directory of the
/// log capturing its writes since `split_start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitHandoff {
    pub child_spec: RangeSpec,
    pub split_log_dir: String,
}

struct SplitState {
    split_row: Vec<u8>,
    split_log: Arc<CommitLogWriter>,
}

/// A row-interval partition of a table: the unit of placement and split.
pub struct Range {
    spec: RwLock<RangeSpec>,
    groups: Vec<Arc<AccessGroup>>,
    family_to_group: HashMap<FamilyId, usize>,
    fs: Arc<dyn Filesystem>,
    dir: String,
    commit_log: Arc<CommitLogWriter>,
    commit_log_file_size_threshold: u64,
    metalog_path: String,
    split: Mutex<Option<SplitState>>,
}

impl Range {
    /// Opens (or creates) a range's on-disk state under `dir`: its own
    /// commit log, directory, and metalog, plus recovery of both. Base-log
    /// replay repopulates every access group's active cache with
    /// mutations not yet folded into a cell store; if the metalog shows a
    /// split was left `Started` (never `Complete`d) when this range was
    /// last open, the split log is reopened so writes past the split row
    /// keep landing in it — finishing that recovery by replaying the split
    /// log into a fresh child range is a range server's job, which
    /// [`Self::recovered_pending_split`] exposes the state for.
    pub fn open(
        spec: RangeSpec,
        groups: Vec<Arc<AccessGroup>>,
        fs: Arc<dyn Filesystem>,
        dir: impl Into<String>,
        commit_log_file_size_threshold: u64,
    ) -> Result<Self> {
        let dir = dir.into();
        fs.mkdirs(&dir)?;

        let mut family_to_group = HashMap::new();
        for (idx, group) in groups.iter().enumerate() {
            for &family in group.family_ids() {
                family_to_group.insert(family, idx);
            }
        }

        let commit_log_dir = format!("{dir}/commitlog");
        let commit_log = Arc::new(CommitLogWriter::open(
            fs.clone(),
            &commit_log_dir,
            codec_for(CompressionType::None),
            commit_log_file_size_threshold,
        )?);

        for (_table_id, _commit_ts, pairs) in CommitLogReader::replay(fs.as_ref(), &commit_log_dir)? {
            for (key, value) in pairs {
                let family = key.decode()?.family;
                if let Some(&idx) = family_to_group.get(&family) {
                    groups[idx].add(key, value)?;
                }
            }
        }

        let metalog_path = format!("{dir}/metalog");
        let mut pending = MetaLogReader::live_entities::<SplitEntity>(fs.as_ref(), &metalog_path)?;
        let split = match pending.pop() {
            Some(SplitEntity::Started { split_row, split_log_dir }) => {
                info!(dir = %dir, "reopening split log left in flight by a previous split_start");
                let split_log = Arc::new(CommitLogWriter::open(
                    fs.clone(),
                    &split_log_dir,
                    codec_for(CompressionType::None),
                    commit_log_file_size_threshold,
                )?);
                Some(SplitState { split_row, split_log })
            }
            _ => None,
        };

        Ok(Self {
            spec: RwLock::new(spec),
            groups,
            family_to_group,
            fs,
            dir,
            commit_log,
            commit_log_file_size_threshold,
            metalog_path,
            split: Mutex::new(split),
        })
    }

    /// The range's current bounds, for a caller (e.g. a range server's
    /// table registry) that needs to route a request to the right range
    /// among several without reaching into this type's internals.
    pub fn spec(&self) -> RangeSpec {
        self.spec.read().clone()
    }

    /// Forces a compaction of every access group regardless of pressure
    /// (as opposed to `maintenance_tick`'s pressure-driven one). Failures
    /// are handled the same way as `maintenance_tick`: logged and
    /// recovered rather than propagated, so one group's failure does not
    /// abort the others.
    pub fn compact_now(&self, kind: CompactionKind) -> Result<()> {
        for group in &self.groups {
            if let Err(err) = group.run_compaction(kind) {
                warn!(dir = %self.dir, group = group.name(), error = %err, "forced compaction failed; recovering frozen cache");
                group.abandon_failed_compaction();
                return Err(err);
            }
        }
        Ok(())
    }

    /// If recovery found a split left `Started`, the split row and the
    /// directory of the log capturing the off-going half's writes — the
    /// caller must replay that log into a freshly created child range.
    pub fn recovered_pending_split(&self) -> Option<(Vec<u8>, String)> {
        self.split
            .lock()
            .as_ref()
            .map(|s| (s.split_row.clone(), s.split_log.dir().to_string()))
    }

    /// Partitions `batch` into in-range, out-of-range, and (if a split is
    /// in flight) split-off cells; appends in-range cells to the commit
    /// log and split-off cells to the split log, each synced for
    /// durability, before inserting the in-range cells into their access
    /// groups. Out-of-range cells are not an error on their own — they
    /// are reported back as `rejected_count` — but a batch with nothing
    /// left to commit is.
    pub fn update(&self, batch: &[(SerializedKeyOwned, Value)]) -> Result<UpdateOutcome> {
        let spec = self.spec.read();
        let table_id = spec.table_id;

        let split_snapshot = self.split.lock().as_ref().map(|s| (s.split_row.clone(), s.split_log.clone()));

        let mut committed = Vec::new();
        let mut split_off = Vec::new();
        let mut rejected_count = 0usize;

        for (key, value) in batch {
            let decoded = key.decode()?;
            if !spec.contains_row(decoded.row) {
                rejected_count += 1;
                continue;
            }
            // The split row is the new range boundary: rows strictly
            // after it belong to the off-going child, matching the
            // exclusive-start convention `split_complete` gives the
            // child's own `RangeSpec`.
            let goes_to_split = split_snapshot
                .as_ref()
                .is_some_and(|(split_row, _)| decoded.row > split_row.as_slice());
            if goes_to_split {
                split_off.push((key.clone(), value.clone()));
            } else {
                committed.push((key.clone(), value.clone()));
            }
        }

        if committed.is_empty() && split_off.is_empty() {
            return Err(HypertableError::PartialUpdate { rejected_count });
        }

        let commit_ts = committed
            .iter()
            .chain(split_off.iter())
            .map(|(k, _)| k.decode().map(|d| d.timestamp))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .max()
            .unwrap_or(0);

        if !split_off.is_empty() {
            let (_, split_log) = split_snapshot.as_ref().expect("split_off entries imply a split is in progress");
            let epoch = split_log.append(table_id, &split_off, commit_ts)?;
            split_log.sync(epoch)?;
        }

        if !committed.is_empty() {
            let epoch = self.commit_log.append(table_id, &committed, commit_ts)?;
            self.commit_log.sync(epoch)?;
            for (key, value) in committed {
                let family = key.decode()?.family;
                let idx = *self
                    .family_to_group
                    .get(&family)
                    .ok_or_else(|| HypertableError::internal("no access group configured for this family"))?;
                self.groups[idx].add(key, value)?;
            }
        }

        Ok(UpdateOutcome { commit_ts, rejected_count })
    }

    /// Builds a composite scanner over every access group whose families
    /// intersect `scan_ctx.families`; groups outside that mask are never
    /// opened.
    pub fn create_scanner(&self, scan_ctx: ScanContext) -> Result<RangeScanner> {
        let _spec = self.spec.read();
        let scanners = self
            .groups
            .iter()
            .filter(|group| group.family_ids().iter().any(|family| scan_ctx.families.contains(*family)))
            .map(|group| group.create_scanner(scan_ctx.clone()))
            .collect::<Result<Vec<_>>>()?;
        RangeScanner::new(scanners)
    }

    /// Evaluates compaction pressure and split thresholds across every
    /// access group. A compaction failure is logged and the frozen cache
    /// recovered back into active rather than left stuck; it does not
    /// fail the whole tick.
    pub fn maintenance_tick(&self) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        for group in &self.groups {
            report.stores_reaped += group.reap_retired()?;
            if group.needs_compaction() {
                match group.run_compaction(CompactionKind::Minor) {
                    Ok(()) => report.compacted_groups.push(group.name().to_string()),
                    Err(err) => {
                        warn!(dir = %self.dir, group = group.name(), error = %err, "minor compaction failed; recovering frozen cache");
                        group.abandon_failed_compaction();
                    }
                }
            }
        }

        report.should_split =
            self.split.lock().is_none() && self.groups.iter().any(|group| group.total_bytes() >= group.split_threshold());
        Ok(report)
    }

    /// Finds a row to split on, asking the access group currently holding
    /// the most data.
    pub fn find_split_row(&self) -> Option<Vec<u8>> {
        self.groups.iter().max_by_key(|group| group.total_bytes())?.find_split_row()
    }

    /// Starts a split at `midpoint`: runs a minor compaction on every
    /// access group (draining their active caches, the "freeze active
    /// caches" step) so the split begins from a consistent on-disk
    /// state, opens a split commit log for writes destined for the
    /// off-going half, and journals `SplitStarted`. Writers observing the
    /// resulting state route rows after `midpoint` to the split log via
    /// `update`.
    pub fn split_start(&self, midpoint: Vec<u8>) -> Result<()> {
        let mut split_guard = self.split.lock();
        if split_guard.is_some() {
            return Err(HypertableError::internal("a split is already in progress for this range"));
        }

        for group in &self.groups {
            if let Err(err) = group.run_compaction(CompactionKind::Minor) {
                group.abandon_failed_compaction();
                return Err(err);
            }
        }

        let split_log_dir = format!("{}/split", self.dir);
        let split_log = Arc::new(CommitLogWriter::open(
            self.fs.clone(),
            &split_log_dir,
            codec_for(CompressionType::None),
            self.commit_log_file_size_threshold,
        )?);

        let metalog = MetaLogWriter::open(self.fs.clone(), &self.metalog_path, false)?;
        metalog.record_state(&SplitEntity::Started {
            split_row: midpoint.clone(),
            split_log_dir,
        })?;
        metalog.close()?;

        *split_guard = Some(SplitState { split_row: midpoint, split_log });
        info!(dir = %self.dir, "split started");
        Ok(())
    }

    /// Completes a split in progress: journals `SplitComplete` and
    /// narrows this range's own bounds to end at the split row, returning
    /// what the caller needs to place the new child range (the child's
    /// `RangeSpec` and its split log directory) for a master to hand off.
    pub fn split_complete(&self) -> Result<SplitHandoff> {
        let mut split_guard = self.split.lock();
        let Some(state) = split_guard.take() else {
            return Err(HypertableError::internal("no split is in progress for this range"));
        };
        drop(split_guard);

        let metalog = MetaLogWriter::open(self.fs.clone(), &self.metalog_path, false)?;
        metalog.record_state(&SplitEntity::Complete)?;
        metalog.close()?;

        let mut spec = self.spec.write();
        let child_spec = RangeSpec {
            table_id: spec.table_id,
            table_generation: spec.table_generation,
            start_row_exclusive: Some(state.split_row.clone()),
            end_row_inclusive: spec.end_row_inclusive.clone(),
        };
        spec.end_row_inclusive = Some(state.split_row);

        info!(dir = %self.dir, "split complete");
        Ok(SplitHandoff { child_spec, split_log_dir: state.split_log.dir().to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httable_blockcache::FileBlockCache;
    use httable_compress::NoneCodec;
    use httable_fs::MemFilesystem;
    use httable_types::{AccessGroupSpec, Cell};

    fn kv(row: &str, family: FamilyId, ts: u64, value: &str) -> (SerializedKeyOwned, Value) {
        let cell = Cell::insert(row, family, "q", ts, value);
        (SerializedKeyOwned::encode(&cell).unwrap(), Value::new(cell.value))
    }

    fn range(fs: Arc<dyn Filesystem>, dir: &str) -> Range {
        let spec = RangeSpec {
            table_id: 1,
            table_generation: 1,
            start_row_exclusive: None,
            end_row_inclusive: None,
        };
        let block_cache = FileBlockCache::new(1 << 20);
        let group_commit_log =
            Arc::new(CommitLogWriter::open(fs.clone(), format!("{dir}/group-log"), Box::new(NoneCodec), 1 << 20).unwrap());
        let group = Arc::new(
            AccessGroup::open(
                AccessGroupSpec::new("default", vec![1]),
                None,
                None,
                fs.clone(),
                format!("{dir}/ag"),
                block_cache,
                group_commit_log,
                HashMap::new(),
            )
            .unwrap(),
        );
        Range::open(spec, vec![group], fs, dir, 1 << 20).unwrap()
    }

    #[test]
    fn update_commits_in_range_cells_and_makes_them_scannable() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let r = range(fs, "/r1");
        let outcome = r.update(&[kv("m", 1, 100, "v")]).unwrap();
        assert_eq!(outcome.commit_ts, 100);
        assert_eq!(outcome.rejected_count, 0);

        let mut scanner = r.create_scanner(ScanContext::everything(1000)).unwrap();
        let (key, value) = scanner.next().unwrap().expect("the committed cell must be visible");
        assert_eq!(key.decode().unwrap().row, b"m");
        assert_eq!(value.as_bytes(), b"v");
    }

    #[test]
    fn spec_reflects_current_bounds_and_compact_now_ignores_pressure() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let r = range(fs, "/r1b");
        assert_eq!(r.spec().start_row_exclusive, None);
        r.update(&[kv("m", 1, 100, "v")]).unwrap();
        r.compact_now(CompactionKind::Minor).unwrap();
        let mut scanner = r.create_scanner(ScanContext::everything(1000)).unwrap();
        assert!(scanner.next().unwrap().is_some(), "a forced compaction must not lose the cell it moved into a live store");
    }

    #[test]
    fn update_reports_out_of_range_rows_without_losing_in_range_ones() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let spec = RangeSpec {
            table_id: 1,
            table_generation: 1,
            start_row_exclusive: Some(b"m".to_vec()),
            end_row_inclusive: None,
        };
        let block_cache = FileBlockCache::new(1 << 20);
        let group_commit_log = Arc::new(CommitLogWriter::open(fs.clone(), "/r2/group-log", Box::new(NoneCodec), 1 << 20).unwrap());
        let group = Arc::new(
            AccessGroup::open(
                AccessGroupSpec::new("default", vec![1]),
                Some(b"m".to_vec()),
                None,
                fs.clone(),
                "/r2/ag",
                block_cache,
                group_commit_log,
                HashMap::new(),
            )
            .unwrap(),
        );
        let r = Range::open(spec, vec![group], fs, "/r2", 1 << 20).unwrap();

        let outcome = r.update(&[kv("a", 1, 100, "out"), kv("z", 1, 200, "in")]).unwrap();
        assert_eq!(outcome.rejected_count, 1, "the row before start_row_exclusive must be rejected");
        assert_eq!(outcome.commit_ts, 200);
    }

    #[test]
    fn update_with_every_row_out_of_range_fails() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let spec = RangeSpec {
            table_id: 1,
            table_generation: 1,
            start_row_exclusive: Some(b"z".to_vec()),
            end_row_inclusive: None,
        };
        let block_cache = FileBlockCache::new(1 << 20);
        let group_commit_log = Arc::new(CommitLogWriter::open(fs.clone(), "/r3/group-log", Box::new(NoneCodec), 1 << 20).unwrap());
        let group = Arc::new(
            AccessGroup::open(
                AccessGroupSpec::new("default", vec![1]),
                Some(b"z".to_vec()),
                None,
                fs.clone(),
                "/r3/ag",
                block_cache,
                group_commit_log,
                HashMap::new(),
            )
            .unwrap(),
        );
        let r = Range::open(spec, vec![group], fs, "/r3", 1 << 20).unwrap();

        let err = r.update(&[kv("a", 1, 100, "out")]).unwrap_err();
        assert!(matches!(err, HypertableError::PartialUpdate { rejected_count: 1 }));
    }

    #[test]
    fn maintenance_tick_runs_minor_compaction_past_the_threshold() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let spec = RangeSpec { table_id: 1, table_generation: 1, start_row_exclusive: None, end_row_inclusive: None };
        let block_cache = FileBlockCache::new(1 << 20);
        let group_commit_log = Arc::new(CommitLogWriter::open(fs.clone(), "/r4/group-log", Box::new(NoneCodec), 1 << 20).unwrap());
        let mut ag_spec = AccessGroupSpec::new("default", vec![1]);
        ag_spec.minor_compaction_threshold = 1;
        let group = Arc::new(
            AccessGroup::open(ag_spec, None, None, fs.clone(), "/r4/ag", block_cache, group_commit_log, HashMap::new()).unwrap(),
        );
        let r = Range::open(spec, vec![group], fs, "/r4", 1 << 20).unwrap();

        r.update(&[kv("m", 1, 100, "v")]).unwrap();
        let report = r.maintenance_tick().unwrap();
        assert_eq!(report.compacted_groups, vec!["default".to_string()]);
    }

    #[test]
    fn split_start_then_complete_narrows_this_range_and_returns_a_child_spec() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let r = range(fs, "/r5");

        r.update(&[kv("a", 1, 100, "before")]).unwrap();
        r.split_start(b"m".to_vec()).unwrap();

        r.update(&[kv("a", 1, 200, "still-local"), kv("z", 1, 300, "split-off")]).unwrap();

        let handoff = r.split_complete().unwrap();
        assert_eq!(handoff.child_spec.start_row_exclusive, Some(b"m".to_vec()));
        assert_eq!(handoff.child_spec.end_row_inclusive, None);
        assert_eq!(handoff.split_log_dir, "/r5/split");
        assert!(r.recovered_pending_split().is_none(), "split_complete must clear the in-flight split");
    }

    #[test]
    fn recovery_replays_the_base_commit_log_into_the_access_group() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        {
            let r = range(fs.clone(), "/r6");
            r.update(&[kv("m", 1, 100, "v")]).unwrap();
        }

        let spec = RangeSpec { table_id: 1, table_generation: 1, start_row_exclusive: None, end_row_inclusive: None };
        let block_cache = FileBlockCache::new(1 << 20);
        let group_commit_log = Arc::new(CommitLogWriter::open(fs.clone(), "/r6/group-log", Box::new(NoneCodec), 1 << 20).unwrap());
        let group = Arc::new(
            AccessGroup::open(
                AccessGroupSpec::new("default", vec![1]),
                None,
                None,
                fs.clone(),
                "/r6/ag",
                block_cache,
                group_commit_log,
                HashMap::new(),
            )
            .unwrap(),
        );
        let reopened = Range::open(spec, vec![group], fs, "/r6", 1 << 20).unwrap();

        let mut scanner = reopened.create_scanner(ScanContext::everything(1000)).unwrap();
        let (key, _) = scanner.next().unwrap().expect("replay must restore the mutation that was never compacted");
        assert_eq!(key.decode().unwrap().row, b"m");
    }

    #[test]
    fn recovery_reopens_a_split_log_left_in_flight() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        {
            let r = range(fs.clone(), "/r7");
            r.split_start(b"m".to_vec()).unwrap();
        }

        let spec = RangeSpec { table_id: 1, table_generation: 1, start_row_exclusive: None, end_row_inclusive: None };
        let block_cache = FileBlockCache::new(1 << 20);
        let group_commit_log = Arc::new(CommitLogWriter::open(fs.clone(), "/r7/group-log", Box::new(NoneCodec), 1 << 20).unwrap());
        let group = Arc::new(
            AccessGroup::open(
                AccessGroupSpec::new("default", vec![1]),
                None,
                None,
                fs.clone(),
                "/r7/ag",
                block_cache,
                group_commit_log,
                HashMap::new(),
            )
            .unwrap(),
        );
        let reopened = Range::open(spec, vec![group], fs, "/r7", 1 << 20).unwrap();

        let (split_row, split_log_dir) = reopened
            .recovered_pending_split()
            .expect("a split left Started before the crash must be recovered as pending");
        assert_eq!(split_row, b"m".to_vec());
        assert_eq!(split_log_dir, "/r7/split");
    }
}
