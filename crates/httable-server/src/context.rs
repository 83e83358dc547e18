//! The range-server context: a single struct built at startup and
//! threaded explicitly to every handler, rather than reached through
//! process-wide singletons. Tests construct independent contexts over an
//! in-memory filesystem rather than sharing global state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use httable_accessgroup::{AccessGroup, CompactionKind};
use httable_blockcache::FileBlockCache;
use httable_commitlog::CommitLogWriter;
use httable_compress::NoneCodec;
use httable_error::{HypertableError, Result};
use httable_fs::Filesystem;
use httable_range::{Range, UpdateOutcome};
use httable_types::{FamilyId, RangeSpec, ScanContext, Schema, SerializedKeyOwned, TableId, Value};
use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use crate::config::ServerConfig;
use crate::request::{Request, Response, TableSpec};
use crate::scanners::{ScannerId, ScannerRegistry};
use crate::tables::{range_dir_key, TableEntry};
use crate::workers::WorkerPool;

/// How often the background maintenance loop wakes to check whether an
/// interval has elapsed, short enough that dropping a context does not
/// leave its thread running noticeably past the last `Arc` going away.
const MAINTENANCE_POLL_QUANTUM: Duration = Duration::from_millis(200);

pub struct RangeServerContext {
    fs: Arc<dyn Filesystem>,
    toplevel: String,
    config: ServerConfig,
    block_cache: FileBlockCache,
    tables: RwLock<HashMap<String, TableEntry>>,
    next_table_id: AtomicU32,
    scanners: ScannerRegistry,
    application_pool: WorkerPool,
    maintenance_pool: WorkerPool,
}

impl RangeServerContext {
    pub fn new(fs: Arc<dyn Filesystem>, toplevel: impl Into<String>, config: ServerConfig) -> Arc<Self> {
        let ctx = Arc::new(Self {
            fs,
            toplevel: toplevel.into(),
            config,
            block_cache: FileBlockCache::new(config.block_cache_bytes),
            tables: RwLock::new(HashMap::new()),
            next_table_id: AtomicU32::new(1),
            scanners: ScannerRegistry::new(),
            application_pool: WorkerPool::new("application", config.application_worker_count),
            maintenance_pool: WorkerPool::new("maintenance", config.maintenance_worker_count),
        });

        let weak: Weak<Self> = Arc::downgrade(&ctx);
        thread::Builder::new()
            .name("maintenance-timer".to_string())
            .spawn(move || run_maintenance_timer(weak))
            .expect("failed to spawn maintenance timer thread");

        ctx
    }

    /// Dispatches one RPC-shaped request onto the application queue of
    /// worker threads and blocks for its result, keeping the public
    /// surface a plain synchronous call.
    pub fn handle(self: &Arc<Self>, request: Request) -> Result<Response> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let ctx = Arc::clone(self);
        self.application_pool.submit(move || {
            let result = ctx.dispatch(request);
            let _ = reply_tx.send(result);
        });
        reply_rx.recv().map_err(|_| HypertableError::internal("application worker dropped the reply channel"))?
    }

    fn dispatch(&self, request: Request) -> Result<Response> {
        match request {
            Request::CreateTable { name, spec } => self.create_table(&name, spec).map(Response::Schema),
            Request::DropTable { name, if_exists } => self.drop_table(&name, if_exists).map(|()| Response::Ack),
            Request::RenameTable { old, new } => self.rename_table(&old, &new).map(|()| Response::Ack),
            Request::AlterTable { name, spec } => self.alter_table(&name, spec).map(Response::Schema),
            Request::GetSchema { name } => self.get_schema(&name).map(Response::Schema),
            Request::GetTables => Ok(Response::Tables(self.get_tables())),
            Request::LoadRange { table, range_spec } => self.load_range(&table, range_spec).map(|()| Response::Ack),
            Request::UnloadRange { table, range_spec } => self.unload_range(&table, &range_spec).map(|()| Response::Ack),
            Request::Compact { table, major } => self.compact(&table, major).map(|()| Response::Ack),
            Request::Update { table, batch } => self.update(&table, &batch).map(Response::Update),
            Request::CreateScanner { table, scan_ctx } => {
                let (scanner_id, block) = self.create_scanner(&table, scan_ctx)?;
                Ok(Response::ScannerOpened { scanner_id, block })
            }
            Request::FetchScanblock { scanner_id } => self.scanners.fetch_scanblock(scanner_id).map(Response::ScanBlock),
            Request::DestroyScanner { scanner_id } => {
                self.scanners.destroy_scanner(scanner_id);
                Ok(Response::Ack)
            }
        }
    }

    #[instrument(skip(self, spec))]
    pub fn create_table(&self, name: &str, spec: TableSpec) -> Result<Schema> {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(HypertableError::TableExists(name.to_string()));
        }
        let table_id = self.next_table_id.fetch_add(1, Ordering::Relaxed);
        let schema = Schema { table_id, generation: 1, families: spec.families, access_groups: spec.access_groups };

        let whole_table = RangeSpec { table_id, table_generation: 1, start_row_exclusive: None, end_row_inclusive: None };
        let range = self.build_range(&schema, whole_table.clone())?;

        let mut entry = TableEntry::new(schema.clone());
        entry.insert_range(whole_table, range);
        tables.insert(name.to_string(), entry);
        info!(table = name, table_id, "table created");
        Ok(schema)
    }

    pub fn drop_table(&self, name: &str, if_exists: bool) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.remove(name).is_none() && !if_exists {
            return Err(HypertableError::TableNotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn rename_table(&self, old: &str, new: &str) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(new) {
            return Err(HypertableError::TableExists(new.to_string()));
        }
        let entry = tables.remove(old).ok_or_else(|| HypertableError::TableNotFound(old.to_string()))?;
        tables.insert(new.to_string(), entry);
        Ok(())
    }

    /// Bumps the schema's generation and rebuilds every loaded range's
    /// access groups from the new family/access-group layout. Each
    /// range's own commit log is replayed afresh during the rebuild, so a
    /// family moved into a different access group lands in the right
    /// place without manual migration.
    pub fn alter_table(&self, name: &str, spec: TableSpec) -> Result<Schema> {
        let mut tables = self.tables.write();
        let entry = tables.get_mut(name).ok_or_else(|| HypertableError::TableNotFound(name.to_string()))?;
        let new_generation = entry.schema.generation + 1;
        let new_schema =
            Schema { table_id: entry.schema.table_id, generation: new_generation, families: spec.families, access_groups: spec.access_groups };

        let mut rebuilt = Vec::with_capacity(entry.ranges.len());
        for (range_spec, _old_range) in &entry.ranges {
            let mut range_spec = range_spec.clone();
            range_spec.table_generation = new_generation;
            let range = self.build_range(&new_schema, range_spec.clone())?;
            rebuilt.push((range_spec, range));
        }
        entry.ranges = rebuilt;
        entry.schema = new_schema.clone();
        Ok(new_schema)
    }

    pub fn get_schema(&self, name: &str) -> Result<Schema> {
        self.tables.read().get(name).map(|entry| entry.schema.clone()).ok_or_else(|| HypertableError::TableNotFound(name.to_string()))
    }

    pub fn get_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn load_range(&self, table: &str, range_spec: RangeSpec) -> Result<()> {
        let mut tables = self.tables.write();
        let entry = tables.get_mut(table).ok_or_else(|| HypertableError::TableNotFound(table.to_string()))?;
        if entry.ranges.iter().any(|(existing, _)| existing == &range_spec) {
            return Err(HypertableError::RangeAlreadyLoaded);
        }
        let schema = entry.schema.clone();
        let range = self.build_range(&schema, range_spec.clone())?;
        entry.insert_range(range_spec, range);
        Ok(())
    }

    /// Drops a range from this server's active set without touching its
    /// on-disk files, so it can be reloaded here or elsewhere later.
    pub fn unload_range(&self, table: &str, range_spec: &RangeSpec) -> Result<()> {
        let mut tables = self.tables.write();
        let entry = tables.get_mut(table).ok_or_else(|| HypertableError::TableNotFound(table.to_string()))?;
        entry.remove_range(range_spec).ok_or(HypertableError::RangeNotFound).map(|_| ())
    }

    pub fn compact(&self, table: &str, major: bool) -> Result<()> {
        let tables = self.tables.read();
        let entry = tables.get(table).ok_or_else(|| HypertableError::TableNotFound(table.to_string()))?;
        let kind = if major { CompactionKind::Major } else { CompactionKind::Minor };
        for (_, range) in &entry.ranges {
            range.compact_now(kind)?;
        }
        Ok(())
    }

    #[instrument(skip(self, batch))]
    pub fn update(&self, table: &str, batch: &[(SerializedKeyOwned, Value)]) -> Result<UpdateOutcome> {
        let tables = self.tables.read();
        let entry = tables.get(table).ok_or_else(|| HypertableError::TableNotFound(table.to_string()))?;

        if entry.ranges.len() == 1 {
            return entry.ranges[0].1.update(batch);
        }

        let mut per_range: Vec<Vec<(SerializedKeyOwned, Value)>> = (0..entry.ranges.len()).map(|_| Vec::new()).collect();
        let mut rejected_count = 0usize;
        for (key, value) in batch {
            let row = key.decode()?.row;
            match entry.ranges.iter().position(|(spec, _)| spec.contains_row(row)) {
                Some(idx) => per_range[idx].push((key.clone(), value.clone())),
                None => rejected_count += 1,
            }
        }

        let mut commit_ts = 0u64;
        let mut committed_any = false;
        for (idx, rows) in per_range.into_iter().enumerate() {
            if rows.is_empty() {
                continue;
            }
            let outcome = entry.ranges[idx].1.update(&rows)?;
            commit_ts = commit_ts.max(outcome.commit_ts);
            rejected_count += outcome.rejected_count;
            committed_any = true;
        }

        if !committed_any {
            return Err(HypertableError::PartialUpdate { rejected_count });
        }
        Ok(UpdateOutcome { commit_ts, rejected_count })
    }

    pub fn create_scanner(&self, table: &str, scan_ctx: ScanContext) -> Result<(ScannerId, Vec<(SerializedKeyOwned, Value)>)> {
        let tables = self.tables.read();
        let entry = tables.get(table).ok_or_else(|| HypertableError::TableNotFound(table.to_string()))?;
        let scanners = entry
            .ranges
            .iter()
            .map(|(_, range)| range.create_scanner(scan_ctx.clone()))
            .collect::<Result<Vec<_>>>()?;
        self.scanners.register_and_fetch_first_block(scanners)
    }

    fn build_range(&self, schema: &Schema, range_spec: RangeSpec) -> Result<Arc<Range>> {
        let range_dir = format!("{}/tables/{}/ranges/{}", self.toplevel, schema.table_id, range_dir_key(&range_spec));

        let family_ttls: HashMap<FamilyId, u64> =
            schema.families.iter().filter_map(|family| family.ttl_seconds.map(|ttl| (family.id, ttl))).collect();

        let mut groups = Vec::with_capacity(schema.access_groups.len());
        for ag_spec in &schema.access_groups {
            let ag_dir = format!("{range_dir}/{}", ag_spec.name);
            let group_commit_log =
                Arc::new(CommitLogWriter::open(self.fs.clone(), format!("{ag_dir}/log"), Box::new(NoneCodec), self.config.commit_log_file_size_threshold)?);
            groups.push(Arc::new(AccessGroup::open(
                ag_spec.clone(),
                range_spec.start_row_exclusive.clone(),
                range_spec.end_row_inclusive.clone(),
                self.fs.clone(),
                ag_dir,
                self.block_cache.clone(),
                group_commit_log,
                family_ttls.clone(),
            )?));
        }

        Ok(Arc::new(Range::open(range_spec, groups, self.fs.clone(), range_dir, self.config.commit_log_file_size_threshold)?))
    }

    /// Runs one maintenance sweep across every loaded range synchronously
    /// on the caller's thread; exposed for tests and for an embedder that
    /// wants to drive maintenance explicitly instead of waiting on the
    /// background timer.
    pub fn run_maintenance_sweep(&self) {
        let snapshot: Vec<(String, TableId, Arc<Range>)> = {
            let tables = self.tables.read();
            tables
                .iter()
                .flat_map(|(name, entry)| entry.ranges.iter().map(move |(_, range)| (name.clone(), entry.schema.table_id, Arc::clone(range))))
                .collect()
        };
        for (table, table_id, range) in snapshot {
            self.maintenance_pool.submit(move || match range.maintenance_tick() {
                Ok(report) => {
                    if !report.compacted_groups.is_empty() || report.stores_reaped > 0 || report.should_split {
                        info!(table, table_id, ?report, "maintenance sweep");
                    }
                }
                Err(err) => warn!(table, table_id, error = %err, "maintenance tick failed"),
            });
        }
    }

    pub fn config(&self) -> ServerConfig {
        self.config
    }
}

fn run_maintenance_timer(ctx: Weak<RangeServerContext>) {
    let mut elapsed = Duration::ZERO;
    loop {
        thread::sleep(MAINTENANCE_POLL_QUANTUM);
        let Some(ctx) = ctx.upgrade() else { return };
        elapsed += MAINTENANCE_POLL_QUANTUM;
        if elapsed >= Duration::from_millis(ctx.config.maintenance_interval_ms) {
            elapsed = Duration::ZERO;
            ctx.run_maintenance_sweep();
        }
    }
}
