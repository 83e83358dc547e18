//! Public API facade over the Hypertable storage engine: the data model,
//! filesystem abstraction, and range-server context behind one crate, so
//! an embedder depends on `httable` rather than reaching into its
//! component crates directly.

pub use httable_accessgroup::{AccessGroup, CompactionKind};
pub use httable_error::{HypertableError, Result};
pub use httable_fs::{FileHandle, Filesystem, LocalFilesystem, MemFilesystem, OpenFlags};
pub use httable_range::{MaintenanceReport, Range, RangeScanner, UpdateOutcome};
pub use httable_server::{RangeServerContext, Request, Response, ScannerId, ServerConfig, TableSpec};
pub use httable_types::{
    AccessGroupSpec, BloomPolicy, Cell, CellFlag, ColumnFamilySpec, DecodedKey, FamilyId, FamilyMask, RangeSpec, ScanContext, Schema,
    SerializedKey, SerializedKeyOwned, TableId, Value,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn a_table_can_be_created_written_to_and_scanned_through_the_facade() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let ctx = RangeServerContext::new(fs, "/toplevel", ServerConfig::default());

        let spec = TableSpec {
            families: vec![ColumnFamilySpec::new(1, "f")],
            access_groups: vec![AccessGroupSpec::new("default", vec![1])],
        };
        ctx.handle(Request::CreateTable { name: "t".to_string(), spec }).unwrap();

        let cell = Cell::insert("r1", 1, "q", 100, "v");
        let key = SerializedKeyOwned::encode(&cell).unwrap();
        let response = ctx.handle(Request::Update { table: "t".to_string(), batch: vec![(key, Value::new(cell.value))] }).unwrap();
        assert!(matches!(response, Response::Update(outcome) if outcome.rejected_count == 0));

        let response = ctx.handle(Request::CreateScanner { table: "t".to_string(), scan_ctx: ScanContext::everything(1000) }).unwrap();
        let Response::ScannerOpened { block, .. } = response else { panic!("expected ScannerOpened") };
        assert_eq!(block.len(), 1);
    }
}
