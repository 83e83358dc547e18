//! The client-facing RPC verbs, expressed as a plain request/response
//! enum pair rather than an async wire protocol — the framing,
//! serialization, and reactor layer those verbs would ride over in
//! production are out of scope here.

use httable_range::UpdateOutcome;
use httable_types::{AccessGroupSpec, ColumnFamilySpec, RangeSpec, ScanContext, Schema, SerializedKeyOwned, Value};

use crate::scanners::ScannerId;

/// The families and access-group layout a table is created or altered
/// with; the server assigns the table id and generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub families: Vec<ColumnFamilySpec>,
    pub access_groups: Vec<AccessGroupSpec>,
}

#[derive(Debug, Clone)]
pub enum Request {
    CreateTable { name: String, spec: TableSpec },
    DropTable { name: String, if_exists: bool },
    RenameTable { old: String, new: String },
    AlterTable { name: String, spec: TableSpec },
    GetSchema { name: String },
    GetTables,
    LoadRange { table: String, range_spec: RangeSpec },
    UnloadRange { table: String, range_spec: RangeSpec },
    Compact { table: String, major: bool },
    Update { table: String, batch: Vec<(SerializedKeyOwned, Value)> },
    CreateScanner { table: String, scan_ctx: ScanContext },
    FetchScanblock { scanner_id: ScannerId },
    DestroyScanner { scanner_id: ScannerId },
}

#[derive(Debug, Clone)]
pub enum Response {
    Schema(Schema),
    Tables(Vec<String>),
    Update(UpdateOutcome),
    ScannerOpened { scanner_id: ScannerId, block: Vec<(SerializedKeyOwned, Value)> },
    ScanBlock(Vec<(SerializedKeyOwned, Value)>),
    Ack,
}
