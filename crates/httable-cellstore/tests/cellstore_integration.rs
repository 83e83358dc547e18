use std::collections::HashMap;
use std::sync::Arc;

use httable_blockcache::FileBlockCache;
use httable_cellstore::{CellStore, CellStoreProps, CellStoreWriter};
use httable_compress::NoneCodec;
use httable_fs::{Filesystem, MemFilesystem};
use httable_types::{BloomPolicy, Cell, ScanContext, SerializedKeyOwned, Value};

fn props() -> CellStoreProps {
    CellStoreProps {
        target_block_size: 64 * 1024,
        codec: Box::new(NoneCodec),
        bloom_policy: BloomPolicy::Row,
        bloom_items_estimate: 4200,
        bloom_false_positive_prob: 0.01,
        family_ttls: HashMap::new(),
    }
}

/// Builds a 4 200-key batch `"0000000000" .. "0000004199"`, writes it out,
/// reopens it, and scans from the 65th-from-last key forward.
#[test]
fn four_k_batch_round_trips_and_scans_tail() {
    let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
    let mut writer = CellStoreWriter::create(fs.clone(), "/store", props()).unwrap();
    for i in 0..4200 {
        let row = format!("{i:010}");
        let key = SerializedKeyOwned::encode(&Cell::insert(row, 1, "q", 100, format!("value-{i}"))).unwrap();
        writer.add(key, Value::new(format!("value-{i}").into_bytes())).unwrap();
    }
    let trailer = writer.finalize(1_700_000_000).unwrap();
    assert_eq!(trailer.total_entries, 4200);

    let store = CellStore::open(fs, "/store", None, None).unwrap();
    let start_key = SerializedKeyOwned::encode(&Cell::insert("0000004135", 1, "q", 100, "v")).unwrap();
    let mut ctx = ScanContext::everything(0);
    ctx.start_key = Some(start_key);
    let cache = FileBlockCache::new(8 * 1024 * 1024);
    let mut scanner = store.create_scanner(ctx, cache);

    let mut rows = Vec::new();
    while let Some((key, _)) = scanner.peek().unwrap() {
        rows.push(key.decode().unwrap().row.to_vec());
        scanner.advance();
    }
    assert_eq!(rows.len(), 65, "expected exactly 65 keys 0000004135..=0000004199");
    assert_eq!(rows[0], b"0000004135");
    assert_eq!(rows.last().unwrap(), b"0000004199");
}

#[test]
fn bloom_filter_short_circuits_absent_row() {
    let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
    let mut writer = CellStoreWriter::create(fs.clone(), "/store", props()).unwrap();
    for i in 0..100 {
        let row = format!("present-{i:04}");
        let key = SerializedKeyOwned::encode(&Cell::insert(row, 1, "q", 100, "v")).unwrap();
        writer.add(key, Value::new(b"v".to_vec())).unwrap();
    }
    writer.finalize(1_700_000_000).unwrap();

    let store = CellStore::open(fs, "/store", None, None).unwrap();
    let mut ctx = ScanContext::everything(0);
    ctx.single_row = Some(b"absent-row".to_vec());
    ctx.start_key = Some(SerializedKeyOwned::encode(&Cell::insert("absent-row", 1, "q", 0, "")).unwrap());
    let cache = FileBlockCache::new(1 << 20);
    let mut scanner = store.create_scanner(ctx, cache);
    assert!(
        scanner.peek().unwrap().is_none(),
        "bloom filter must short-circuit a scan for a row that was never written"
    );
}
