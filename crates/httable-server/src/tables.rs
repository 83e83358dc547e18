//! A loaded table's in-memory bookkeeping: its schema and the ranges of
//! it currently held by this server, kept in ascending row order so a
//! request can be routed to the right range without a full scan.

use httable_range::Range;
use httable_types::{RangeSpec, Schema};
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

pub struct TableEntry {
    pub schema: Schema,
    pub ranges: Vec<(RangeSpec, Arc<Range>)>,
}

impl TableEntry {
    pub fn new(schema: Schema) -> Self {
        Self { schema, ranges: Vec::new() }
    }

    /// Inserts a range, keeping `ranges` ordered ascending by
    /// `end_row_inclusive` (`None` — "extends to the end of the row
    /// space" — always sorts last).
    pub fn insert_range(&mut self, spec: RangeSpec, range: Arc<Range>) {
        let position = self
            .ranges
            .iter()
            .position(|(existing, _)| match (&existing.end_row_inclusive, &spec.end_row_inclusive) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(a), Some(b)) => a > b,
            })
            .unwrap_or(self.ranges.len());
        self.ranges.insert(position, (spec, range));
    }

    pub fn remove_range(&mut self, spec: &RangeSpec) -> Option<Arc<Range>> {
        let index = self.ranges.iter().position(|(existing, _)| existing == spec)?;
        Some(self.ranges.remove(index).1)
    }
}

/// A stable, filesystem-safe identifier for one range's directory, under
/// `toplevel/tables/<table_id>/ranges/<range_key>`. Hashed with
/// `xxhash-rust`, already in the workspace stack for cache indexing,
/// rather than pulling in a cryptographic hash crate for a directory name
/// with no integrity role.
pub fn range_dir_key(spec: &RangeSpec) -> String {
    let mut buf = Vec::new();
    buf.extend_from_slice(spec.start_row_exclusive.as_deref().unwrap_or(&[]));
    buf.push(0);
    buf.extend_from_slice(spec.end_row_inclusive.as_deref().unwrap_or(&[]));
    format!("{:016x}", xxh3_64(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httable_accessgroup::AccessGroup;
    use httable_blockcache::FileBlockCache;
    use httable_commitlog::CommitLogWriter;
    use httable_compress::NoneCodec;
    use httable_fs::{Filesystem, MemFilesystem};
    use httable_types::AccessGroupSpec;
    use std::collections::HashMap;

    fn rs(end: Option<&[u8]>) -> RangeSpec {
        RangeSpec { table_id: 1, table_generation: 1, start_row_exclusive: None, end_row_inclusive: end.map(<[u8]>::to_vec) }
    }

    fn tiny_range(fs: std::sync::Arc<dyn Filesystem>, dir: &str) -> Arc<Range> {
        let block_cache = FileBlockCache::new(1 << 20);
        let commit_log = Arc::new(CommitLogWriter::open(fs.clone(), format!("{dir}/group-log"), Box::new(NoneCodec), 1 << 20).unwrap());
        let group = Arc::new(
            AccessGroup::open(AccessGroupSpec::new("default", vec![1]), None, None, fs.clone(), format!("{dir}/ag"), block_cache, commit_log, HashMap::new())
                .unwrap(),
        );
        Arc::new(Range::open(rs(None), vec![group], fs, dir, 1 << 20).unwrap())
    }

    #[test]
    fn range_dir_key_differs_for_different_bounds() {
        assert_ne!(range_dir_key(&rs(Some(b"m"))), range_dir_key(&rs(Some(b"z"))));
        assert_ne!(range_dir_key(&rs(None)), range_dir_key(&rs(Some(b"m"))));
    }

    #[test]
    fn insert_range_keeps_open_ended_range_last() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let mut entry = TableEntry::new(Schema {
            table_id: 1,
            generation: 1,
            families: vec![],
            access_groups: vec![AccessGroupSpec::new("default", vec![1])],
        });

        let open_ended = rs(None);
        let bounded = rs(Some(b"m"));
        entry.insert_range(open_ended.clone(), tiny_range(fs.clone(), "/t1/open"));
        entry.insert_range(bounded.clone(), tiny_range(fs.clone(), "/t1/bounded"));

        assert_eq!(entry.ranges[0].0, bounded, "the bounded range must sort before the open-ended one");
        assert_eq!(entry.ranges[1].0, open_ended);

        let removed = entry.remove_range(&bounded);
        assert!(removed.is_some());
        assert_eq!(entry.ranges.len(), 1);
    }
}
