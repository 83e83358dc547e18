//! A typed, append-only journal used by range servers and the master to
//! persist long-running operation state: range load/move, splits, table
//! creation, node membership.
//!
//! Each entry is a fixed `EntityHeader` followed by a Fletcher-32
//! checksummed, type-specific payload — the same length-prefixed,
//! checksummed framing idiom `httable-cellstore`'s trailer and
//! `httable-commitlog`'s frame header use one layer down, reused here for
//! a generic `MetaLogEntity` instead of a fixed record shape.

use std::time::{SystemTime, UNIX_EPOCH};

use httable_checksum::fletcher32;
use httable_error::{HypertableError, Result};
use httable_fs::{Filesystem, OpenFlags};

/// `type(4) + id(4) + flags(4) + checksum(4) + length(4) + timestamp(8)`.
const HEADER_LEN: usize = 4 + 4 + 4 + 4 + 4 + 8;

/// Sentinel `entity_type` for the marker written when a log is reopened
/// during crash recovery, distinguishing that from a cleanly-closed log
/// on the next replay.
pub const RECOVER_MARKER_TYPE: u32 = u32::MAX;

const FLAG_REMOVAL: u32 = 0b01;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// A type whose instances can be journaled by a [`MetaLogWriter`]. One
/// `entity_id` identifies one logical entity (a range, an operation, a
/// node) across however many state records it accumulates; the reader
/// collapses those records down to the latest one per id.
pub trait MetaLogEntity: Sized {
    /// Stable numeric tag for this entity's concrete type, so a reader
    /// iterating a log of mixed entity kinds knows how to decode each
    /// record before it has constructed anything.
    fn entity_type() -> u32;
    fn entity_id(&self) -> u32;
    fn encode(&self) -> Vec<u8>;
    fn decode(id: u32, payload: &[u8]) -> Result<Self>;
}

/// One raw, decoded record, before any entity-specific decoding or
/// live/removed collapsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub entity_type: u32,
    pub id: u32,
    pub removed: bool,
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

fn encode_record(entity_type: u32, id: u32, flags: u32, timestamp: u64, payload: &[u8]) -> Vec<u8> {
    let checksum = fletcher32(payload);
    let length = u32::try_from(payload.len()).expect("metalog payload must fit in u32");
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&entity_type.to_le_bytes());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&checksum.to_le_bytes());
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Appends `EntityHeader`-framed records to a single journal file.
pub struct MetaLogWriter {
    fs: std::sync::Arc<dyn Filesystem>,
    path: String,
    fd: httable_fs::FileHandle,
}

impl MetaLogWriter {
    /// Opens (creating if absent) the journal at `path`. When `recovering`
    /// is set, a `RECOVER` marker is appended immediately so a later
    /// reader can tell this log was reopened after a crash rather than
    /// closed cleanly.
    pub fn open(fs: std::sync::Arc<dyn Filesystem>, path: impl Into<String>, recovering: bool) -> Result<Self> {
        let path = path.into();
        let exists = fs.exists(&path)?;
        let fd = if exists {
            fs.open(&path, OpenFlags::WRITE)?
        } else {
            fs.create(&path, false, 0, 0, 0)?
        };
        let writer = Self { fs, path, fd };
        if recovering {
            writer.append_raw(RECOVER_MARKER_TYPE, 0, 0, &[])?;
        }
        Ok(writer)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Records `entity`'s current state.
    pub fn record_state<E: MetaLogEntity>(&self, entity: &E) -> Result<()> {
        let payload = entity.encode();
        self.append_raw(E::entity_type(), entity.entity_id(), 0, &payload)
    }

    /// Records that the entity identified by `(entity_type, id)` has been
    /// removed; `live_entities` will no longer surface it.
    pub fn record_removal(&self, entity_type: u32, id: u32) -> Result<()> {
        self.append_raw(entity_type, id, FLAG_REMOVAL, &[])
    }

    fn append_raw(&self, entity_type: u32, id: u32, flags: u32, payload: &[u8]) -> Result<()> {
        let record = encode_record(entity_type, id, flags, now_millis(), payload);
        self.fs.append(self.fd, &record, true)
    }

    pub fn close(self) -> Result<()> {
        self.fs.close(self.fd)
    }
}

/// Reads and collapses a journal written by [`MetaLogWriter`].
pub struct MetaLogReader;

impl MetaLogReader {
    /// Decodes every record in the journal in on-disk order, including
    /// `RECOVER` markers (callers that care about recovery can filter on
    /// `entity_type == RECOVER_MARKER_TYPE`). This is the "all entities"
    /// view, kept for debugging — it is not collapsed by id.
    pub fn all_records(fs: &dyn Filesystem, path: &str) -> Result<Vec<RawRecord>> {
        if !fs.exists(path)? {
            return Ok(Vec::new());
        }
        let len = fs.length(path)? as usize;
        let fd = fs.open(path, OpenFlags::READ)?;
        let bytes = fs.pread(fd, 0, len)?;
        fs.close(fd)?;

        let mut pos = 0;
        let mut out = Vec::new();
        while pos + HEADER_LEN <= bytes.len() {
            let entity_type = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            let id = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap());
            let flags = u32::from_le_bytes(bytes[pos + 8..pos + 12].try_into().unwrap());
            let checksum = u32::from_le_bytes(bytes[pos + 12..pos + 16].try_into().unwrap());
            let length = u32::from_le_bytes(bytes[pos + 16..pos + 20].try_into().unwrap()) as usize;
            let timestamp = u64::from_le_bytes(bytes[pos + 20..pos + 28].try_into().unwrap());

            let payload_start = pos + HEADER_LEN;
            let payload_end = payload_start + length;
            if payload_end > bytes.len() {
                break;
            }
            let payload = &bytes[payload_start..payload_end];
            let actual = fletcher32(payload);
            if actual != checksum {
                return Err(HypertableError::MetaLogChecksumMismatch { id });
            }

            out.push(RawRecord {
                entity_type,
                id,
                removed: flags & FLAG_REMOVAL != 0,
                timestamp,
                payload: payload.to_vec(),
            });
            pos = payload_end;
        }
        Ok(out)
    }

    /// Collapses the journal to each id's latest record of type `E`,
    /// dropping ids whose latest record was a removal. `RECOVER` markers
    /// and records of other entity types are ignored.
    pub fn live_entities<E: MetaLogEntity>(fs: &dyn Filesystem, path: &str) -> Result<Vec<E>> {
        use hashbrown_for_metalog::LatestById;

        let mut latest: LatestById = LatestById::new();
        for record in Self::all_records(fs, path)? {
            if record.entity_type != E::entity_type() {
                continue;
            }
            latest.record(record.id, record.removed, record.payload);
        }

        latest
            .into_live()
            .into_iter()
            .map(|(id, payload)| E::decode(id, &payload))
            .collect()
    }
}

/// A tiny last-write-wins-by-id collapse, kept local to avoid pulling in
/// `hashbrown` for a single small map — the other on-disk formats in this
/// workspace that need it (block cache, query cache) cache far more
/// entries than a metalog typically carries distinct ids.
mod hashbrown_for_metalog {
    use std::collections::BTreeMap;

    pub struct LatestById {
        map: BTreeMap<u32, Option<Vec<u8>>>,
        order: Vec<u32>,
    }

    impl LatestById {
        pub fn new() -> Self {
            Self { map: BTreeMap::new(), order: Vec::new() }
        }

        pub fn record(&mut self, id: u32, removed: bool, payload: Vec<u8>) {
            if !self.map.contains_key(&id) {
                self.order.push(id);
            }
            self.map.insert(id, if removed { None } else { Some(payload) });
        }

        pub fn into_live(self) -> Vec<(u32, Vec<u8>)> {
            self.order
                .into_iter()
                .filter_map(|id| self.map.get(&id).cloned().flatten().map(|payload| (id, payload)))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httable_fs::MemFilesystem;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct RangeLoadOp {
        id: u32,
        range_name: String,
    }

    impl MetaLogEntity for RangeLoadOp {
        fn entity_type() -> u32 {
            1
        }
        fn entity_id(&self) -> u32 {
            self.id
        }
        fn encode(&self) -> Vec<u8> {
            self.range_name.clone().into_bytes()
        }
        fn decode(id: u32, payload: &[u8]) -> Result<Self> {
            Ok(Self {
                id,
                range_name: String::from_utf8(payload.to_vec())
                    .map_err(|_| HypertableError::InvalidMetadata("range name not utf8".into()))?,
            })
        }
    }

    #[test]
    fn record_state_then_live_entities_round_trips() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let writer = MetaLogWriter::open(fs.clone(), "/meta/master", false).unwrap();
        writer.record_state(&RangeLoadOp { id: 1, range_name: "r1".into() }).unwrap();
        writer.record_state(&RangeLoadOp { id: 2, range_name: "r2".into() }).unwrap();
        writer.close().unwrap();

        let live = MetaLogReader::live_entities::<RangeLoadOp>(fs.as_ref(), "/meta/master").unwrap();
        let mut names: Vec<String> = live.iter().map(|e| e.range_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["r1".to_string(), "r2".to_string()]);
    }

    #[test]
    fn later_state_record_supersedes_an_earlier_one_for_the_same_id() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let writer = MetaLogWriter::open(fs.clone(), "/meta/master", false).unwrap();
        writer.record_state(&RangeLoadOp { id: 5, range_name: "old".into() }).unwrap();
        writer.record_state(&RangeLoadOp { id: 5, range_name: "new".into() }).unwrap();

        let live = MetaLogReader::live_entities::<RangeLoadOp>(fs.as_ref(), "/meta/master").unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].range_name, "new");
    }

    #[test]
    fn removal_drops_the_entity_from_live_view_but_not_all_records() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let writer = MetaLogWriter::open(fs.clone(), "/meta/master", false).unwrap();
        writer.record_state(&RangeLoadOp { id: 9, range_name: "gone".into() }).unwrap();
        writer.record_removal(RangeLoadOp::entity_type(), 9).unwrap();

        let live = MetaLogReader::live_entities::<RangeLoadOp>(fs.as_ref(), "/meta/master").unwrap();
        assert!(live.is_empty(), "a removed entity must not appear in the live view");

        let all = MetaLogReader::all_records(fs.as_ref(), "/meta/master").unwrap();
        assert_eq!(all.len(), 2, "all_records must still show both the state and the removal");
        assert!(all[1].removed);
    }

    #[test]
    fn recovering_open_writes_a_recover_marker_first() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let writer = MetaLogWriter::open(fs.clone(), "/meta/range_server", true).unwrap();
        writer.record_state(&RangeLoadOp { id: 1, range_name: "r1".into() }).unwrap();

        let all = MetaLogReader::all_records(fs.as_ref(), "/meta/range_server").unwrap();
        assert_eq!(all[0].entity_type, RECOVER_MARKER_TYPE);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn checksum_mismatch_is_reported_with_the_entity_id() {
        let fs: Arc<dyn Filesystem> = Arc::new(MemFilesystem::new());
        let writer = MetaLogWriter::open(fs.clone(), "/meta/master", false).unwrap();
        writer.record_state(&RangeLoadOp { id: 3, range_name: "r3".into() }).unwrap();
        writer.close().unwrap();

        let fd = fs.open("/meta/master", OpenFlags::WRITE).unwrap();
        let len = fs.length("/meta/master").unwrap() as usize;
        let mut bytes = fs.pread(fd, 0, len).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs.close(fd).unwrap();
        fs.rmdir("/meta/master").unwrap();
        let fd = fs.create("/meta/master", true, 0, 0, 0).unwrap();
        fs.append(fd, &bytes, true).unwrap();
        fs.close(fd).unwrap();

        let err = MetaLogReader::all_records(fs.as_ref(), "/meta/master").expect_err("corrupted payload must fail checksum");
        assert!(matches!(err, HypertableError::MetaLogChecksumMismatch { id: 3 }));
    }

    #[test]
    fn reopening_an_existing_journal_on_disk_appends_rather_than_truncates() {
        use httable_fs::LocalFilesystem;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.log").to_str().unwrap().to_string();
        let fs: Arc<dyn Filesystem> = Arc::new(LocalFilesystem::new());

        let first = MetaLogWriter::open(fs.clone(), &path, false).unwrap();
        first.record_state(&RangeLoadOp { id: 1, range_name: "r1".into() }).unwrap();
        first.close().unwrap();

        let second = MetaLogWriter::open(fs.clone(), &path, true).unwrap();
        second.record_state(&RangeLoadOp { id: 2, range_name: "r2".into() }).unwrap();
        second.close().unwrap();

        let all = MetaLogReader::all_records(fs.as_ref(), &path).unwrap();
        assert_eq!(all.len(), 3, "reopening must preserve the first session's record and append a marker plus the new one");
        assert_eq!(all[0].id, 1);
        assert_eq!(all[1].entity_type, RECOVER_MARKER_TYPE);
        assert_eq!(all[2].id, 2);

        let live = MetaLogReader::live_entities::<RangeLoadOp>(fs.as_ref(), &path).unwrap();
        let mut names: Vec<String> = live.iter().map(|e| e.range_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["r1".to_string(), "r2".to_string()]);
    }
}
