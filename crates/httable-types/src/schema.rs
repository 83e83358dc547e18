use serde::{Deserialize, Serialize};

use crate::FamilyId;

/// How specific a key the bloom filter tests membership on, per access
/// group. Coarser policies (e.g. `Row`) give smaller filters at the cost
/// of weaker pruning when a row spans many columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BloomPolicy {
    Disabled,
    Row,
    RowColumn,
}

impl Default for BloomPolicy {
    fn default() -> Self {
        Self::Row
    }
}

/// One column family: an id in `[1, 255]`, a name, and its retention
/// policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFamilySpec {
    pub id: FamilyId,
    pub name: String,
    /// Time-to-live in seconds; `None` means cells never expire by age.
    pub ttl_seconds: Option<u64>,
    pub is_counter: bool,
    /// Tombstone families retain delete markers rather than having them
    /// dropped by a major compaction, used for families that need
    /// auditable deletes.
    pub keep_tombstones: bool,
}

impl ColumnFamilySpec {
    pub fn new(id: FamilyId, name: impl Into<String>) -> Self {
        assert!(id >= 1, "family id must be in [1, 255], got 0");
        Self {
            id,
            name: name.into(),
            ttl_seconds: None,
            is_counter: false,
            keep_tombstones: false,
        }
    }

    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.ttl_seconds = Some(seconds);
        self
    }
}

/// A physically-clustered subset of column families sharing one cell
/// cache and set of cell stores, with its own storage policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGroupSpec {
    pub name: String,
    pub family_ids: Vec<FamilyId>,
    pub target_block_size: u32,
    pub bloom_policy: BloomPolicy,
    pub bloom_false_positive_prob: f64,
    pub in_memory: bool,
    /// Minor-compaction threshold, in bytes of active + frozen cache.
    pub minor_compaction_threshold: u64,
    /// Total on-disk bytes (live stores plus cache) at which this group
    /// contributes pressure toward splitting its range.
    pub split_threshold: u64,
}

impl AccessGroupSpec {
    pub fn new(name: impl Into<String>, family_ids: Vec<FamilyId>) -> Self {
        Self {
            name: name.into(),
            family_ids,
            target_block_size: 65 * 1024,
            bloom_policy: BloomPolicy::default(),
            bloom_false_positive_prob: 0.01,
            in_memory: false,
            minor_compaction_threshold: 50 * 1024 * 1024,
            split_threshold: 200 * 1024 * 1024,
        }
    }
}

/// A table's schema: stable id, a generation bumped on every alter, and
/// the column families grouped into access groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub table_id: crate::TableId,
    pub generation: u64,
    pub families: Vec<ColumnFamilySpec>,
    pub access_groups: Vec<AccessGroupSpec>,
}

impl Schema {
    pub fn family(&self, id: FamilyId) -> Option<&ColumnFamilySpec> {
        self.families.iter().find(|f| f.id == id)
    }

    pub fn access_group_for_family(&self, id: FamilyId) -> Option<&AccessGroupSpec> {
        self.access_groups.iter().find(|ag| ag.family_ids.contains(&id))
    }
}
