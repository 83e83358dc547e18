//! A single cursor interface (`peek`/`advance`) plus a tagged-variant
//! enum of the two concrete cursor kinds a [`crate::MergeScanner`]
//! merges, replacing a deep scanner inheritance hierarchy.

use httable_cellcache::CellCacheScanner;
use httable_cellstore::CellStoreScanner;
use httable_error::Result;
use httable_types::{SerializedKeyOwned, Value};

/// One child cursor of a merge scan: either the access group's in-memory
/// cache or one of its on-disk cell stores.
pub enum CursorHandle {
    Cache(CellCacheScanner),
    Store(CellStoreScanner),
}

impl CursorHandle {
    /// Returns the current key/value without consuming it, or `None` if
    /// the cursor is exhausted. Cloned out rather than borrowed so both
    /// variants can share one return type despite their underlying
    /// storage (an in-memory vector vs. a lazily decoded block) differing.
    pub fn peek(&mut self) -> Result<Option<(SerializedKeyOwned, Value)>> {
        match self {
            Self::Cache(cursor) => Ok(cursor.peek().map(|(k, v)| (k.clone(), v.clone()))),
            Self::Store(cursor) => Ok(cursor.peek()?.map(|(k, v)| (k.clone(), v.clone()))),
        }
    }

    pub fn advance(&mut self) {
        match self {
            Self::Cache(cursor) => cursor.advance(),
            Self::Store(cursor) => cursor.advance(),
        }
    }
}
