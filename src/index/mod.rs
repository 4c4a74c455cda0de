//! Index Module
//!
//! In-memory map from (namespace, key) to the location of its latest record.
//!
//! ## Responsibilities
//! - Point lookups without touching the device
//! - Last-write-wins rebuild from a page scan at open
//! - Remember the latest tombstone of deleted keys, so compaction can
//!   carry it forward while older records of the key still exist
//!
//! The index is derived state: it is never persisted and never fails.

mod table;

pub use table::StoreIndex;

use crate::entry::{EntryType, SLOT_SIZE};

/// Identity of an entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub namespace: String,
    pub key: String,
}

impl EntryKey {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }
}

/// Physical position of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub page: u32,
    /// Byte offset within the page
    pub offset: u32,
    /// Encoded size in bytes (whole slots)
    pub size: u32,
}

impl Location {
    /// Slots occupied by the record
    pub fn slots(&self) -> usize {
        self.size as usize / SLOT_SIZE
    }
}

/// Index entry for a live key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSlot {
    pub location: Location,
    pub seq: u64,
    pub entry_type: EntryType,
}

/// Latest delete marker for a key that is not live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    pub location: Location,
    pub seq: u64,
}
