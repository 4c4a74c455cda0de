//! Tests for the in-memory store index
//!
//! These tests verify:
//! - lookup / upsert / remove bookkeeping
//! - Last-write-wins rebuild regardless of arrival order
//! - Tombstone tracking
//! - Per-page queries used by compaction

use flashkv::entry::EntryType;
use flashkv::index::{EntryKey, IndexSlot, Location, StoreIndex, Tombstone};

fn slot(page: u32, offset: u32, slots: u32, seq: u64) -> IndexSlot {
    IndexSlot {
        location: Location {
            page,
            offset,
            size: slots * 64,
        },
        seq,
        entry_type: EntryType::U32,
    }
}

fn tombstone(page: u32, offset: u32, seq: u64) -> Tombstone {
    Tombstone {
        location: Location {
            page,
            offset,
            size: 64,
        },
        seq,
    }
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_upsert_and_lookup() {
    let mut index = StoreIndex::new();
    assert!(index.is_empty());

    assert!(index.upsert("app", "a", slot(1, 64, 1, 1)).is_none());
    assert_eq!(index.lookup("app", "a"), Some(&slot(1, 64, 1, 1)));
    assert_eq!(index.lookup("app", "b"), None);
    assert_eq!(index.lookup("other", "a"), None);
    assert_eq!(index.len(), 1);

    let prev = index.upsert("app", "a", slot(1, 128, 1, 2));
    assert_eq!(prev, Some(slot(1, 64, 1, 1)));
    assert_eq!(index.len(), 1);
}

#[test]
fn test_remove() {
    let mut index = StoreIndex::new();
    index.upsert("app", "a", slot(1, 64, 1, 1));
    index.upsert("net", "b", slot(1, 128, 1, 2));
    assert_eq!(index.namespace_count(), 2);

    assert_eq!(index.remove("app", "a"), Some(slot(1, 64, 1, 1)));
    assert_eq!(index.remove("app", "a"), None);
    assert_eq!(index.len(), 1);
    assert_eq!(index.namespace_count(), 1);
    assert_eq!(index.namespaces().collect::<Vec<_>>(), vec!["net"]);
}

#[test]
fn test_tombstones() {
    let mut index = StoreIndex::new();
    index.upsert("app", "a", slot(1, 64, 1, 1));

    let prev = index.record_tombstone("app", "a", tombstone(1, 128, 2));
    assert_eq!(prev, Some(slot(1, 64, 1, 1)));
    assert!(index.lookup("app", "a").is_none());
    assert_eq!(index.tombstone("app", "a"), Some(&tombstone(1, 128, 2)));
    assert_eq!(index.tombstone_count(), 1);

    // A new value clears the tombstone
    index.upsert("app", "a", slot(1, 192, 1, 3));
    assert_eq!(index.tombstone_count(), 0);

    index.record_tombstone("app", "a", tombstone(1, 256, 4));
    assert_eq!(index.drop_tombstone("app", "a"), Some(tombstone(1, 256, 4)));
    assert_eq!(index.tombstone_count(), 0);
}

// =============================================================================
// Rebuild
// =============================================================================

#[test]
fn test_apply_entry_last_write_wins() {
    let mut index = StoreIndex::new();

    assert!(index.apply_entry("app", "a", slot(2, 64, 1, 5)));
    assert!(!index.apply_entry("app", "a", slot(1, 64, 1, 3)));
    assert_eq!(index.lookup("app", "a").unwrap().seq, 5);

    assert!(index.apply_entry("app", "a", slot(2, 128, 1, 6)));
    assert_eq!(index.lookup("app", "a").unwrap().location.offset, 128);
}

#[test]
fn test_apply_tombstone_ordering() {
    let mut index = StoreIndex::new();

    // Newer tombstone removes the entry
    index.apply_entry("app", "a", slot(1, 64, 1, 1));
    assert!(index.apply_tombstone("app", "a", tombstone(1, 128, 2)));
    assert!(index.lookup("app", "a").is_none());

    // An older entry does not resurrect it
    assert!(!index.apply_entry("app", "a", slot(1, 192, 1, 1)));
    assert!(index.lookup("app", "a").is_none());

    // An older tombstone does not delete a newer entry
    index.apply_entry("app", "b", slot(2, 64, 1, 10));
    assert!(!index.apply_tombstone("app", "b", tombstone(1, 256, 9)));
    assert!(index.lookup("app", "b").is_some());
}

// =============================================================================
// Queries
// =============================================================================

#[test]
fn test_snapshot_filters_and_order() {
    let mut index = StoreIndex::new();
    index.upsert("net", "b", slot(1, 64, 1, 1));
    index.upsert("app", "z", slot(1, 128, 1, 2));
    index.upsert("app", "a", slot(1, 192, 1, 3));
    index.upsert(
        "app",
        "s",
        IndexSlot {
            entry_type: EntryType::Str,
            ..slot(1, 256, 2, 4)
        },
    );

    let all: Vec<EntryKey> = index.snapshot(None, None).into_iter().map(|(k, _)| k).collect();
    assert_eq!(
        all,
        vec![
            EntryKey::new("app", "a"),
            EntryKey::new("app", "s"),
            EntryKey::new("app", "z"),
            EntryKey::new("net", "b"),
        ]
    );

    assert_eq!(index.snapshot(Some("net"), None).len(), 1);
    assert_eq!(index.snapshot(None, Some(EntryType::Str)).len(), 1);
    assert_eq!(index.snapshot(Some("net"), Some(EntryType::Str)).len(), 0);
}

#[test]
fn test_page_queries() {
    let mut index = StoreIndex::new();
    index.upsert("app", "b", slot(1, 192, 1, 3));
    index.upsert("app", "a", slot(1, 64, 2, 1));
    index.upsert("app", "c", slot(2, 64, 1, 4));
    index.record_tombstone("app", "d", tombstone(1, 256, 5));

    let on_page_1: Vec<u32> = index
        .live_on_page(1)
        .iter()
        .map(|(_, s)| s.location.offset)
        .collect();
    assert_eq!(on_page_1, vec![64, 192]);

    let tombstones = index.tombstones_on_page(1);
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].0, EntryKey::new("app", "d"));
    assert!(index.tombstones_on_page(2).is_empty());

    // Tombstones are not live
    let occupancy = index.occupancy();
    assert_eq!(occupancy.get(&1), Some(&3));
    assert_eq!(occupancy.get(&2), Some(&1));
    assert_eq!(index.used_slots(), 4);
}

#[test]
fn test_equality_ignores_insertion_order() {
    let mut first = StoreIndex::new();
    first.upsert("app", "a", slot(1, 64, 1, 1));
    first.upsert("app", "b", slot(1, 128, 1, 2));

    let mut second = StoreIndex::new();
    second.apply_entry("app", "b", slot(1, 128, 1, 2));
    second.apply_entry("app", "a", slot(1, 64, 1, 1));

    assert_eq!(first, second);
}
