//! Tests for page reclamation
//!
//! These tests verify:
//! - Superseded records are reclaimed and pages erased
//! - Live entries survive being moved
//! - Tombstones are carried forward only while an older record exists
//! - Implicit reclamation when a set does not fit

use flashkv::page::PageState;
use flashkv::{Config, EntryType, FlashError, MemDevice, Store, Value};

const PAGE_SIZE: usize = 4096;

fn open_store(pages: u32) -> (MemDevice, Store<MemDevice>) {
    let device = MemDevice::new(pages, PAGE_SIZE);
    let store = Store::open(device.clone()).unwrap();
    (device, store)
}

fn page_state<D: flashkv::BlockDevice>(store: &Store<D>, id: u32) -> PageState {
    store.pages().page(id).unwrap().state
}

// =============================================================================
// Explicit Compaction
// =============================================================================

#[test]
fn test_compact_reclaims_superseded_records() {
    let (device, mut store) = open_store(4);

    // 63 records fill page 1, the rest land on page 2
    for i in 0..100u32 {
        store.set("app", "counter", i).unwrap();
    }
    assert_eq!(page_state(&store, 1), PageState::Full);

    let stats = store.compact().unwrap();
    assert_eq!(stats.pages_reclaimed, 1);
    assert_eq!(stats.entries_moved, 0);

    assert_eq!(page_state(&store, 1), PageState::Empty);
    assert_eq!(device.erase_count(1), 1);
    assert_eq!(store.get("app", "counter", EntryType::U32).unwrap(), Value::U32(99));
}

#[test]
fn test_compact_moves_live_entries() {
    let (device, mut store) = open_store(4);
    store.set("app", "a", 1u32).unwrap();
    store.set("app", "b", "kept").unwrap();

    // a + b(2 slots) + 60 filler records fill page 1
    for i in 0..61u32 {
        store.set("app", "filler", i).unwrap();
    }
    assert_eq!(store.pages().active_page(), Some(2));

    let stats = store.compact().unwrap();
    assert_eq!(stats.pages_reclaimed, 1);
    assert_eq!(stats.entries_moved, 2);

    assert_eq!(store.index().lookup("app", "a").unwrap().location.page, 2);
    assert_eq!(store.get("app", "a", EntryType::U32).unwrap(), Value::U32(1));
    assert_eq!(store.get("app", "b", EntryType::Str).unwrap(), Value::string("kept"));

    let before = store.index().clone();
    drop(store);
    let store = Store::open(device.clone()).unwrap();
    assert_eq!(store.index(), &before);
}

#[test]
fn test_compact_skips_the_active_page() {
    let (_device, mut store) = open_store(4);
    store.set("app", "a", 1u32).unwrap();
    store.set("app", "a", 2u32).unwrap();

    let stats = store.compact().unwrap();
    assert_eq!(stats.pages_reclaimed, 0);
    assert_eq!(store.pages().active_page(), Some(1));
}

#[test]
fn test_compaction_threshold() {
    let config = Config::builder().compaction_threshold(0.5).build();
    let mut store = Store::open_with_config(MemDevice::new(4, PAGE_SIZE), config).unwrap();

    // Page 1: 40 distinct live keys and 23 superseded records
    for i in 0..40u32 {
        store.set("app", &format!("k{}", i), i).unwrap();
    }
    for i in 0..24u32 {
        store.set("app", "hot", i).unwrap();
    }
    assert_eq!(page_state(&store, 1), PageState::Full);

    // 40/63 live is above the threshold
    let stats = store.compact().unwrap();
    assert_eq!(stats.pages_reclaimed, 0);
    assert_eq!(page_state(&store, 1), PageState::Full);
}

// =============================================================================
// Tombstones
// =============================================================================

#[test]
fn test_tombstone_carried_while_older_record_exists() {
    let config = Config::builder().compaction_threshold(0.5).build();
    let device = MemDevice::new(4, PAGE_SIZE);
    let mut store = Store::open_with_config(device.clone(), config.clone()).unwrap();

    // Page 1: x plus 62 keys that stay live
    store.set("app", "x", 1u32).unwrap();
    for i in 0..62u32 {
        store.set("app", &format!("keep{}", i), i).unwrap();
    }

    // Page 2: the tombstone for x plus superseded records
    store.delete("app", "x").unwrap();
    for i in 0..62u32 {
        store.set("app", "tmp", i).unwrap();
    }
    assert_eq!(page_state(&store, 2), PageState::Full);

    let stats = store.compact().unwrap();
    assert_eq!(stats.pages_reclaimed, 1);
    assert_eq!(stats.entries_moved, 1);
    assert_eq!(stats.tombstones_moved, 1);
    assert_eq!(stats.tombstones_dropped, 0);
    assert_eq!(page_state(&store, 2), PageState::Empty);

    // The old x record on page 1 must not come back
    assert!(!store.contains("app", "x"));
    assert_eq!(store.index().tombstone("app", "x").unwrap().location.page, 3);

    let before = store.index().clone();
    drop(store);

    let store = Store::open_with_config(device.clone(), config).unwrap();
    assert_eq!(store.index(), &before);
    assert!(matches!(store.get("app", "x", EntryType::U32), Err(FlashError::KeyNotFound)));
    assert_eq!(store.get("app", "tmp", EntryType::U32).unwrap(), Value::U32(61));
}

#[test]
fn test_tombstone_dropped_without_older_record() {
    let (device, mut store) = open_store(4);

    store.set("app", "x", 1u32).unwrap();
    store.delete("app", "x").unwrap();
    for i in 0..62u32 {
        store.set("app", "tmp", i).unwrap();
    }
    assert_eq!(page_state(&store, 1), PageState::Full);
    assert_eq!(store.index().tombstone_count(), 1);

    let stats = store.compact().unwrap();
    assert_eq!(stats.pages_reclaimed, 1);
    assert_eq!(stats.tombstones_dropped, 1);
    assert_eq!(stats.tombstones_moved, 0);
    assert_eq!(store.index().tombstone_count(), 0);

    drop(store);
    let store = Store::open(device.clone()).unwrap();
    assert!(!store.contains("app", "x"));
    assert_eq!(store.get("app", "tmp", EntryType::U32).unwrap(), Value::U32(61));
}

// =============================================================================
// Implicit Reclamation
// =============================================================================

#[test]
fn test_overwrites_never_fill_the_device() {
    let (device, mut store) = open_store(4);

    for i in 0..500u32 {
        store.set("app", "counter", i).unwrap();
    }
    assert_eq!(store.get("app", "counter", EntryType::U32).unwrap(), Value::U32(499));
    assert_eq!(store.stats().used, 1);

    drop(store);
    let store = Store::open(device.clone()).unwrap();
    assert_eq!(store.get("app", "counter", EntryType::U32).unwrap(), Value::U32(499));
}

#[test]
fn test_large_values_reclaim_whole_pages() {
    let (_device, mut store) = open_store(4);
    let page_blob = |byte: u8| vec![byte; 3968];

    store.set("blob", "a", page_blob(1)).unwrap();
    store.set("blob", "b", page_blob(2)).unwrap();

    // Both usable pages are fully live
    assert!(matches!(store.set("blob", "c", page_blob(3)), Err(FlashError::StoreFull)));
    assert!(matches!(store.set("blob", "a", page_blob(9)), Err(FlashError::StoreFull)));

    store.delete("blob", "a").unwrap();
    store.set("blob", "c", page_blob(3)).unwrap();

    assert!(!store.contains("blob", "a"));
    assert_eq!(store.get("blob", "b", EntryType::Blob).unwrap(), Value::Blob(page_blob(2)));
    assert_eq!(store.get("blob", "c", EntryType::Blob).unwrap(), Value::Blob(page_blob(3)));
}

#[test]
fn test_candidates_prefer_fewest_live_slots() {
    let (_device, mut store) = open_store(5);

    // Page 1: 10 keys plus the latest "hot", page 2: the latest "warm"
    for i in 0..10u32 {
        store.set("app", &format!("a{}", i), i).unwrap();
    }
    for i in 0..53u32 {
        store.set("app", "hot", i).unwrap();
    }
    for i in 0..63u32 {
        store.set("app", "warm", i).unwrap();
    }
    store.set("app", "last", 0u32).unwrap();

    let candidates = store.pages().candidates(store.index(), 1.0, false);
    let pages: Vec<u32> = candidates.iter().map(|c| c.page).collect();
    assert_eq!(pages, vec![2, 1]);
    assert_eq!(candidates[0].live_slots, 1);
    assert_eq!(candidates[1].live_slots, 11);
    assert_eq!(store.pages().active_page(), Some(3));
}
