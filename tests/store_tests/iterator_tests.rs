//! Tests for entry iteration
//!
//! These tests verify:
//! - Filters by namespace and type
//! - Sorted, snapshot-sized iteration
//! - Per-entry corruption errors that do not stop iteration

use flashkv::{EntryInfo, EntryType, FlashError, MemDevice, Store, Value};

fn populated() -> (MemDevice, Store<MemDevice>) {
    let device = MemDevice::new(4, 4096);
    let mut store = Store::open(device.clone()).unwrap();

    store.set("app", "count", 42u32).unwrap();
    store.set("app", "greeting", "hello").unwrap();
    store.set("net", "mac", vec![0xA4u8, 0xCF, 0x12]).unwrap();
    store.set("net", "port", 8080u16).unwrap();
    store.set("sys", "boots", 3u32).unwrap();
    (device, store)
}

fn keys(entries: &[EntryInfo]) -> Vec<(String, String)> {
    entries
        .iter()
        .map(|e| (e.namespace.clone(), e.key.clone()))
        .collect()
}

#[test]
fn test_iterate_single_str_entry() {
    let mut store = Store::open(MemDevice::new(4, 4096)).unwrap();
    store.set("app", "greeting", "hello").unwrap();

    let entries: Vec<EntryInfo> = store.entries().map(|e| e.unwrap()).collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, EntryType::Str);
    assert_eq!(entries[0].value, Value::string("hello"));
    assert_eq!(entries[0].namespace, "app");
    assert_eq!(entries[0].key, "greeting");
}

#[test]
fn test_iterate_empty_store() {
    let store = Store::open(MemDevice::new(4, 4096)).unwrap();
    assert_eq!(store.entries().count(), 0);
}

#[test]
fn test_iteration_is_sorted() {
    let (_device, store) = populated();
    let entries: Vec<EntryInfo> = store.entries().map(|e| e.unwrap()).collect();

    assert_eq!(
        keys(&entries),
        vec![
            ("app".to_string(), "count".to_string()),
            ("app".to_string(), "greeting".to_string()),
            ("net".to_string(), "mac".to_string()),
            ("net".to_string(), "port".to_string()),
            ("sys".to_string(), "boots".to_string()),
        ]
    );
}

#[test]
fn test_namespace_filter() {
    let (_device, store) = populated();
    let entries: Vec<EntryInfo> = store.iter(Some("net"), None).map(|e| e.unwrap()).collect();

    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.namespace == "net"));
    assert_eq!(store.iter(Some("missing"), None).count(), 0);
}

#[test]
fn test_type_filter() {
    let (_device, store) = populated();
    let entries: Vec<EntryInfo> = store
        .iter(None, Some(EntryType::U32))
        .map(|e| e.unwrap())
        .collect();

    assert_eq!(
        keys(&entries),
        vec![
            ("app".to_string(), "count".to_string()),
            ("sys".to_string(), "boots".to_string()),
        ]
    );
}

#[test]
fn test_combined_filters() {
    let (_device, store) = populated();
    let entries: Vec<EntryInfo> = store
        .iter(Some("net"), Some(EntryType::Blob))
        .map(|e| e.unwrap())
        .collect();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "mac");
    assert_eq!(entries[0].value, Value::Blob(vec![0xA4, 0xCF, 0x12]));
}

#[test]
fn test_iterator_reports_exact_size() {
    let (_device, store) = populated();
    let mut iter = store.entries();

    assert_eq!(iter.len(), 5);
    iter.next();
    assert_eq!(iter.len(), 4);
}

#[test]
fn test_new_iterator_restarts() {
    let (_device, store) = populated();
    let first: Vec<EntryInfo> = store.entries().map(|e| e.unwrap()).collect();
    let second: Vec<EntryInfo> = store.entries().map(|e| e.unwrap()).collect();
    assert_eq!(first, second);
}

#[test]
fn test_deleted_and_overwritten_entries() {
    let (_device, mut store) = populated();
    store.delete("app", "count").unwrap();
    store.set("net", "port", 443u16).unwrap();

    let entries: Vec<EntryInfo> = store.entries().map(|e| e.unwrap()).collect();
    assert_eq!(entries.len(), 4);
    assert!(!entries.iter().any(|e| e.key == "count"));

    let port = entries.iter().find(|e| e.key == "port").unwrap();
    assert_eq!(port.value, Value::U16(443));
}

#[test]
fn test_iterate_after_reopen() {
    let (device, store) = populated();
    let before: Vec<EntryInfo> = store.entries().map(|e| e.unwrap()).collect();
    drop(store);

    let store = Store::open(device).unwrap();
    let after: Vec<EntryInfo> = store.entries().map(|e| e.unwrap()).collect();
    assert_eq!(before, after);
}

#[test]
fn test_corrupt_entry_yields_error_and_continues() {
    let (device, store) = populated();

    // "greeting" is the second record on page 1; damage its payload
    device.corrupt(1, 128 + 64, 0x20);

    let results: Vec<_> = store.entries().collect();
    assert_eq!(results.len(), 5);

    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(FlashError::CorruptEntry {
            page: 1,
            offset: 128,
            ..
        })
    ));
    assert!(results[2..].iter().all(|r| r.is_ok()));
}
