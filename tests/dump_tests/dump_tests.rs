//! Tests for dump rendering
//!
//! These tests verify:
//! - The statistics block
//! - Per-type entry lines
//! - Filters and inline reporting of corrupt entries

use flashkv::dump::{dump, write_entry, write_stats, DumpSummary};
use flashkv::{EntryInfo, EntryType, MemDevice, Stats, Store, Value};

fn render_entry(entry_type: EntryType, value: Value) -> String {
    let info = EntryInfo {
        namespace: "app".to_string(),
        key: "k".to_string(),
        entry_type,
        value,
    };
    let mut out = Vec::new();
    write_entry(&mut out, &info).unwrap();
    String::from_utf8(out).unwrap()
}

fn sample_store() -> (MemDevice, Store<MemDevice>) {
    let device = MemDevice::new(4, 4096);
    let mut store = Store::open(device.clone()).unwrap();
    store.set("app", "count", 42u32).unwrap();
    store.set("app", "greeting", "hello").unwrap();
    store.set("app", "mac", vec![0xA4u8, 0xCF, 0x12]).unwrap();
    (device, store)
}

#[test]
fn test_write_stats() {
    let stats = Stats {
        total: 126,
        used: 3,
        free: 123,
        namespace_count: 1,
    };
    let mut out = Vec::new();
    write_stats(&mut out, &stats).unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "== Statistics ==\nEntries: total=126 used=3 free=123\nNamespaces: 1\n== done ==\n"
    );
}

#[test]
fn test_entry_lines() {
    assert_eq!(
        render_entry(EntryType::U32, Value::U32(42)),
        "namespace=app key=k type=uint32(0x4) value=42\n"
    );
    assert_eq!(
        render_entry(EntryType::I8, Value::I8(-1)),
        "namespace=app key=k type=int8(0x11) value=-1\n"
    );
    assert_eq!(
        render_entry(EntryType::U64, Value::U64(255)),
        "namespace=app key=k type=uint64(0x8) value=ff\n"
    );
    assert_eq!(
        render_entry(EntryType::Str, Value::string("hello")),
        "namespace=app key=k type=str(0x21) len=5 value=hello\n"
    );
    assert_eq!(
        render_entry(EntryType::Blob, Value::Blob(vec![0xA4, 0xCF, 0x12])),
        "namespace=app key=k type=blob(0x42) value(hexdump)=a4cf12\n"
    );
}

#[test]
fn test_str_written_as_raw_bytes() {
    let info = EntryInfo {
        namespace: "app".to_string(),
        key: "raw".to_string(),
        entry_type: EntryType::Str,
        value: Value::Str(vec![b'a', 0xFF, b'b']),
    };
    let mut out = Vec::new();
    write_entry(&mut out, &info).unwrap();

    assert!(out.ends_with(&[b'a', 0xFF, b'b', b'\n']));
}

#[test]
fn test_dump_whole_store() {
    let (_device, store) = sample_store();
    let mut out = Vec::new();
    let summary = dump(&mut out, &store, None, None).unwrap();

    assert_eq!(summary, DumpSummary { entries: 3, corrupt: 0 });
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "== Statistics ==\n\
         Entries: total=126 used=5 free=121\n\
         Namespaces: 1\n\
         == done ==\n\
         == Dump all key-value pairs ==\n\
         namespace=app key=count type=uint32(0x4) value=42\n\
         namespace=app key=greeting type=str(0x21) len=5 value=hello\n\
         namespace=app key=mac type=blob(0x42) value(hexdump)=a4cf12\n\
         == done ==\n"
    );
}

#[test]
fn test_dump_with_filters() {
    let (_device, store) = sample_store();
    let mut out = Vec::new();
    let summary = dump(&mut out, &store, Some("app"), Some(EntryType::Str)).unwrap();

    assert_eq!(summary.entries, 1);
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("key=greeting"));
    assert!(!text.contains("key=count"));
}

#[test]
fn test_dump_reports_corrupt_entries() {
    let (device, store) = sample_store();

    // count is the first record on page 1
    device.corrupt(1, 64 + 48, 0x01);

    let mut out = Vec::new();
    let summary = dump(&mut out, &store, None, None).unwrap();
    assert_eq!(summary, DumpSummary { entries: 2, corrupt: 1 });

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("ERROR: Corrupt entry at page 1 offset 64"));
    assert!(text.contains("key=greeting"));
    assert!(text.ends_with("== done ==\n"));
}
