//! Dump rendering
//!
//! Human-readable listing of a store, one line per entry:
//!
//! ```text
//! == Statistics ==
//! Entries: total=126 used=3 free=123
//! == done ==
//! == Dump all key-value pairs ==
//! namespace=app key=count type=uint32(0x4) value=42
//! namespace=app key=greeting type=str(0x21) len=5 value=hello
//! namespace=app key=mac type=blob(0x42) value(hexdump)=a4cf12
//! == done ==
//! ```
//!
//! Integers print in decimal except `uint64` (hex); strings are written as
//! raw bytes.

use std::io::Write;

use crate::device::BlockDevice;
use crate::entry::{EntryInfo, EntryType, Value};
use crate::error::{FlashError, Result};
use crate::store::{Stats, Store};

/// Counts from one dump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub entries: usize,
    pub corrupt: usize,
}

/// Write the statistics block
pub fn write_stats<W: Write>(out: &mut W, stats: &Stats) -> Result<()> {
    writeln!(out, "== Statistics ==")?;
    writeln!(out, "Entries: {}", stats)?;
    writeln!(out, "Namespaces: {}", stats.namespace_count)?;
    writeln!(out, "== done ==")?;
    Ok(())
}

/// Write one entry line
pub fn write_entry<W: Write>(out: &mut W, info: &EntryInfo) -> Result<()> {
    write!(
        out,
        "namespace={} key={} type={}({:#x}) ",
        info.namespace,
        info.key,
        info.entry_type,
        info.entry_type.tag()
    )?;

    match &info.value {
        Value::Str(bytes) => {
            write!(out, "len={} value=", bytes.len())?;
            out.write_all(bytes)?;
            writeln!(out)?;
        }
        Value::Blob(_) => writeln!(out, "value(hexdump)={}", info.value)?,
        scalar => writeln!(out, "value={}", scalar)?,
    }
    Ok(())
}

/// Write the statistics and every matching entry
///
/// Corrupt entries are reported inline and do not stop the dump.
pub fn dump<W: Write, D: BlockDevice>(
    out: &mut W,
    store: &Store<D>,
    namespace: Option<&str>,
    entry_type: Option<EntryType>,
) -> Result<DumpSummary> {
    let mut summary = DumpSummary::default();

    write_stats(out, &store.stats())?;

    writeln!(out, "== Dump all key-value pairs ==")?;
    for entry in store.iter(namespace, entry_type) {
        match entry {
            Ok(info) => {
                write_entry(out, &info)?;
                summary.entries += 1;
            }
            Err(e @ FlashError::CorruptEntry { .. }) => {
                writeln!(out, "ERROR: {}", e)?;
                summary.corrupt += 1;
            }
            Err(e) => return Err(e),
        }
    }
    writeln!(out, "== done ==")?;

    Ok(summary)
}
