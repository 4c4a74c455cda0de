//! Store Module
//!
//! The top-level API that ties the page manager, codec and index together.
//!
//! ## Responsibilities
//! - Open a device: scan pages, rebuild the index (last write wins)
//! - get / set / delete with typed values
//! - Reclaim space when the device fills up
//! - Report slot statistics and iterate live entries
//!
//! ## Concurrency Model
//! Single-threaded and synchronous. A `Store` performs no internal locking;
//! hosts that share one across threads wrap it in their own mutex. At most
//! one `Store` may be open per device.

use std::fmt;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::device::BlockDevice;
use crate::entry::{codec, validate_name, DecodeBuffer, Entry, EntryType, Record, Value, SLOT_SIZE};
use crate::error::{FlashError, Result};
use crate::index::{IndexSlot, StoreIndex, Tombstone};
use crate::iterator::EntryIter;
use crate::page::{PageManager, ReclaimStats, ScanItem};

/// Slot usage summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Usable entry slots (the compaction reserve page excluded)
    pub total: usize,
    /// Slots held by live entries
    ///
    /// A scalar entry holds one slot; a STR or BLOB entry holds one header
    /// slot plus one slot per started 64 bytes of payload, so `used` equals
    /// the number of live entries only when every value is a scalar.
    pub used: usize,
    /// `total - used`; superseded records and tombstones count as free
    pub free: usize,
    /// Namespaces with at least one live entry
    pub namespace_count: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "total={} used={} free={}", self.total, self.used, self.free)
    }
}

/// What happened while opening the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Entries and tombstones applied to the index
    pub records_applied: u64,

    /// Records skipped because a newer record of the same key exists
    pub records_superseded: u64,

    /// Records that failed to decode and were skipped
    pub entries_corrupted: u64,

    /// Location of every skipped record (page, offset)
    pub corrupt_locations: Vec<(u32, u32)>,

    /// Pages with damaged headers that were erased
    pub pages_erased: usize,

    /// Pages kept despite a damaged header because their records decode
    pub headers_damaged: usize,

    /// Highest sequence number found on the device
    pub last_seq: u64,
}

/// A key-value store on one block device
pub struct Store<D: BlockDevice> {
    config: Config,
    pages: PageManager<D>,
    index: StoreIndex,
    recovery: RecoveryReport,
}

impl<D: BlockDevice> Store<D> {
    /// Open a store with the default config
    pub fn open(device: D) -> Result<Self> {
        Self::open_with_config(device, Config::default())
    }

    /// Open or initialize a store on `device`
    ///
    /// On startup:
    /// 1. Load (or write) the metadata page
    /// 2. Scan every data page, erasing half-written ones
    /// 3. Rebuild the index in ascending sequence order
    pub fn open_with_config(device: D, config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1+2: Page manager loads metadata and scans pages
        let (pages, scan) = PageManager::open(device, config.sync_writes)?;

        // Step 3: Replay records into the index
        let mut index = StoreIndex::new();
        let mut recovery = RecoveryReport {
            pages_erased: scan.pages_erased,
            headers_damaged: scan.headers_damaged,
            last_seq: pages.next_seq().saturating_sub(1),
            ..Default::default()
        };

        for page in scan.pages {
            for item in page.items {
                let applied = match item {
                    ScanItem::Entry {
                        namespace,
                        key,
                        entry_type,
                        location,
                        seq,
                    } => index.apply_entry(
                        &namespace,
                        &key,
                        IndexSlot {
                            location,
                            seq,
                            entry_type,
                        },
                    ),
                    ScanItem::Tombstone {
                        namespace,
                        key,
                        location,
                        seq,
                    } => index.apply_tombstone(&namespace, &key, Tombstone { location, seq }),
                    ScanItem::Corrupt { page, offset, error } => {
                        warn!(page, offset, %error, "skipping corrupt entry");
                        recovery.entries_corrupted += 1;
                        recovery.corrupt_locations.push((page, offset));
                        continue;
                    }
                };

                if applied {
                    recovery.records_applied += 1;
                } else {
                    recovery.records_superseded += 1;
                }
            }
        }

        info!(
            entries = index.len(),
            namespaces = index.namespace_count(),
            corrupted = recovery.entries_corrupted,
            last_seq = recovery.last_seq,
            "store opened"
        );

        Ok(Self {
            config,
            pages,
            index,
            recovery,
        })
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Get the value of (namespace, key), which must be of `expected` type
    pub fn get(&self, namespace: &str, key: &str, expected: EntryType) -> Result<Value> {
        let slot = self.index.lookup(namespace, key).ok_or(FlashError::KeyNotFound)?;
        if slot.entry_type != expected {
            return Err(FlashError::TypeMismatch {
                expected,
                found: slot.entry_type,
            });
        }

        let mut buffer = DecodeBuffer::new();
        self.read_entry(namespace, key, slot, &mut buffer).map(|entry| entry.value)
    }

    /// Set (namespace, key) to `value`, replacing any previous value
    ///
    /// The superseded record stays on its page until that page is reclaimed.
    pub fn set(&mut self, namespace: &str, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        validate_name(namespace)?;
        validate_name(key)?;

        if let Some(payload) = value.as_bytes() {
            let max = self.max_value_len();
            if payload.len() > max {
                return Err(FlashError::ValueTooLarge {
                    len: payload.len(),
                    max,
                });
            }
        }

        let entry_type = value.entry_type();
        let record = Record::Entry(Entry::new(namespace, key, value));
        let appended = self.append(&record)?;

        self.index.upsert(
            namespace,
            key,
            IndexSlot {
                location: appended.location,
                seq: appended.seq,
                entry_type,
            },
        );
        Ok(())
    }

    /// Delete (namespace, key) by appending a tombstone
    ///
    /// On a full device the key's own page may be reclaimed to make room.
    pub fn delete(&mut self, namespace: &str, key: &str) -> Result<()> {
        let slot = *self.index.lookup(namespace, key).ok_or(FlashError::KeyNotFound)?;
        let record = Record::Tombstone {
            namespace: namespace.to_string(),
            key: key.to_string(),
        };

        let appended = match self.pages.append(&record) {
            Err(FlashError::StoreFull) => {
                match self.delete_on_full_device(namespace, key, slot, &record)? {
                    Some(appended) => appended,
                    None => return Ok(()),
                }
            }
            result => result?,
        };

        self.index.record_tombstone(
            namespace,
            key,
            Tombstone {
                location: appended.location,
                seq: appended.seq,
            },
        );
        Ok(())
    }

    /// Slot usage summed over the data pages
    pub fn stats(&self) -> Stats {
        let usable_pages = self.pages.data_page_count().saturating_sub(1);
        let total = usable_pages * self.pages.slots_per_page();
        let used = self.index.used_slots();

        Stats {
            total,
            used,
            free: total.saturating_sub(used),
            namespace_count: self.index.namespace_count(),
        }
    }

    /// Iterate live entries matching the optional filters
    ///
    /// The iterator works on a snapshot of the index taken now.
    pub fn iter(&self, namespace: Option<&str>, entry_type: Option<EntryType>) -> EntryIter<'_, D> {
        EntryIter::new(&self.pages, self.index.snapshot(namespace, entry_type))
    }

    /// Iterate every live entry
    pub fn entries(&self) -> EntryIter<'_, D> {
        self.iter(None, None)
    }

    /// Reclaim every page whose live ratio is below the configured threshold
    pub fn compact(&mut self) -> Result<ReclaimStats> {
        let stats = self
            .pages
            .compact(&mut self.index, self.config.compaction_threshold)?;
        info!(pages = stats.pages_reclaimed, moved = stats.entries_moved, "compaction finished");
        Ok(stats)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Type of the live entry for (namespace, key), without device I/O
    pub fn entry_type(&self, namespace: &str, key: &str) -> Option<EntryType> {
        self.index.lookup(namespace, key).map(|slot| slot.entry_type)
    }

    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        self.index.lookup(namespace, key).is_some()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Largest STR/BLOB payload `set` accepts
    pub fn max_value_len(&self) -> usize {
        self.config.max_value_len.min(self.pages.max_payload_len())
    }

    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn index(&self) -> &StoreIndex {
        &self.index
    }

    pub fn pages(&self) -> &PageManager<D> {
        &self.pages
    }

    /// Close the store and hand the device back
    pub fn into_device(self) -> D {
        self.pages.into_device()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Append a record, reclaiming space once if the device is full
    fn append(&mut self, record: &Record) -> Result<crate::page::Appended> {
        match self.pages.append(record) {
            Err(FlashError::StoreFull) => {
                let span = codec::encoded_len(record)? / SLOT_SIZE;
                debug!(span, "no free page, reclaiming");
                self.pages
                    .make_room(&mut self.index, span, self.config.compaction_threshold)?;
                self.pages.append(record)
            }
            result => result,
        }
    }

    /// Reclaim space for the tombstone of (namespace, key)
    ///
    /// While reclaiming, the key's latest record stands in for its tombstone:
    /// the key no longer counts as live, so its page can be reclaimed, and
    /// reclaiming that page writes the tombstone if older records of the key
    /// exist elsewhere. Returns `None` when reclamation already settled the
    /// delete. On failure the key is restored while its record still exists.
    fn delete_on_full_device(
        &mut self,
        namespace: &str,
        key: &str,
        slot: IndexSlot,
        record: &Record,
    ) -> Result<Option<crate::page::Appended>> {
        let pending = Tombstone {
            location: slot.location,
            seq: slot.seq,
        };
        self.index.record_tombstone(namespace, key, pending);

        let span = codec::encoded_len(record)? / SLOT_SIZE;
        debug!(span, namespace, key, "no free page for tombstone, reclaiming");
        let reclaimed = self
            .pages
            .make_room(&mut self.index, span, self.config.compaction_threshold);

        if self.index.tombstone(namespace, key) != Some(&pending) {
            // The page holding the record was reclaimed
            return match reclaimed {
                Err(e) if self.index.tombstone(namespace, key).is_none() => {
                    // Its erase may not have completed; write the tombstone anyway
                    warn!(namespace, key, error = %e, "reclamation failed after dropping the record");
                    self.pages.append(record).map(Some)
                }
                _ => Ok(None),
            };
        }

        match reclaimed.and_then(|_| self.pages.append(record)) {
            Ok(appended) => Ok(Some(appended)),
            Err(e) => {
                self.index.drop_tombstone(namespace, key);
                self.index.upsert(namespace, key, slot);
                Err(e)
            }
        }
    }

    pub(crate) fn read_entry(
        &self,
        namespace: &str,
        key: &str,
        slot: &IndexSlot,
        buffer: &mut DecodeBuffer,
    ) -> Result<Entry> {
        read_indexed(&self.pages, namespace, key, slot, buffer)
    }
}

/// Decode the record an index slot points at and check it is the right one
pub(crate) fn read_indexed<D: BlockDevice>(
    pages: &PageManager<D>,
    namespace: &str,
    key: &str,
    slot: &IndexSlot,
    buffer: &mut DecodeBuffer,
) -> Result<Entry> {
    let decoded = pages.read_record(slot.location, buffer)?;
    let mismatch = |what: &str| {
        warn!(
            page = slot.location.page,
            offset = slot.location.offset,
            namespace,
            key,
            what,
            "indexed record does not match"
        );
        FlashError::CorruptEntry {
            page: slot.location.page,
            offset: slot.location.offset,
            source: crate::error::DecodeError::InvalidName,
        }
    };

    match decoded.record {
        Record::Entry(entry) if entry.namespace == namespace && entry.key == key => {
            if entry.value.entry_type() != slot.entry_type {
                return Err(mismatch("type"));
            }
            Ok(entry)
        }
        _ => Err(mismatch("name")),
    }
}
