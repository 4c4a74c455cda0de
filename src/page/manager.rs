//! Page Manager
//!
//! Tracks page states and allocates space for new records.
//!
//! ## Responsibilities
//! - Scan every page at open (headers, records, write offsets)
//! - Keep exactly one page in WRITING state
//! - Append encoded records, sealing and activating pages as they fill
//! - Erase pages (interrupted erases are finished at open)
//!
//! A page whose header no longer checks out is only erased when none of its
//! records decode either. Otherwise it is kept as FULL so its entries stay
//! readable, and it is placed in activation order by its record sequence
//! numbers.
//!
//! One EMPTY page is always held back: ordinary appends never take the
//! last empty page, so compaction has somewhere to copy live entries.

use tracing::{debug, info, warn};

use crate::device::BlockDevice;
use crate::entry::codec::{self, is_erased, Decoded};
use crate::entry::{DecodeBuffer, EntryType, Record, HEADER_SIZE, MAX_PAYLOAD_LEN, SLOT_SIZE};
use crate::error::{DecodeError, FlashError, Result};
use crate::index::Location;

use super::{
    slots_per_page, HeaderStatus, MetaLog, MetaRecord, PageHeader, PageState, MIN_PAGES,
    PAGE_HEADER_SIZE,
};

/// State of one data page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub id: u32,
    pub state: PageState,
    /// Activation sequence (0 while EMPTY)
    pub seq: u64,
    /// Next free byte
    pub write_offset: usize,
}

impl PageInfo {
    fn empty(id: u32) -> Self {
        Self {
            id,
            state: PageState::Empty,
            seq: 0,
            write_offset: 0,
        }
    }
}

/// Where a record landed and the sequence number it was given
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    pub location: Location,
    pub seq: u64,
}

/// One record discovered while scanning a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanItem {
    Entry {
        namespace: String,
        key: String,
        entry_type: EntryType,
        location: Location,
        seq: u64,
    },
    Tombstone {
        namespace: String,
        key: String,
        location: Location,
        seq: u64,
    },
    Corrupt {
        page: u32,
        offset: u32,
        error: DecodeError,
    },
}

/// Records of one non-empty page, in offset order
#[derive(Debug, Clone)]
pub struct PageScan {
    pub page: u32,
    pub seq: u64,
    pub items: Vec<ScanItem>,
    /// Lowest record sequence number seen (0 if no record decoded)
    pub min_seq: u64,
    /// Highest record sequence number seen (seal records included)
    pub max_seq: u64,
    /// The page header was damaged; `seq` is derived from the records
    pub header_damaged: bool,
}

/// Everything `PageManager::open` learned from the device
#[derive(Debug, Clone, Default)]
pub struct OpenScan {
    /// Non-empty pages in ascending activation order
    pub pages: Vec<PageScan>,
    /// Pages found half-written or half-erased and erased again
    pub pages_erased: usize,
    /// Pages kept despite a damaged header because records still decode
    pub headers_damaged: usize,
}

/// Owns the device and the page table
pub struct PageManager<D: BlockDevice> {
    device: D,
    page_size: usize,
    /// Data pages; `pages[i].id == i + 1`
    pages: Vec<PageInfo>,
    active: Option<u32>,
    next_page_seq: u64,
    next_seq: u64,
    meta: MetaLog,
    sync_writes: bool,
}

impl<D: BlockDevice> PageManager<D> {
    /// Open the device and scan every data page
    pub fn open(mut device: D, sync_writes: bool) -> Result<(Self, OpenScan)> {
        let page_size = device.page_size();
        let page_count = device.page_count();

        if page_count < MIN_PAGES {
            return Err(FlashError::Format(format!(
                "device has {} pages, at least {} are required",
                page_count, MIN_PAGES
            )));
        }
        if page_size % SLOT_SIZE != 0 || page_size < PAGE_HEADER_SIZE + SLOT_SIZE {
            return Err(FlashError::Format(format!(
                "page size {} must be a multiple of {} and hold at least one entry",
                page_size, SLOT_SIZE
            )));
        }

        let meta = MetaLog::load(&mut device)?;

        let mut manager = Self {
            device,
            page_size,
            pages: (1..page_count).map(PageInfo::empty).collect(),
            active: None,
            next_page_seq: 1,
            next_seq: 1,
            meta,
            sync_writes,
        };

        let mut scan = OpenScan::default();
        for id in 1..page_count {
            if let Some(page_scan) = manager.scan_page(id, &mut scan.pages_erased)? {
                scan.pages.push(page_scan);
            }
        }
        manager.order_damaged_pages(&mut scan.pages);
        scan.headers_damaged = scan.pages.iter().filter(|p| p.header_damaged).count();
        scan.pages.sort_by_key(|p| (p.seq, p.min_seq));

        // Only the most recently activated unsealed page keeps writing
        let writing: Vec<(u32, u64)> = manager
            .pages
            .iter()
            .filter(|p| p.state == PageState::Writing)
            .map(|p| (p.id, p.seq))
            .collect();
        manager.active = writing.iter().max_by_key(|(_, seq)| *seq).map(|(id, _)| *id);
        for (id, _) in writing {
            if Some(id) != manager.active {
                debug!(page = id, "closing stale writing page");
                manager.info_mut(id).state = PageState::Full;
            }
        }

        manager.next_page_seq = manager.pages.iter().map(|p| p.seq).max().unwrap_or(0) + 1;
        manager.next_seq = scan.pages.iter().map(|p| p.max_seq).max().unwrap_or(0) + 1;

        if manager.meta.latest().active() != manager.active {
            debug!(
                recorded = ?manager.meta.latest().active(),
                scanned = ?manager.active,
                "metadata active page hint is stale"
            );
        }

        info!(
            data_pages = manager.pages.len(),
            active = ?manager.active,
            pages_erased = scan.pages_erased,
            headers_damaged = scan.headers_damaged,
            "page manager opened"
        );

        Ok((manager, scan))
    }

    // =========================================================================
    // Appending
    // =========================================================================

    /// Append `record` to the active page, activating a new page if needed
    ///
    /// Fails with `StoreFull` when only the reserve page is left; the caller
    /// is expected to reclaim space and retry.
    pub fn append(&mut self, record: &Record) -> Result<Appended> {
        let size = codec::encoded_len(record)?;
        let span = size / SLOT_SIZE;
        if span > self.slots_per_page() {
            return Err(FlashError::ValueTooLarge {
                len: size - HEADER_SIZE,
                max: self.max_payload_len(),
            });
        }

        let page = self.writable_page(span)?;
        self.append_to(page, record)
    }

    /// True if a record of `span` slots can be appended without reclaiming
    pub fn can_fit(&self, span: usize) -> bool {
        self.active.is_some_and(|id| self.free_slots(id) >= span) || self.empty_pages() >= 2
    }

    /// Close the active page (WRITING → FULL)
    pub fn seal_active(&mut self) -> Result<()> {
        let Some(id) = self.active else {
            return Ok(());
        };

        if self.free_slots(id) > 0 {
            self.append_to(id, &Record::Seal)?;
        }
        self.retire(id);
        debug!(page = id, "sealed page");
        Ok(())
    }

    /// Activate the lowest-numbered EMPTY page
    pub(crate) fn activate_next(&mut self) -> Result<u32> {
        let id = self
            .pages
            .iter()
            .find(|p| p.state == PageState::Empty)
            .map(|p| p.id)
            .ok_or(FlashError::StoreFull)?;
        self.activate(id)?;
        Ok(id)
    }

    /// Erase a data page (→ ERASING → EMPTY)
    pub fn erase(&mut self, id: u32) -> Result<()> {
        if self.active == Some(id) {
            self.active = None;
        }
        self.info_mut(id).state = PageState::Erasing;
        self.device.erase_page(id)?;
        *self.info_mut(id) = PageInfo::empty(id);
        debug!(page = id, "erased page");
        Ok(())
    }

    /// Retry erases that failed earlier
    pub fn finish_erases(&mut self) -> Result<()> {
        let stuck: Vec<u32> = self
            .pages
            .iter()
            .filter(|p| p.state == PageState::Erasing)
            .map(|p| p.id)
            .collect();
        for id in stuck {
            self.erase(id)?;
        }
        Ok(())
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Read and decode the record at `location` through `buffer`
    pub fn read_record(&self, location: Location, buffer: &mut DecodeBuffer) -> Result<Decoded> {
        let corrupt = |source| FlashError::CorruptEntry {
            page: location.page,
            offset: location.offset,
            source,
        };

        let capacity = buffer.capacity();
        let region = buffer.region(location.size as usize).ok_or_else(|| {
            corrupt(DecodeError::LengthOverflow {
                declared: location.size as usize,
                available: capacity,
            })
        })?;

        self.device.read(location.page, location.offset as usize, region)?;
        codec::decode(region).map_err(corrupt)
    }

    /// Read a whole page
    pub fn read_page(&self, id: u32) -> Result<Vec<u8>> {
        self.device.read_page(id)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Entry slots per data page
    pub fn slots_per_page(&self) -> usize {
        slots_per_page(self.page_size)
    }

    /// Largest STR/BLOB payload that fits in one page
    pub fn max_payload_len(&self) -> usize {
        (self.slots_per_page().saturating_sub(1) * SLOT_SIZE).min(MAX_PAYLOAD_LEN)
    }

    pub fn data_page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[PageInfo] {
        &self.pages
    }

    pub fn page(&self, id: u32) -> Option<&PageInfo> {
        id.checked_sub(1).and_then(|i| self.pages.get(i as usize))
    }

    pub fn active_page(&self) -> Option<u32> {
        self.active
    }

    pub fn empty_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.state == PageState::Empty).count()
    }

    /// Free slots left on page `id`
    pub fn free_slots(&self, id: u32) -> usize {
        self.page(id)
            .filter(|p| p.state == PageState::Writing)
            .map(|p| self.page_size.saturating_sub(p.write_offset) / SLOT_SIZE)
            .unwrap_or(0)
    }

    /// Sequence number the next record will get
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn meta(&self) -> &MetaRecord {
        self.meta.latest()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn info_mut(&mut self, id: u32) -> &mut PageInfo {
        &mut self.pages[(id - 1) as usize]
    }

    /// Page that can take `span` more slots
    fn writable_page(&mut self, span: usize) -> Result<u32> {
        if let Some(id) = self.active {
            if self.free_slots(id) >= span {
                return Ok(id);
            }
        }

        // The last empty page is the compaction reserve
        if self.empty_pages() < 2 {
            return Err(FlashError::StoreFull);
        }

        self.seal_active()?;
        self.activate_next()
    }

    fn append_to(&mut self, page: u32, record: &Record) -> Result<Appended> {
        let seq = self.next_seq;
        let bytes = codec::encode(record, seq)?;
        let offset = self.info_mut(page).write_offset;
        self.next_seq += 1;

        if let Err(e) = self.device.write_page(page, offset, &bytes) {
            warn!(page, offset, error = %e, "write failed, retiring page");
            self.retire(page);
            return Err(e);
        }

        let write_offset = offset + bytes.len();
        self.info_mut(page).write_offset = write_offset;
        if write_offset + SLOT_SIZE > self.page_size {
            self.retire(page);
        }

        if self.sync_writes {
            self.device.sync()?;
        }

        Ok(Appended {
            location: Location {
                page,
                offset: offset as u32,
                size: bytes.len() as u32,
            },
            seq,
        })
    }

    /// Stop writing to `id` (WRITING → FULL)
    fn retire(&mut self, id: u32) {
        let info = self.info_mut(id);
        if info.state == PageState::Writing {
            info.state = PageState::Full;
        }
        if self.active == Some(id) {
            self.active = None;
        }
    }

    fn activate(&mut self, id: u32) -> Result<()> {
        let header = PageHeader {
            page: id,
            seq: self.next_page_seq,
        };
        self.next_page_seq += 1;

        if let Err(e) = self.device.write_page(id, 0, &header.encode()) {
            warn!(page = id, error = %e, "page header write failed");
            self.info_mut(id).state = PageState::Erasing;
            return Err(e);
        }

        *self.info_mut(id) = PageInfo {
            id,
            state: PageState::Writing,
            seq: header.seq,
            write_offset: PAGE_HEADER_SIZE,
        };
        self.active = Some(id);
        self.meta.record_active(&mut self.device, Some(id))?;

        debug!(page = id, seq = header.seq, "activated page");
        Ok(())
    }

    /// Scan one data page; returns `None` for EMPTY pages
    fn scan_page(&mut self, id: u32, pages_erased: &mut usize) -> Result<Option<PageScan>> {
        let bytes = self.device.read_page(id)?;

        let header = match PageHeader::decode(&bytes) {
            HeaderStatus::Valid(header) if header.page == id => Some(header),
            HeaderStatus::Erased if is_erased(&bytes) => return Ok(None),
            status => {
                warn!(page = id, ?status, "damaged page header");
                None
            }
        };

        let mut items = Vec::new();
        let mut min_seq = 0;
        let mut max_seq = 0;
        let mut decoded_any = false;
        let mut sealed = false;

        let mut walk = RecordWalk::new(&bytes);
        for (offset, result) in walk.by_ref() {
            let decoded = match result {
                Ok(decoded) => decoded,
                Err(error) => {
                    items.push(ScanItem::Corrupt {
                        page: id,
                        offset: offset as u32,
                        error,
                    });
                    continue;
                }
            };

            decoded_any = true;
            min_seq = if min_seq == 0 { decoded.seq } else { min_seq.min(decoded.seq) };
            max_seq = max_seq.max(decoded.seq);
            let location = Location {
                page: id,
                offset: offset as u32,
                size: decoded.size() as u32,
            };

            match decoded.record {
                Record::Seal => sealed = true,
                Record::Entry(entry) => items.push(ScanItem::Entry {
                    entry_type: entry.value.entry_type(),
                    namespace: entry.namespace,
                    key: entry.key,
                    location,
                    seq: decoded.seq,
                }),
                Record::Tombstone { namespace, key } => items.push(ScanItem::Tombstone {
                    namespace,
                    key,
                    location,
                    seq: decoded.seq,
                }),
            }
        }
        let offset = walk.offset();

        let Some(header) = header else {
            if !decoded_any {
                warn!(page = id, corrupt = items.len(), "nothing readable on page, erasing");
                self.erase(id)?;
                *pages_erased += 1;
                return Ok(None);
            }

            warn!(page = id, records = items.len(), "keeping page with damaged header");
            *self.info_mut(id) = PageInfo {
                id,
                state: PageState::Full,
                seq: 0,
                write_offset: self.page_size,
            };
            return Ok(Some(PageScan {
                page: id,
                seq: 0,
                items,
                min_seq,
                max_seq,
                header_damaged: true,
            }));
        };

        let full = sealed || offset + SLOT_SIZE > self.page_size;
        *self.info_mut(id) = PageInfo {
            id,
            state: if full { PageState::Full } else { PageState::Writing },
            seq: header.seq,
            write_offset: if sealed { self.page_size } else { offset.min(self.page_size) },
        };

        Ok(Some(PageScan {
            page: id,
            seq: header.seq,
            items,
            min_seq,
            max_seq,
            header_damaged: false,
        }))
    }

    /// Give pages with damaged headers an activation sequence
    ///
    /// Records on a later page always carry higher sequence numbers, so such
    /// a page sorts right after the newest intact page whose records are
    /// older than its own.
    fn order_damaged_pages(&mut self, pages: &mut [PageScan]) {
        let intact: Vec<(u64, u64)> = pages
            .iter()
            .filter(|p| !p.header_damaged && p.min_seq != 0)
            .map(|p| (p.seq, p.min_seq))
            .collect();

        for page in pages.iter_mut().filter(|p| p.header_damaged) {
            let seq = intact
                .iter()
                .filter(|(_, first)| *first < page.min_seq)
                .map(|(seq, _)| *seq)
                .max()
                .unwrap_or(0);
            page.seq = seq;
            self.info_mut(page.page).seq = seq;
        }
    }
}

/// Walks the records of a page image in offset order
///
/// Yields `(offset, decode result)` for every record after the page header
/// and stops at the erased tail or after a seal record. Undecodable records
/// are skipped with `codec::skip_span`; erased slots with records after them
/// are stepped over.
pub(crate) struct RecordWalk<'a> {
    bytes: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> RecordWalk<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: PAGE_HEADER_SIZE,
            done: false,
        }
    }

    /// First byte past the last record visited
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for RecordWalk<'a> {
    type Item = (usize, std::result::Result<Decoded, DecodeError>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.offset + SLOT_SIZE > self.bytes.len() {
                return None;
            }

            let at = self.offset;
            let rest = &self.bytes[at..];
            if is_erased(&rest[..SLOT_SIZE]) {
                if is_erased(rest) {
                    self.done = true;
                    return None;
                }
                self.offset += SLOT_SIZE;
                continue;
            }

            return match codec::decode(rest) {
                Ok(decoded) => {
                    self.offset += decoded.size();
                    self.done = decoded.record == Record::Seal;
                    Some((at, Ok(decoded)))
                }
                Err(error) => {
                    self.offset += codec::skip_span(rest) * SLOT_SIZE;
                    Some((at, Err(error)))
                }
            };
        }
    }
}
