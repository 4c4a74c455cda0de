//! Page Module
//!
//! Page layout, page states, and the manager that allocates space.
//!
//! ## Device Layout
//! ```text
//! ┌───────────┬───────────┬───────────┬─────┬───────────┐
//! │  Page 0   │  Page 1   │  Page 2   │ ... │  Page N-1 │
//! │ metadata  │   data    │   data    │     │   data    │
//! └───────────┴───────────┴───────────┴─────┴───────────┘
//! ```
//!
//! ## Data Page
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header slot: Magic "NVPG" | Version | Page id | Seq |CRC│
//! ├─────────────────────────────────────────────────────────┤
//! │ Entry slots, appended in sequence order                 │
//! │ ... optional Seal record ...                            │
//! │ Erased tail (0xFF)                                      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## States
//! EMPTY → WRITING (header written) → FULL (sealed or out of slots)
//! WRITING/FULL → ERASING → EMPTY

mod manager;
mod meta;
mod reclaim;

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub use manager::{Appended, OpenScan, PageInfo, PageManager, PageScan, ScanItem};
pub use meta::{MetaLog, MetaRecord, META_RECORD_SIZE, NO_ACTIVE_PAGE};
pub use reclaim::{Candidate, ReclaimStats};

use crate::entry::codec::is_erased;
use crate::entry::SLOT_SIZE;

/// Page holding the metadata log
pub const META_PAGE: u32 = 0;

/// Metadata page plus two data pages (one of them the compaction reserve)
pub const MIN_PAGES: u32 = 3;

/// Magic bytes identifying an initialized data page
pub(crate) const PAGE_MAGIC: &[u8; 4] = b"NVPG";

/// Current page format version
pub(crate) const PAGE_FORMAT_VERSION: u16 = 1;

/// The page header occupies the first slot
pub const PAGE_HEADER_SIZE: usize = SLOT_SIZE;

/// Lifecycle state of a data page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Empty,
    Writing,
    Full,
    Erasing,
}

/// Header written when a page becomes the active page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page: u32,
    /// Activation order; later pages hold later entries
    pub seq: u64,
}

/// Result of inspecting a page's first slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderStatus {
    Erased,
    Valid(PageHeader),
    Invalid(String),
}

impl PageHeader {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PAGE_HEADER_SIZE);
        buf.put_slice(PAGE_MAGIC);
        buf.put_u16_le(PAGE_FORMAT_VERSION);
        buf.put_u16_le(0);
        buf.put_u32_le(self.page);
        buf.put_u64_le(self.seq);
        buf.put_bytes(0, PAGE_HEADER_SIZE - 4 - buf.len());

        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> HeaderStatus {
        if bytes.len() < PAGE_HEADER_SIZE {
            return HeaderStatus::Invalid("short header".to_string());
        }

        let header = &bytes[..PAGE_HEADER_SIZE];
        if is_erased(header) {
            return HeaderStatus::Erased;
        }

        let body = &header[..PAGE_HEADER_SIZE - 4];
        let stored = u32::from_le_bytes([header[60], header[61], header[62], header[63]]);
        if crc32fast::hash(body) != stored {
            return HeaderStatus::Invalid("header checksum mismatch".to_string());
        }

        if &body[..4] != PAGE_MAGIC {
            return HeaderStatus::Invalid("bad page magic".to_string());
        }

        let mut fields = &body[4..];
        let version = fields.get_u16_le();
        if version != PAGE_FORMAT_VERSION {
            return HeaderStatus::Invalid(format!("unsupported page version {}", version));
        }
        fields.advance(2);
        let page = fields.get_u32_le();
        let seq = fields.get_u64_le();

        HeaderStatus::Valid(PageHeader { page, seq })
    }
}

/// Entry slots per data page (the header slot excluded)
pub fn slots_per_page(page_size: usize) -> usize {
    (page_size / SLOT_SIZE).saturating_sub(1)
}
