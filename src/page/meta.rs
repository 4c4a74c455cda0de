//! Metadata page
//!
//! Page 0 holds an append-only log of small `bincode` records describing
//! the device geometry and the active page. The last valid record wins.
//! When the page fills up it is erased and the log restarts at offset 0.
//!
//! The active pointer is a hint: data pages describe themselves, so an
//! interrupted metadata rewrite never loses entries.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::device::BlockDevice;
use crate::entry::codec::is_erased;
use crate::error::{FlashError, Result};

use super::META_PAGE;

/// Bytes reserved per metadata record (body + CRC32 + padding)
pub const META_RECORD_SIZE: usize = 32;

/// `active_page` value when no page is in WRITING state
pub const NO_ACTIVE_PAGE: u32 = u32::MAX;

/// Magic bytes identifying a formatted store
const META_MAGIC: [u8; 4] = *b"NVKV";

/// Current metadata format version
const META_VERSION: u16 = 1;

/// Store-wide metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub magic: [u8; 4],
    pub version: u16,
    pub page_count: u32,
    pub page_size: u32,
    pub active_page: u32,
    /// Bumped on every rewrite
    pub generation: u64,
}

impl MetaRecord {
    fn fresh(page_count: u32, page_size: usize) -> Self {
        Self {
            magic: META_MAGIC,
            version: META_VERSION,
            page_count,
            page_size: page_size as u32,
            active_page: NO_ACTIVE_PAGE,
            generation: 1,
        }
    }

    /// Active page, if any
    pub fn active(&self) -> Option<u32> {
        (self.active_page != NO_ACTIVE_PAGE).then_some(self.active_page)
    }

    fn encode(&self) -> Result<[u8; META_RECORD_SIZE]> {
        let body = bincode::serialize(self)
            .map_err(|e| FlashError::Serialization(format!("metadata record: {}", e)))?;
        if body.len() + 4 > META_RECORD_SIZE {
            return Err(FlashError::Serialization(format!(
                "metadata record is {} bytes, slot holds {}",
                body.len(),
                META_RECORD_SIZE - 4
            )));
        }

        let mut out = [0u8; META_RECORD_SIZE];
        out[..body.len()].copy_from_slice(&body);
        out[body.len()..body.len() + 4].copy_from_slice(&crc32fast::hash(&body).to_le_bytes());
        Ok(out)
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let record: MetaRecord = bincode::deserialize(bytes).ok()?;
        let body_len = bincode::serialized_size(&record).ok()? as usize;
        let crc = bytes.get(body_len..body_len + 4)?;
        let stored = u32::from_le_bytes(crc.try_into().ok()?);

        (stored == crc32fast::hash(&bytes[..body_len]) && record.magic == META_MAGIC)
            .then_some(record)
    }
}

/// In-memory view of the metadata log
#[derive(Debug, Clone)]
pub struct MetaLog {
    latest: MetaRecord,
    next_offset: usize,
}

impl MetaLog {
    /// Load the log from page 0, initializing or repairing it if needed
    ///
    /// Fails with `Format` when the recorded geometry does not match the
    /// device.
    pub fn load<D: BlockDevice>(device: &mut D) -> Result<Self> {
        let page_size = device.page_size();
        let page_count = device.page_count();
        let bytes = device.read_page(META_PAGE)?;

        let mut latest = None;
        let mut damaged = 0usize;
        let mut offset = 0;
        while offset + META_RECORD_SIZE <= bytes.len() {
            let slot = &bytes[offset..offset + META_RECORD_SIZE];
            if is_erased(slot) {
                break;
            }
            match MetaRecord::decode(slot) {
                Some(record) => latest = Some(record),
                None => damaged += 1,
            }
            offset += META_RECORD_SIZE;
        }

        let Some(latest) = latest else {
            if offset > 0 {
                warn!(damaged, "metadata page holds no valid record, rewriting");
                device.erase_page(META_PAGE)?;
            } else {
                debug!(page_count, page_size, "initializing metadata page");
            }

            let mut log = Self {
                latest: MetaRecord::fresh(page_count, page_size),
                next_offset: 0,
            };
            log.write(device, log.latest)?;
            return Ok(log);
        };

        if damaged > 0 {
            warn!(damaged, "skipped damaged metadata records");
        }

        if latest.page_count != page_count || latest.page_size as usize != page_size {
            return Err(FlashError::Format(format!(
                "store was formatted for {} pages of {} bytes, device has {} pages of {} bytes",
                latest.page_count, latest.page_size, page_count, page_size
            )));
        }

        if latest.version != META_VERSION {
            return Err(FlashError::Format(format!(
                "unsupported metadata version {}",
                latest.version
            )));
        }

        Ok(Self {
            latest,
            next_offset: offset,
        })
    }

    pub fn latest(&self) -> &MetaRecord {
        &self.latest
    }

    /// Persist a new active page pointer (no-op if unchanged)
    pub fn record_active<D: BlockDevice>(&mut self, device: &mut D, active: Option<u32>) -> Result<()> {
        let active_page = active.unwrap_or(NO_ACTIVE_PAGE);
        if self.latest.active_page == active_page {
            return Ok(());
        }

        let record = MetaRecord {
            active_page,
            generation: self.latest.generation + 1,
            ..self.latest
        };
        self.write(device, record)
    }

    fn write<D: BlockDevice>(&mut self, device: &mut D, record: MetaRecord) -> Result<()> {
        if self.next_offset + META_RECORD_SIZE > device.page_size() {
            debug!("metadata page full, restarting log");
            device.erase_page(META_PAGE)?;
            self.next_offset = 0;
        }

        device.write_page(META_PAGE, self.next_offset, &record.encode()?)?;
        self.next_offset += META_RECORD_SIZE;
        self.latest = record;
        Ok(())
    }
}
