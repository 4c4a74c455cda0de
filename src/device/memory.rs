//! In-memory block device
//!
//! Shared-handle RAM device used by tests, benchmarks and host tooling.
//! Cloning a `MemDevice` yields another handle onto the same pages, which
//! is how tests simulate a restart: drop the store, keep a clone, reopen.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{FlashError, Result};

use super::{check_append, check_range, BlockDevice, ERASED_BYTE};

/// One-shot fault to inject into a later matching operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Read,
    Write,
    Erase,
}

/// RAM-backed block device with a shared handle
#[derive(Clone)]
pub struct MemDevice {
    shared: Arc<Mutex<MemPages>>,
    page_count: u32,
    page_size: usize,
}

struct MemPages {
    /// page_count * page_size bytes
    bytes: Vec<u8>,
    /// Per-page end of the last write
    marks: Vec<usize>,
    /// Per-page erase counters
    erases: Vec<u32>,
    /// Pending one-shot faults with the matching operations to let through first
    faults: Vec<(Fault, usize)>,
}

impl MemDevice {
    /// Create an erased device with `page_count` pages of `page_size` bytes
    pub fn new(page_count: u32, page_size: usize) -> Self {
        let pages = MemPages {
            bytes: vec![ERASED_BYTE; page_count as usize * page_size],
            marks: vec![0; page_count as usize],
            erases: vec![0; page_count as usize],
            faults: Vec::new(),
        };

        Self {
            shared: Arc::new(Mutex::new(pages)),
            page_count,
            page_size,
        }
    }

    /// Make the next operation of the given kind fail with a device error
    pub fn fail_next(&self, fault: Fault) {
        self.fail_nth(fault, 1);
    }

    /// Make the `n`th operation of the given kind from now fail (`n >= 1`)
    pub fn fail_nth(&self, fault: Fault, n: usize) {
        self.shared.lock().faults.push((fault, n.saturating_sub(1)));
    }

    /// Drop every fault that has not fired yet
    pub fn clear_faults(&self) {
        self.shared.lock().faults.clear();
    }

    /// XOR a byte in place, bypassing the append-only rule (simulated bit rot)
    pub fn corrupt(&self, page: u32, offset: usize, mask: u8) {
        let mut pages = self.shared.lock();
        let pos = page as usize * self.page_size + offset;
        pages.bytes[pos] ^= mask;
    }

    /// End of the last write to `page`
    pub fn write_mark(&self, page: u32) -> usize {
        self.shared.lock().marks[page as usize]
    }

    /// Number of times `page` has been erased
    pub fn erase_count(&self, page: u32) -> u32 {
        self.shared.lock().erases[page as usize]
    }

    fn range(&self, page: u32, offset: usize, len: usize) -> std::ops::Range<usize> {
        let start = page as usize * self.page_size + offset;
        start..start + len
    }
}

impl MemPages {
    fn take_fault(&mut self, fault: Fault) -> bool {
        let Some(pos) = self.faults.iter().position(|(f, _)| *f == fault) else {
            return false;
        };
        if self.faults[pos].1 == 0 {
            self.faults.remove(pos);
            true
        } else {
            self.faults[pos].1 -= 1;
            false
        }
    }
}

impl BlockDevice for MemDevice {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read(&self, page: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_range(page, offset, buf.len(), self.page_count, self.page_size)?;

        let mut pages = self.shared.lock();
        if pages.take_fault(Fault::Read) {
            return Err(FlashError::device(page, "injected read fault"));
        }

        buf.copy_from_slice(&pages.bytes[self.range(page, offset, buf.len())]);
        Ok(())
    }

    fn write_page(&mut self, page: u32, offset: usize, data: &[u8]) -> Result<()> {
        check_range(page, offset, data.len(), self.page_count, self.page_size)?;

        let mut pages = self.shared.lock();
        check_append(page, offset, pages.marks[page as usize])?;
        if pages.take_fault(Fault::Write) {
            return Err(FlashError::device(page, "injected write fault"));
        }

        let range = self.range(page, offset, data.len());
        pages.bytes[range].copy_from_slice(data);
        pages.marks[page as usize] = offset + data.len();
        Ok(())
    }

    fn erase_page(&mut self, page: u32) -> Result<()> {
        check_range(page, 0, 0, self.page_count, self.page_size)?;

        let mut pages = self.shared.lock();
        if pages.take_fault(Fault::Erase) {
            return Err(FlashError::device(page, "injected erase fault"));
        }

        let range = self.range(page, 0, self.page_size);
        pages.bytes[range].fill(ERASED_BYTE);
        pages.marks[page as usize] = 0;
        pages.erases[page as usize] += 1;
        Ok(())
    }
}
