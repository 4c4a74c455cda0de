//! Block Device Module
//!
//! Abstract read/write/erase primitive over fixed-size pages.
//!
//! ## Contract
//! - Pages are independently erasable; erasing resets every byte to
//!   [`ERASED_BYTE`].
//! - Writes within a page are append-only: a write must start at or after
//!   the end of the last write to that page (the write mark) and must stay
//!   inside the page. Anything else fails with a device error.
//! - Operations are synchronous; nothing is atomic across pages.
//!
//! ## Adapters
//! - [`MemDevice`]: in-memory fake with a shared handle, so the same
//!   "physical" device can be reopened and corrupted by tests.
//! - [`FileDevice`]: a flash image stored in a regular file.

mod file;
mod memory;

pub use file::FileDevice;
pub use memory::{Fault, MemDevice};

use crate::error::{FlashError, Result};

/// Value of every byte on a freshly erased page
pub const ERASED_BYTE: u8 = 0xFF;

/// Page-granular storage device
pub trait BlockDevice {
    /// Number of pages on the device
    fn page_count(&self) -> u32;

    /// Size of every page in bytes
    fn page_size(&self) -> usize;

    /// Read `buf.len()` bytes from `page` starting at `offset`
    fn read(&self, page: u32, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Read a whole page
    fn read_page(&self, page: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.page_size()];
        self.read(page, 0, &mut buf)?;
        Ok(buf)
    }

    /// Append `data` to `page` at `offset` (must not overlap written bytes)
    fn write_page(&mut self, page: u32, offset: usize, data: &[u8]) -> Result<()>;

    /// Reset the entire page to the erased pattern
    fn erase_page(&mut self, page: u32) -> Result<()>;

    /// Flush pending writes to persistent media
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Lets callers lend a device to a store and keep ownership of it
impl<D: BlockDevice + ?Sized> BlockDevice for &mut D {
    fn page_count(&self) -> u32 {
        (**self).page_count()
    }

    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn read(&self, page: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        (**self).read(page, offset, buf)
    }

    fn read_page(&self, page: u32) -> Result<Vec<u8>> {
        (**self).read_page(page)
    }

    fn write_page(&mut self, page: u32, offset: usize, data: &[u8]) -> Result<()> {
        (**self).write_page(page, offset, data)
    }

    fn erase_page(&mut self, page: u32) -> Result<()> {
        (**self).erase_page(page)
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }
}

/// Bounds check shared by the adapters
pub(crate) fn check_range(
    page: u32,
    offset: usize,
    len: usize,
    page_count: u32,
    page_size: usize,
) -> Result<()> {
    if page >= page_count {
        return Err(FlashError::device(
            page,
            format!("page out of range (device has {} pages)", page_count),
        ));
    }

    match offset.checked_add(len) {
        Some(end) if end <= page_size => Ok(()),
        _ => Err(FlashError::device(
            page,
            format!(
                "range {}+{} exceeds page size {}",
                offset, len, page_size
            ),
        )),
    }
}

/// Check an append against the page's write mark
pub(crate) fn check_append(page: u32, offset: usize, mark: usize) -> Result<()> {
    if offset < mark {
        return Err(FlashError::device(
            page,
            format!(
                "write at offset {} overlaps written bytes (write mark {})",
                offset, mark
            ),
        ));
    }
    Ok(())
}
