//! File-backed block device
//!
//! Treats a regular file as a flash image: `page_count * page_size` bytes,
//! erased pages filled with `0xFF`. Used by the dump and CLI tools to work
//! on partition images pulled off a device.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{FlashError, Result};

use super::{check_append, check_range, BlockDevice, ERASED_BYTE};

/// Flash image stored in a file
pub struct FileDevice {
    file: File,
    path: PathBuf,
    page_count: u32,
    page_size: usize,
    /// Per-page end of the last non-erased byte, recomputed at open
    marks: Vec<usize>,
}

impl FileDevice {
    /// Create (or truncate) an image of `page_count` erased pages
    pub fn create(path: &Path, page_count: u32, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(FlashError::Format("page size must be non-zero".to_string()));
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let erased = vec![ERASED_BYTE; page_size];
        let mut writer = BufWriter::new(&file);
        for _ in 0..page_count {
            writer.write_all(&erased)?;
        }
        writer.flush()?;
        drop(writer);
        file.sync_all()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_count,
            page_size,
            marks: vec![0; page_count as usize],
        })
    }

    /// Open an existing image; its length must be a multiple of `page_size`
    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(FlashError::Format("page size must be non-zero".to_string()));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;

        if len % page_size != 0 {
            return Err(FlashError::Format(format!(
                "image size {} is not a multiple of page size {}",
                len, page_size
            )));
        }

        let page_count = (len / page_size) as u32;
        let mut device = Self {
            file,
            path: path.to_path_buf(),
            page_count,
            page_size,
            marks: vec![0; page_count as usize],
        };

        // Recover write marks: everything after the last programmed byte
        // is still erased and may be appended to
        for page in 0..page_count {
            let bytes = device.read_page(page)?;
            device.marks[page as usize] = bytes
                .iter()
                .rposition(|&b| b != ERASED_BYTE)
                .map(|pos| pos + 1)
                .unwrap_or(0);
        }

        Ok(device)
    }

    /// Path of the backing image
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn position(&self, page: u32, offset: usize) -> u64 {
        (page as u64) * (self.page_size as u64) + offset as u64
    }
}

impl BlockDevice for FileDevice {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read(&self, page: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_range(page, offset, buf.len(), self.page_count, self.page_size)?;

        let mut file = &self.file;
        file.seek(SeekFrom::Start(self.position(page, offset)))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&mut self, page: u32, offset: usize, data: &[u8]) -> Result<()> {
        check_range(page, offset, data.len(), self.page_count, self.page_size)?;
        check_append(page, offset, self.marks[page as usize])?;

        let pos = self.position(page, offset);
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(data)?;
        self.marks[page as usize] = offset + data.len();
        Ok(())
    }

    fn erase_page(&mut self, page: u32) -> Result<()> {
        check_range(page, 0, 0, self.page_count, self.page_size)?;

        let pos = self.position(page, 0);
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(&vec![ERASED_BYTE; self.page_size])?;
        self.marks[page as usize] = 0;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
