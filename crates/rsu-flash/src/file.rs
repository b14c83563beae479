//! Plain-file backend ("datafile" root)
//!
//! A regular file stands in for the flash chip. It has no erase unit, so
//! erase writes 0xFF fill over the requested range.

use crate::device::{BlockDevice, check_range, fill_erased};
use crate::error::FlashError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Flash image stored in a regular file
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileDevice {
    /// Open an existing image file for reading and writing
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FlashError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| FlashError::open(path, e))?;
        let size = file
            .metadata()
            .map_err(|e| FlashError::open(path, e))?
            .len();

        debug!(path = ?path, size, "opened datafile");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), FlashError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(data))
            .map_err(|e| FlashError::io("write", offset, e))
    }
}

impl BlockDevice for FileDevice {
    fn size(&self) -> u64 {
        self.size
    }

    fn erase_size(&self) -> u32 {
        0
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), FlashError> {
        check_range(self.size, offset, buf.len() as u64)?;
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(buf))
            .map_err(|e| FlashError::io("read", offset, e))
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FlashError> {
        check_range(self.size, offset, data.len() as u64)?;
        self.write_at(offset, data)
    }

    fn erase(&mut self, offset: u64, len: u64) -> Result<(), FlashError> {
        check_range(self.size, offset, len)?;
        fill_erased(offset, len, |off, fill| self.write_at(off, fill))
    }
}
