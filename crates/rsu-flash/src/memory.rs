//! RAM-backed flash for tests and host-side tooling

use crate::device::{BlockDevice, ERASED_BYTE, check_erase_alignment, check_range};
use crate::error::FlashError;
use std::ops::Range;
use tracing::trace;

/// Counters of device accesses since creation or the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    /// Number of `read` calls
    pub reads: u64,
    /// Number of `write` calls
    pub writes: u64,
    /// Number of `erase` calls
    pub erases: u64,
}

/// Flash image held in memory
///
/// Writes overwrite bytes in place and erase restores [`ERASED_BYTE`].
/// An optional fault window makes every write touching it fail, which lets
/// tests interrupt a multi-step update at a chosen address.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    data: Vec<u8>,
    erase_size: u32,
    stats: IoStats,
    write_fault: Option<Range<u64>>,
}

impl MemoryDevice {
    /// Create an erased device of `size` bytes
    pub fn new(size: usize, erase_size: u32) -> Self {
        Self::from_bytes(vec![ERASED_BYTE; size], erase_size)
    }

    /// Wrap an existing flash image
    pub fn from_bytes(data: Vec<u8>, erase_size: u32) -> Self {
        Self {
            data,
            erase_size,
            stats: IoStats::default(),
            write_fault: None,
        }
    }

    /// Raw contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw contents, bypassing counters and fault injection
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the device and return its contents
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Access counters
    pub fn stats(&self) -> IoStats {
        self.stats
    }

    /// Zero the access counters
    pub fn reset_stats(&mut self) {
        self.stats = IoStats::default();
    }

    /// Fail every write that overlaps `window`; `None` clears the fault
    pub fn set_write_fault(&mut self, window: Option<Range<u64>>) {
        self.write_fault = window;
    }

    fn span(&self, offset: u64, len: usize) -> Result<Range<usize>, FlashError> {
        let len64 = len as u64;
        check_range(self.size(), offset, len64)?;
        let start = usize::try_from(offset)
            .ok()
            .ok_or(FlashError::OutOfRange {
                offset,
                len: len64,
                size: self.size(),
            })?;
        Ok(start..start.saturating_add(len))
    }
}

impl BlockDevice for MemoryDevice {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn erase_size(&self) -> u32 {
        self.erase_size
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), FlashError> {
        let span = self.span(offset, buf.len())?;
        let src = self.data.get(span).ok_or(FlashError::OutOfRange {
            offset,
            len: buf.len() as u64,
            size: self.size(),
        })?;
        buf.copy_from_slice(src);
        self.stats.reads = self.stats.reads.saturating_add(1);
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FlashError> {
        let span = self.span(offset, data.len())?;
        if let Some(window) = &self.write_fault {
            let end = offset.saturating_add(data.len() as u64);
            if offset < window.end && end > window.start {
                return Err(FlashError::InjectedFault { offset });
            }
        }

        let size = self.size();
        let dst = self.data.get_mut(span).ok_or(FlashError::OutOfRange {
            offset,
            len: data.len() as u64,
            size,
        })?;
        dst.copy_from_slice(data);
        self.stats.writes = self.stats.writes.saturating_add(1);
        trace!(offset, len = data.len(), "memory write");
        Ok(())
    }

    fn erase(&mut self, offset: u64, len: u64) -> Result<(), FlashError> {
        check_erase_alignment(self.erase_size, offset, len)?;
        let len_usize = usize::try_from(len).ok().ok_or(FlashError::OutOfRange {
            offset,
            len,
            size: self.size(),
        })?;
        let span = self.span(offset, len_usize)?;
        let size = self.size();
        let dst = self
            .data
            .get_mut(span)
            .ok_or(FlashError::OutOfRange { offset, len, size })?;
        dst.fill(ERASED_BYTE);
        self.stats.erases = self.stats.erases.saturating_add(1);
        trace!(offset, len, "memory erase");
        Ok(())
    }
}
