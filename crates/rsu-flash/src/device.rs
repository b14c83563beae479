//! The block device port used by the table stores and the slot facade
//!
//! Offsets are byte addresses in the exposed address space. Backends decide
//! how that space maps onto hardware; callers only see `read`, `write` and
//! `erase` over a flat range of `size()` bytes.

use crate::error::FlashError;

/// Value of every byte in an erased flash region
pub const ERASED_BYTE: u8 = 0xFF;

/// Chunk size used when an erase is simulated by writing fill data
pub const FILL_CHUNK: usize = 4096;

/// Random-access flash storage
///
/// Implementations must reject any access that does not fit inside
/// `[0, size())`. When `erase_size()` is non-zero, `erase` offsets and
/// lengths must be multiples of it. An erase unit of zero marks a plain
/// file: there is no alignment rule and erase writes [`ERASED_BYTE`] fill.
pub trait BlockDevice: std::fmt::Debug {
    /// Total addressable size in bytes
    fn size(&self) -> u64;

    /// Erase unit in bytes, or 0 when erase is simulated
    fn erase_size(&self) -> u32;

    /// Fill `buf` with the bytes stored at `offset`
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Store `data` at `offset`
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FlashError>;

    /// Return `[offset, offset + len)` to the erased state
    fn erase(&mut self, offset: u64, len: u64) -> Result<(), FlashError>;

    /// Read `len` bytes at `offset` into a new buffer
    fn read_vec(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, FlashError> {
        let mut buf = vec![0u8; len];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }
}

impl<D: BlockDevice + ?Sized> BlockDevice for Box<D> {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn erase_size(&self) -> u32 {
        (**self).erase_size()
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FlashError> {
        (**self).write(offset, data)
    }

    fn erase(&mut self, offset: u64, len: u64) -> Result<(), FlashError> {
        (**self).erase(offset, len)
    }
}

/// Check that `[offset, offset + len)` lies inside a device of `size` bytes
pub fn check_range(size: u64, offset: u64, len: u64) -> Result<(), FlashError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(FlashError::OutOfRange { offset, len, size }),
    }
}

/// Check erase alignment against an erase unit (0 disables the check)
pub fn check_erase_alignment(erase_size: u32, offset: u64, len: u64) -> Result<(), FlashError> {
    if erase_size == 0 {
        return Ok(());
    }

    let unit = u64::from(erase_size);
    if offset.is_multiple_of(unit) && len.is_multiple_of(unit) {
        Ok(())
    } else {
        Err(FlashError::Misaligned {
            offset,
            len,
            erase_size,
        })
    }
}

/// Simulate an erase by writing [`ERASED_BYTE`] fill in [`FILL_CHUNK`] pieces
pub fn fill_erased<F>(offset: u64, len: u64, mut write: F) -> Result<(), FlashError>
where
    F: FnMut(u64, &[u8]) -> Result<(), FlashError>,
{
    let fill = [ERASED_BYTE; FILL_CHUNK];
    let mut done = 0u64;

    while done < len {
        let chunk = usize::try_from(len.saturating_sub(done))
            .map_or(FILL_CHUNK, |rest| rest.min(FILL_CHUNK));
        let piece = fill.get(..chunk).unwrap_or(fill.as_slice());
        write(offset.saturating_add(done), piece)?;
        done = done.saturating_add(chunk as u64);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_range_accepts_exact_end() -> Result<(), FlashError> {
        check_range(0x1000, 0xF00, 0x100)?;
        check_range(0x1000, 0x1000, 0)?;
        Ok(())
    }

    #[test]
    fn test_check_range_rejects_overflow() {
        assert!(matches!(
            check_range(0x1000, 0xF00, 0x101),
            Err(FlashError::OutOfRange { .. })
        ));
        assert!(matches!(
            check_range(u64::MAX, u64::MAX, 2),
            Err(FlashError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_alignment() -> Result<(), FlashError> {
        check_erase_alignment(0, 3, 7)?;
        check_erase_alignment(0x1000, 0x2000, 0x1000)?;
        assert!(matches!(
            check_erase_alignment(0x1000, 0x800, 0x1000),
            Err(FlashError::Misaligned { .. })
        ));
        assert!(matches!(
            check_erase_alignment(0x1000, 0x1000, 0x10),
            Err(FlashError::Misaligned { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_fill_erased_chunks() -> Result<(), FlashError> {
        let mut calls = Vec::new();
        fill_erased(0x100, 9000, |off, data| {
            assert!(data.iter().all(|&b| b == ERASED_BYTE));
            calls.push((off, data.len()));
            Ok(())
        })?;
        assert_eq!(calls, vec![(0x100, 4096), (0x1100, 4096), (0x2100, 808)]);
        Ok(())
    }
}
