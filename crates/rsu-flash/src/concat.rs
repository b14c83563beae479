//! Several flash devices exposed as one address space
//!
//! Device `i` occupies `[start_i, start_i + size_i)` where `start_i` is the
//! sum of the sizes of the devices before it. Every request is cut into
//! [`Extent`]s at device boundaries before dispatch, so a read, write or
//! erase crossing from one chip into the next behaves like one access.

use crate::device::{BlockDevice, check_erase_alignment, check_range};
use crate::error::FlashError;
use tracing::trace;

/// One per-device piece of a split request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// Index of the member device
    pub index: usize,
    /// Offset within the member device
    pub local_offset: u64,
    /// Length of this piece in bytes
    pub len: u64,
    /// Offset of this piece within the caller's buffer (or erase range)
    pub buf_offset: u64,
}

/// Concatenation of member devices sharing one erase unit
#[derive(Debug)]
pub struct ConcatDevice {
    devices: Vec<Box<dyn BlockDevice>>,
    starts: Vec<u64>,
    size: u64,
    erase_size: u32,
}

impl ConcatDevice {
    /// Concatenate `devices` in order
    pub fn new(devices: Vec<Box<dyn BlockDevice>>) -> Result<Self, FlashError> {
        let expected = devices
            .first()
            .map(|dev| dev.erase_size())
            .ok_or(FlashError::NoDevices)?;

        let mut starts = Vec::with_capacity(devices.len());
        let mut size = 0u64;
        for (index, dev) in devices.iter().enumerate() {
            if dev.erase_size() != expected {
                return Err(FlashError::EraseSizeMismatch {
                    index,
                    expected,
                    found: dev.erase_size(),
                });
            }
            starts.push(size);
            size = size.saturating_add(dev.size());
        }

        Ok(Self {
            devices,
            starts,
            size,
            erase_size: expected,
        })
    }

    /// Number of member devices
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Split `[offset, offset + len)` into per-device extents
    ///
    /// The extents are in address order, never empty, and tile the request
    /// exactly: their lengths sum to `len` and each `buf_offset` equals the
    /// sum of the lengths before it.
    pub fn split(&self, offset: u64, len: u64) -> Result<Vec<Extent>, FlashError> {
        check_range(self.size, offset, len)?;

        let end = offset.saturating_add(len);
        let mut pos = offset;
        let mut extents = Vec::new();

        for (index, (dev, &start)) in self.devices.iter().zip(&self.starts).enumerate() {
            if pos >= end {
                break;
            }
            let dev_end = start.saturating_add(dev.size());
            if pos >= dev_end {
                continue;
            }

            let piece_end = end.min(dev_end);
            extents.push(Extent {
                index,
                local_offset: pos.saturating_sub(start),
                len: piece_end.saturating_sub(pos),
                buf_offset: pos.saturating_sub(offset),
            });
            pos = piece_end;
        }

        Ok(extents)
    }

    fn member(&mut self, index: usize) -> Result<&mut Box<dyn BlockDevice>, FlashError> {
        let size = self.size;
        self.devices.get_mut(index).ok_or(FlashError::OutOfRange {
            offset: 0,
            len: 0,
            size,
        })
    }
}

fn buf_range(extent: &Extent) -> std::ops::Range<usize> {
    let start = usize::try_from(extent.buf_offset).unwrap_or(usize::MAX);
    let len = usize::try_from(extent.len).unwrap_or(usize::MAX);
    start..start.saturating_add(len)
}

impl BlockDevice for ConcatDevice {
    fn size(&self) -> u64 {
        self.size
    }

    fn erase_size(&self) -> u32 {
        self.erase_size
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), FlashError> {
        let len = buf.len() as u64;
        for extent in self.split(offset, len)? {
            trace!(?extent, "concat read");
            let size = self.size;
            let piece = buf
                .get_mut(buf_range(&extent))
                .ok_or(FlashError::OutOfRange { offset, len, size })?;
            self.member(extent.index)?.read(extent.local_offset, piece)?;
        }
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FlashError> {
        let len = data.len() as u64;
        for extent in self.split(offset, len)? {
            trace!(?extent, "concat write");
            let size = self.size;
            let piece = data
                .get(buf_range(&extent))
                .ok_or(FlashError::OutOfRange { offset, len, size })?;
            self.member(extent.index)?
                .write(extent.local_offset, piece)?;
        }
        Ok(())
    }

    fn erase(&mut self, offset: u64, len: u64) -> Result<(), FlashError> {
        check_erase_alignment(self.erase_size, offset, len)?;
        for extent in self.split(offset, len)? {
            trace!(?extent, "concat erase");
            self.member(extent.index)?
                .erase(extent.local_offset, extent.len)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDevice;

    fn concat(sizes: &[usize]) -> Result<ConcatDevice, FlashError> {
        let devices = sizes
            .iter()
            .map(|&size| Box::new(MemoryDevice::new(size, 0)) as Box<dyn BlockDevice>)
            .collect();
        ConcatDevice::new(devices)
    }

    #[test]
    fn test_split_within_first_device() -> Result<(), FlashError> {
        let dev = concat(&[0x100, 0x100])?;
        assert_eq!(
            dev.split(0x10, 0x20)?,
            vec![Extent {
                index: 0,
                local_offset: 0x10,
                len: 0x20,
                buf_offset: 0
            }]
        );
        Ok(())
    }

    #[test]
    fn test_split_ending_exactly_at_boundary() -> Result<(), FlashError> {
        let dev = concat(&[0x100, 0x100])?;
        let extents = dev.split(0xF0, 0x10)?;
        assert_eq!(extents.len(), 1);
        assert_eq!(extents.first().map(|e| (e.index, e.local_offset)), Some((0, 0xF0)));
        Ok(())
    }

    #[test]
    fn test_split_starting_exactly_at_boundary() -> Result<(), FlashError> {
        let dev = concat(&[0x100, 0x100])?;
        assert_eq!(
            dev.split(0x100, 0x10)?,
            vec![Extent {
                index: 1,
                local_offset: 0,
                len: 0x10,
                buf_offset: 0
            }]
        );
        Ok(())
    }

    #[test]
    fn test_split_crossing_three_devices() -> Result<(), FlashError> {
        let dev = concat(&[0x100, 0x80, 0x100])?;
        assert_eq!(
            dev.split(0xF0, 0xA0)?,
            vec![
                Extent {
                    index: 0,
                    local_offset: 0xF0,
                    len: 0x10,
                    buf_offset: 0
                },
                Extent {
                    index: 1,
                    local_offset: 0,
                    len: 0x80,
                    buf_offset: 0x10
                },
                Extent {
                    index: 2,
                    local_offset: 0,
                    len: 0x10,
                    buf_offset: 0x90
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_split_skips_empty_member() -> Result<(), FlashError> {
        let dev = concat(&[0x10, 0, 0x10])?;
        let extents = dev.split(0x8, 0x10)?;
        let indexes: Vec<usize> = extents.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![0, 2]);
        Ok(())
    }

    #[test]
    fn test_split_rejects_past_end() -> Result<(), FlashError> {
        let dev = concat(&[0x100, 0x100])?;
        assert!(matches!(
            dev.split(0x1F0, 0x11),
            Err(FlashError::OutOfRange { .. })
        ));
        assert!(dev.split(0x200, 0)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_cross_boundary_write_read() -> Result<(), FlashError> {
        let mut dev = concat(&[8, 8])?;
        dev.write(6, &[1, 2, 3, 4])?;
        assert_eq!(dev.read_vec(4, 8)?, vec![0xFF, 0xFF, 1, 2, 3, 4, 0xFF, 0xFF]);
        dev.erase(7, 2)?;
        assert_eq!(dev.read_vec(6, 4)?, vec![1, 0xFF, 0xFF, 4]);
        Ok(())
    }

    #[test]
    fn test_erase_unit_mismatch() {
        let devices: Vec<Box<dyn BlockDevice>> = vec![
            Box::new(MemoryDevice::new(0x1000, 0x1000)),
            Box::new(MemoryDevice::new(0x1000, 0x800)),
        ];
        assert!(matches!(
            ConcatDevice::new(devices),
            Err(FlashError::EraseSizeMismatch { index: 1, .. })
        ));
        assert!(matches!(
            ConcatDevice::new(Vec::new()),
            Err(FlashError::NoDevices)
        ));
    }
}
