//! Slot façade: user-visible partitions with their boot priority
//!
//! A slot is any partition that is flagged neither reserved nor read-only
//! and does not carry a reserved name. Slot `n` is the `n`th such partition
//! in table order, so slot numbers shift when partitions are created or
//! deleted.
//!
//! Programming streams the image through [`rsu_image::ImageState`] one
//! 4 KiB block at a time, writes each block, reads it back and compares.
//! Only when the whole image is on flash does the slot enter the boot
//! order. The `_raw` variants skip both the relocation engine and the
//! priority update.

use crate::error::{RsuError, RsuResult};
use crate::session::{Inner, Session};
pub use crate::spt::{RESERVED_NAMES, is_reserved_name};
use crate::spt::{Partition, PartitionTable};
use rsu_flash::ERASED_BYTE;
use rsu_image::{BLOCK_SIZE, ImageState, SlotBounds};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Whether `part` is visible as a slot
pub fn is_slot(part: &Partition) -> bool {
    !part.is_reserved() && !part.is_read_only() && !is_reserved_name(&part.name)
}

/// Table index and record of slot `slot`
pub fn slot_partition(table: &PartitionTable, slot: usize) -> Option<(usize, Partition)> {
    table
        .iter()
        .enumerate()
        .filter(|(_, part)| is_slot(part))
        .nth(slot)
}

/// Number of slots in `table`
pub fn slot_count(table: &PartitionTable) -> usize {
    table.iter().filter(is_slot).count()
}

/// Public description of one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    /// Partition name
    pub name: String,
    /// Absolute flash offset
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
    /// Boot priority, 0 when erased
    pub priority: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payload {
    /// Relocate through the image engine and join the boot order
    Image,
    /// Write and verify the bytes as given
    Raw,
}

/// Fill `buf` from `source` until full or end of stream
fn fill_block(source: &mut dyn Read, buf: &mut [u8]) -> RsuResult<usize> {
    let mut filled = 0;
    while let Some(rest) = buf.get_mut(filled..).filter(|rest| !rest.is_empty()) {
        match source.read(rest) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(RsuError::SourceRead(e)),
        }
    }
    Ok(filled)
}

fn first_difference(expected: &[u8], actual: &[u8]) -> Option<usize> {
    expected.iter().zip(actual).position(|(a, b)| a != b)
}

fn open_source(path: &Path) -> RsuResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| RsuError::io(path, e))
}

impl Inner {
    fn slot(&self, slot: usize) -> RsuResult<(usize, Partition)> {
        slot_partition(self.table()?, slot).ok_or(RsuError::UnknownSlot(slot))
    }

    fn check_writable(&self, slot: usize) -> RsuResult<()> {
        if self.config.is_write_protected(slot) {
            warn!(slot, "slot is write-protected");
            return Err(RsuError::WriteProtected(slot));
        }
        Ok(())
    }

    fn program(&mut self, slot: usize, source: &mut dyn Read, payload: Payload) -> RsuResult<()> {
        self.check_writable(slot)?;
        let (_, part) = self.slot(slot)?;
        if self.priority_of(&part)? > 0 {
            return Err(RsuError::AlreadyInUse(slot));
        }

        let size = u64::from(part.length);
        let mut state = ImageState::new(SlotBounds::new(part.offset, size));
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut readback = vec![0u8; BLOCK_SIZE];
        let mut offset = 0u64;

        info!(slot, name = %part.name, ?payload, "programming slot");
        loop {
            let count = fill_block(source, &mut block)?;
            if count == 0 {
                break;
            }
            let (Some(data), Some(check)) = (block.get_mut(..count), readback.get_mut(..count))
            else {
                break;
            };

            if payload == Payload::Image {
                state.program_block(offset, data)?;
            }
            let needed = offset.saturating_add(count as u64);
            if needed > size {
                return Err(RsuError::SizeExceeded { needed, size });
            }

            let table = self.spt.table()?;
            table.write_part(self.dev.as_mut(), &part, offset, data)?;
            table.read_part(self.dev.as_mut(), &part, offset, check)?;
            if let Some(at) = first_difference(data, check) {
                return Err(RsuError::CompareMismatch {
                    offset: offset.saturating_add(at as u64),
                });
            }

            offset = needed;
            if count < BLOCK_SIZE {
                break;
            }
        }

        if offset == 0 {
            return Err(RsuError::InvalidArgument("image is empty".to_string()));
        }
        debug!(slot, bytes = offset, absolute = state.is_absolute(), "image written");

        if payload == Payload::Image {
            self.priority_add(&part)?;
        }
        Ok(())
    }

    fn verify(&mut self, slot: usize, source: &mut dyn Read, payload: Payload) -> RsuResult<()> {
        let (_, part) = self.slot(slot)?;
        if payload == Payload::Image && self.priority_of(&part)? == 0 {
            return Err(RsuError::AlreadyErased(slot));
        }

        let size = u64::from(part.length);
        let mut state = ImageState::new(SlotBounds::new(part.offset, size));
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut flash = vec![0u8; BLOCK_SIZE];
        let mut offset = 0u64;

        loop {
            let count = fill_block(source, &mut block)?;
            if count == 0 {
                break;
            }
            let (Some(data), Some(stored)) = (block.get(..count), flash.get_mut(..count)) else {
                break;
            };

            let needed = offset.saturating_add(count as u64);
            if needed > size {
                return Err(RsuError::SizeExceeded { needed, size });
            }
            self.spt
                .table()?
                .read_part(self.dev.as_mut(), &part, offset, stored)?;

            match payload {
                Payload::Image => {
                    state.verify_block(offset, data, stored)?;
                }
                Payload::Raw => {
                    if let Some(at) = first_difference(data, stored) {
                        return Err(RsuError::CompareMismatch {
                            offset: offset.saturating_add(at as u64),
                        });
                    }
                }
            }

            offset = needed;
            if count < BLOCK_SIZE {
                break;
            }
        }

        debug!(slot, bytes = offset, "slot verified");
        Ok(())
    }
}

impl Session {
    /// Number of slots
    pub fn slot_count(&self) -> RsuResult<usize> {
        Ok(slot_count(self.inner()?.table()?))
    }

    /// Slot number of the slot called `name`
    pub fn slot_by_name(&self, name: &str) -> RsuResult<usize> {
        let table = self.inner()?.table()?;
        table
            .iter()
            .filter(is_slot)
            .position(|part| part.name == name)
            .ok_or_else(|| RsuError::SlotNotFound(name.to_string()))
    }

    /// Name, placement and priority of `slot`
    pub fn slot_info(&self, slot: usize) -> RsuResult<SlotInfo> {
        let inner = self.inner()?;
        let (_, part) = inner.slot(slot)?;
        let priority = inner.priority_of(&part)?;
        Ok(SlotInfo {
            name: part.name,
            offset: part.offset,
            size: u64::from(part.length),
            priority,
        })
    }

    /// Every slot in order
    pub fn slots(&self) -> RsuResult<Vec<SlotInfo>> {
        (0..self.slot_count()?).map(|slot| self.slot_info(slot)).collect()
    }

    /// Size of `slot` in bytes
    pub fn slot_size(&self, slot: usize) -> RsuResult<u64> {
        let (_, part) = self.inner()?.slot(slot)?;
        Ok(u64::from(part.length))
    }

    /// Boot priority of `slot`; 1 boots first, 0 means erased
    pub fn slot_priority(&self, slot: usize) -> RsuResult<u32> {
        let inner = self.inner()?;
        let (_, part) = inner.slot(slot)?;
        inner.priority_of(&part)
    }

    /// Drop `slot` from the boot order and erase its contents
    pub fn slot_erase(&mut self, slot: usize) -> RsuResult<()> {
        let inner = self.inner_mut()?;
        inner.check_writable(slot)?;
        let (_, part) = inner.slot(slot)?;
        inner.priority_remove(&part)?;
        inner.spt.table()?.erase_part(inner.dev.as_mut(), &part)?;
        info!(slot, name = %part.name, "slot erased");
        Ok(())
    }

    /// Program an in-memory image and make it boot first
    pub fn slot_program_buf(&mut self, slot: usize, image: &[u8]) -> RsuResult<()> {
        self.slot_program_reader(slot, image)
    }

    /// Program the image file at `path` and make it boot first
    pub fn slot_program_file(&mut self, slot: usize, path: impl AsRef<Path>) -> RsuResult<()> {
        let source = open_source(path.as_ref())?;
        self.slot_program_reader(slot, source)
    }

    /// Program an image streamed from `source` and make it boot first
    pub fn slot_program_reader(&mut self, slot: usize, mut source: impl Read) -> RsuResult<()> {
        self.inner_mut()?.program(slot, &mut source, Payload::Image)
    }

    /// Write `data` into `slot` verbatim, leaving the boot order alone
    pub fn slot_program_buf_raw(&mut self, slot: usize, data: &[u8]) -> RsuResult<()> {
        self.slot_program_reader_raw(slot, data)
    }

    /// Write the file at `path` into `slot` verbatim
    pub fn slot_program_file_raw(&mut self, slot: usize, path: impl AsRef<Path>) -> RsuResult<()> {
        let source = open_source(path.as_ref())?;
        self.slot_program_reader_raw(slot, source)
    }

    /// Write bytes streamed from `source` into `slot` verbatim
    pub fn slot_program_reader_raw(&mut self, slot: usize, mut source: impl Read) -> RsuResult<()> {
        self.inner_mut()?.program(slot, &mut source, Payload::Raw)
    }

    /// Program a factory update image
    ///
    /// Factory update images are programmed like application images: the
    /// firmware applies them on the next boot from this slot.
    pub fn slot_program_factory_update_buf(&mut self, slot: usize, image: &[u8]) -> RsuResult<()> {
        self.slot_program_buf(slot, image)
    }

    /// Program a factory update image file
    pub fn slot_program_factory_update_file(
        &mut self,
        slot: usize,
        path: impl AsRef<Path>,
    ) -> RsuResult<()> {
        self.slot_program_file(slot, path)
    }

    /// Program a factory update image streamed from `source`
    pub fn slot_program_factory_update_reader(
        &mut self,
        slot: usize,
        source: impl Read,
    ) -> RsuResult<()> {
        self.slot_program_reader(slot, source)
    }

    /// Check `slot` against an in-memory image
    pub fn slot_verify_buf(&mut self, slot: usize, image: &[u8]) -> RsuResult<()> {
        self.slot_verify_reader(slot, image)
    }

    /// Check `slot` against the image file at `path`
    pub fn slot_verify_file(&mut self, slot: usize, path: impl AsRef<Path>) -> RsuResult<()> {
        let source = open_source(path.as_ref())?;
        self.slot_verify_reader(slot, source)
    }

    /// Check `slot` against an image streamed from `source`
    pub fn slot_verify_reader(&mut self, slot: usize, mut source: impl Read) -> RsuResult<()> {
        self.inner_mut()?.verify(slot, &mut source, Payload::Image)
    }

    /// Compare `slot` byte for byte with `data`
    pub fn slot_verify_buf_raw(&mut self, slot: usize, data: &[u8]) -> RsuResult<()> {
        self.slot_verify_reader_raw(slot, data)
    }

    /// Compare `slot` byte for byte with the file at `path`
    pub fn slot_verify_file_raw(&mut self, slot: usize, path: impl AsRef<Path>) -> RsuResult<()> {
        let source = open_source(path.as_ref())?;
        self.slot_verify_reader_raw(slot, source)
    }

    /// Compare `slot` byte for byte with bytes streamed from `source`
    pub fn slot_verify_reader_raw(&mut self, slot: usize, mut source: impl Read) -> RsuResult<()> {
        self.inner_mut()?.verify(slot, &mut source, Payload::Raw)
    }

    /// Copy the contents of `slot` to `path`
    ///
    /// Blocks that are entirely erased are not written; the file ends at
    /// the last block holding data, with erased gaps before it filled in.
    pub fn slot_copy_to_file(&mut self, slot: usize, path: impl AsRef<Path>) -> RsuResult<()> {
        let path = path.as_ref();
        let inner = self.inner_mut()?;
        let (_, part) = inner.slot(slot)?;
        if inner.priority_of(&part)? == 0 {
            return Err(RsuError::AlreadyErased(slot));
        }

        let mut out = File::create(path).map_err(|e| RsuError::io(path, e))?;
        let size = u64::from(part.length);
        let erased = vec![ERASED_BYTE; BLOCK_SIZE];
        let mut chunk = vec![0u8; BLOCK_SIZE];
        let mut offset = 0u64;
        let mut written = 0u64;

        while offset < size {
            let len = usize::try_from(size.saturating_sub(offset))
                .map_or(BLOCK_SIZE, |left| left.min(BLOCK_SIZE));
            let Some(data) = chunk.get_mut(..len) else {
                break;
            };
            inner
                .spt
                .table()?
                .read_part(inner.dev.as_mut(), &part, offset, data)?;

            if data.iter().any(|&b| b != ERASED_BYTE) {
                while written < offset {
                    let gap = usize::try_from(offset.saturating_sub(written))
                        .map_or(BLOCK_SIZE, |left| left.min(BLOCK_SIZE));
                    out.write_all(erased.get(..gap).unwrap_or_default())
                        .map_err(|e| RsuError::io(path, e))?;
                    written = written.saturating_add(gap as u64);
                }
                out.write_all(data).map_err(|e| RsuError::io(path, e))?;
                written = written.saturating_add(len as u64);
            }
            offset = offset.saturating_add(len as u64);
        }

        out.flush().map_err(|e| RsuError::io(path, e))?;
        debug!(slot, bytes = written, path = ?path, "slot copied");
        Ok(())
    }

    /// Put `slot` at the top of the boot order
    pub fn slot_enable(&mut self, slot: usize) -> RsuResult<()> {
        let inner = self.inner_mut()?;
        let (_, part) = inner.slot(slot)?;
        inner.priority_remove(&part)?;
        inner.priority_add(&part)?;
        info!(slot, name = %part.name, "slot enabled");
        Ok(())
    }

    /// Take `slot` out of the boot order without erasing it
    pub fn slot_disable(&mut self, slot: usize) -> RsuResult<()> {
        let inner = self.inner_mut()?;
        let (_, part) = inner.slot(slot)?;
        inner.priority_remove(&part)?;
        info!(slot, name = %part.name, "slot disabled");
        Ok(())
    }

    /// Create a slot named `name` at absolute `address`
    pub fn slot_create(&mut self, name: &str, address: u64, size: u64) -> RsuResult<()> {
        let inner = self.inner_mut()?;
        inner.spt.create(inner.dev.as_mut(), name, address, size)?;
        info!(name, address = format_args!("{address:#x}"), size, "slot created");
        Ok(())
    }

    /// Erase `slot` and remove its partition
    pub fn slot_delete(&mut self, slot: usize) -> RsuResult<()> {
        let inner = self.inner_mut()?;
        inner.check_writable(slot)?;
        let (index, part) = inner.slot(slot)?;
        inner.priority_remove(&part)?;
        inner.spt.table()?.erase_part(inner.dev.as_mut(), &part)?;
        inner.spt.delete(inner.dev.as_mut(), index)?;
        info!(slot, name = %part.name, "slot deleted");
        Ok(())
    }

    /// Rename `slot`
    pub fn slot_rename(&mut self, slot: usize, name: &str) -> RsuResult<()> {
        let inner = self.inner_mut()?;
        let (index, part) = inner.slot(slot)?;
        inner.spt.rename(inner.dev.as_mut(), index, name)?;
        info!(slot, from = %part.name, to = name, "slot renamed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::MemoryAttributeStore;
    use crate::config::RsuConfig;
    use rsu_test_helpers::prelude::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn open(layout: &FlashLayout) -> RsuResult<Session> {
        open_with(layout, RsuConfig::default())
    }

    fn open_with(layout: &FlashLayout, config: RsuConfig) -> RsuResult<Session> {
        Session::with_parts(
            config,
            Box::new(layout.device()),
            Box::new(MemoryAttributeStore::new().with("state", 0)),
        )
    }

    #[test]
    fn test_reserved_partitions_are_hidden() -> TestResult {
        let layout = FlashLayout::standard();
        let session = open(&layout)?;
        assert_eq!(session.slot_count()?, 3);
        let names: Vec<String> = session.slots()?.into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["P1", "P2", "P3"]);
        assert_eq!(session.slot_by_name("P3")?, 2);
        assert!(matches!(
            session.slot_by_name("SPT0"),
            Err(RsuError::SlotNotFound(_))
        ));
        assert!(matches!(session.slot_info(3), Err(RsuError::UnknownSlot(3))));
        Ok(())
    }

    #[test]
    fn test_read_only_partitions_are_hidden() -> TestResult {
        let layout = FlashLayout::standard().partition("RO", 0x1E_0000, 0x1_0000, 2);
        let mut session = open(&layout)?;
        assert_eq!(session.slot_count()?, 3);
        let names: Vec<String> = session.slots()?.into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["P1", "P2", "P3"]);
        assert!(matches!(
            session.slot_by_name("RO"),
            Err(RsuError::SlotNotFound(_))
        ));
        assert!(matches!(session.slot_erase(3), Err(RsuError::UnknownSlot(3))));
        assert!(matches!(session.slot_info(3), Err(RsuError::UnknownSlot(3))));
        Ok(())
    }

    #[test]
    fn test_slot_info_reports_priority() -> TestResult {
        let layout = FlashLayout::standard().boot_order(&[
            FlashLayout::standard().offset_of("P2"),
            FlashLayout::standard().offset_of("P1"),
        ]);
        let session = open(&layout)?;
        let info = session.slot_info(0)?;
        assert_eq!(info.offset, layout.offset_of("P1"));
        assert_eq!(info.size, 0x40000);
        assert_eq!(session.slot_priority(0)?, 2);
        assert_eq!(session.slot_priority(1)?, 1);
        assert_eq!(session.slot_priority(2)?, 0);
        Ok(())
    }

    #[test]
    fn test_program_raw_then_verify_raw() -> TestResult {
        let layout = FlashLayout::standard();
        let mut session = open(&layout)?;
        let data: Vec<u8> = (0..BLOCK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();

        session.slot_program_buf_raw(1, &data)?;
        assert_eq!(session.slot_priority(1)?, 0);
        session.slot_verify_buf_raw(1, &data)?;

        let mut other = data.clone();
        if let Some(byte) = other.get_mut(BLOCK_SIZE + 5) {
            *byte ^= 0xFF;
        }
        assert!(matches!(
            session.slot_verify_buf_raw(1, &other),
            Err(RsuError::CompareMismatch { offset }) if offset == (BLOCK_SIZE + 5) as u64
        ));
        Ok(())
    }

    #[test]
    fn test_program_joins_boot_order() -> TestResult {
        let layout = FlashLayout::standard();
        let mut session = open(&layout)?;
        let image = ImageBuilder::new().data(0x5A, 3 * BLOCK_SIZE).build();

        session.slot_program_buf(2, &image)?;
        assert_eq!(session.slot_priority(2)?, 1);
        session.slot_verify_buf(2, &image)?;
        assert!(matches!(
            session.slot_program_buf(2, &image),
            Err(RsuError::AlreadyInUse(2))
        ));
        Ok(())
    }

    #[test]
    fn test_program_rejects_oversized_and_empty() -> TestResult {
        let layout = FlashLayout::standard();
        let mut session = open(&layout)?;
        let too_big = vec![0u8; 0x40000 + 1];
        assert!(matches!(
            session.slot_program_buf_raw(0, &too_big),
            Err(RsuError::SizeExceeded { size: 0x40000, .. })
        ));
        assert!(matches!(
            session.slot_program_buf_raw(0, &[]),
            Err(RsuError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_write_protect_checked_before_slot() -> TestResult {
        let layout = FlashLayout::standard();
        let config = RsuConfig {
            write_protect: 1 << 5,
            ..RsuConfig::default()
        };
        let mut session = open_with(&layout, config)?;
        assert!(matches!(
            session.slot_erase(5),
            Err(RsuError::WriteProtected(5))
        ));
        assert!(matches!(session.slot_erase(4), Err(RsuError::UnknownSlot(4))));
        Ok(())
    }

    #[test]
    fn test_enable_disable_cycle() -> TestResult {
        let base = FlashLayout::standard();
        let layout = base.clone().boot_order(&[base.offset_of("P1")]);
        let mut session = open(&layout)?;

        session.slot_enable(2)?;
        assert_eq!(session.slot_priority(2)?, 1);
        assert_eq!(session.slot_priority(0)?, 2);

        session.slot_disable(0)?;
        assert_eq!(session.slot_priority(0)?, 0);
        assert_eq!(session.slot_priority(2)?, 1);

        assert!(matches!(
            session.slot_verify_buf(0, b"x"),
            Err(RsuError::AlreadyErased(0))
        ));
        Ok(())
    }

    #[test]
    fn test_create_rename_delete() -> TestResult {
        let layout = FlashLayout::standard();
        let mut session = open(&layout)?;
        let free = layout.free_offset();

        assert!(matches!(
            session.slot_create("SPT", free, 0x10000),
            Err(RsuError::InvalidName { .. })
        ));
        session.slot_create("P4", free, 0x10000)?;
        assert_eq!(session.slot_by_name("P4")?, 3);

        assert!(matches!(
            session.slot_rename(3, "CPB"),
            Err(RsuError::InvalidName { .. })
        ));
        session.slot_rename(3, "NEW")?;
        assert_eq!(session.slot_info(3)?.name, "NEW");

        session.slot_delete(0)?;
        assert_eq!(session.slot_count()?, 3);
        assert_eq!(session.slot_by_name("NEW")?, 2);
        Ok(())
    }

    #[test]
    fn test_source_read_error() -> TestResult {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("device unplugged"))
            }
        }

        let layout = FlashLayout::standard();
        let mut session = open(&layout)?;
        assert!(matches!(
            session.slot_program_reader_raw(0, Broken),
            Err(RsuError::SourceRead(_))
        ));
        Ok(())
    }

    #[test]
    fn test_fill_block_collects_short_reads() -> TestResult {
        let data = [1u8, 2, 3, 4, 5];
        let mut source = std::io::Read::chain(&data[..2], &data[2..]);
        let mut buf = [0u8; 8];
        assert_eq!(fill_block(&mut source, &mut buf)?, 5);
        assert_eq!(buf, [1, 2, 3, 4, 5, 0, 0, 0]);
        Ok(())
    }
}
