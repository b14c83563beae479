//! Sub-partition table (SPT)
//!
//! One logical table, two physical copies: SPT0 at device offset 0 and SPT1
//! at 32 KiB. The copies must agree byte for byte; a copy that fails its
//! checks is rebuilt from the other one at load time.
//!
//! Layout (little-endian, 4096 bytes):
//!
//! | offset | field                                   |
//! |--------|-----------------------------------------|
//! | 0x00   | magic `0x57713427`                      |
//! | 0x04   | version                                 |
//! | 0x08   | partition count                         |
//! | 0x0C   | checksum (big-endian, version > 0 only) |
//! | 0x20   | 127 records of 32 bytes                 |
//!
//! Each record is `name[16]`, `offset: u64`, `length: u32`, `flags: u32`.

use crate::codec::{
    commit_copy, exact, read_saved, read_u32, read_u64, write_bytes, write_saved, write_u32,
    write_u64,
};
use crate::error::{RsuError, RsuResult, TableDefect};
use rsu_flash::BlockDevice;
use rsu_image::bit_reversed_crc32;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, error, trace, warn};

/// Partition table magic number
pub const SPT_MAGIC: u32 = 0x5771_3427;

/// Size of one table copy
pub const SPT_SIZE: usize = 4096;

/// Baseline format version; later versions carry a checksum
pub const SPT_VERSION: u32 = 0;

/// Table capacity
pub const SPT_MAX_PARTITIONS: usize = 127;

/// Device offset of the first copy
pub const SPT0_OFFSET: u64 = 0;

/// Device offset of the second copy
pub const SPT1_OFFSET: u64 = 0x8000;

/// Region erased before a copy is rebuilt
pub const SPT_REGION_SIZE: u64 = 0x8000;

/// Width of the name field, terminator included
pub const PARTITION_NAME_LEN: usize = 16;

/// Partition holds firmware metadata
pub const FLAG_RESERVED: u32 = 1;

/// Partition must not be modified
pub const FLAG_READ_ONLY: u32 = 2;

/// Name of the first partition table copy
pub const SPT0_NAME: &str = "SPT0";
/// Name of the second partition table copy
pub const SPT1_NAME: &str = "SPT1";
/// Name of the first priority table copy
pub const CPB0_NAME: &str = "CPB0";
/// Name of the second priority table copy
pub const CPB1_NAME: &str = "CPB1";

const VERSION_AT: usize = 0x04;
const COUNT_AT: usize = 0x08;
const CHECKSUM_AT: usize = 0x0C;
const ENTRIES_AT: usize = 0x20;
const ENTRY_SIZE: usize = 32;
const ENTRY_OFFSET_AT: usize = 16;
const ENTRY_LENGTH_AT: usize = 24;
const ENTRY_FLAGS_AT: usize = 28;

/// One decoded partition record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    /// Name, at most 15 bytes
    pub name: String,
    /// Absolute flash offset
    pub offset: u64,
    /// Length in bytes
    pub length: u32,
    /// [`FLAG_RESERVED`] and [`FLAG_READ_ONLY`] bits
    pub flags: u32,
}

impl Partition {
    /// Build a record
    pub fn new(name: impl Into<String>, offset: u64, length: u32, flags: u32) -> Self {
        Self {
            name: name.into(),
            offset,
            length,
            flags,
        }
    }

    /// One past the last byte
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(u64::from(self.length))
    }

    /// Whether the reserved flag is set
    pub fn is_reserved(&self) -> bool {
        self.flags & FLAG_RESERVED != 0
    }

    /// Whether the read-only flag is set
    pub fn is_read_only(&self) -> bool {
        self.flags & FLAG_READ_ONLY != 0
    }

    /// Whether `[start, end)` intersects this partition
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        start < self.end() && end > self.offset
    }
}

fn entry_at(index: usize) -> usize {
    ENTRIES_AT + index * ENTRY_SIZE
}

// Names that fill all 16 bytes lose their last byte, as if terminated.
fn decode_name(field: &[u8]) -> String {
    let field = field.get(..PARTITION_NAME_LEN - 1).unwrap_or(field);
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(field.get(..len).unwrap_or_default()).into_owned()
}

fn encode_name(name: &str) -> [u8; PARTITION_NAME_LEN] {
    let mut field = [0u8; PARTITION_NAME_LEN];
    for (dst, src) in field.iter_mut().zip(name.bytes().take(PARTITION_NAME_LEN - 1)) {
        *dst = src;
    }
    field
}

/// Reject names that do not fit the record or are empty
pub fn validate_name(name: &str) -> RsuResult<()> {
    if name.is_empty() {
        return Err(RsuError::InvalidName {
            name: name.to_string(),
            reason: "name is empty",
        });
    }
    if name.len() >= PARTITION_NAME_LEN {
        return Err(RsuError::InvalidName {
            name: name.to_string(),
            reason: "name is limited to 15 bytes",
        });
    }
    if name.bytes().any(|b| b == 0) {
        return Err(RsuError::InvalidName {
            name: name.to_string(),
            reason: "name contains a NUL byte",
        });
    }
    Ok(())
}

/// Names never exposed as slots and refused by create and rename
pub const RESERVED_NAMES: [&str; 8] = [
    "BOOT_INFO",
    "FACTORY_IMAGE",
    "SPT",
    "SPT0",
    "SPT1",
    "CPB",
    "CPB0",
    "CPB1",
];

/// Whether `name` is one of [`RESERVED_NAMES`]
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// [`validate_name`] plus the reserved-name rule for new or renamed records
fn validate_new_name(name: &str) -> RsuResult<()> {
    validate_name(name)?;
    if is_reserved_name(name) {
        return Err(RsuError::InvalidName {
            name: name.to_string(),
            reason: "reserved name",
        });
    }
    Ok(())
}

/// A partition table copy held as its on-flash bytes
#[derive(Clone, PartialEq, Eq)]
pub struct PartitionTable {
    raw: Vec<u8>,
}

impl fmt::Debug for PartitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionTable")
            .field("magic", &format_args!("{:#010x}", self.magic()))
            .field("version", &self.version())
            .field("partitions", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

impl PartitionTable {
    /// Empty table with a valid magic
    pub fn new(version: u32) -> Self {
        let mut raw = vec![0u8; SPT_SIZE];
        write_u32(&mut raw, 0, SPT_MAGIC);
        write_u32(&mut raw, VERSION_AT, version);
        Self { raw }
    }

    /// Wrap the first [`SPT_SIZE`] bytes of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        exact(bytes, SPT_SIZE).map(|raw| Self { raw })
    }

    /// On-flash bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Magic number field
    pub fn magic(&self) -> u32 {
        read_u32(&self.raw, 0)
    }

    /// Format version
    pub fn version(&self) -> u32 {
        read_u32(&self.raw, VERSION_AT)
    }

    /// Partition count as stored, which may exceed the capacity
    pub fn declared_count(&self) -> u32 {
        read_u32(&self.raw, COUNT_AT)
    }

    /// Number of usable records
    pub fn len(&self) -> usize {
        usize::try_from(self.declared_count())
            .map_or(SPT_MAX_PARTITIONS, |n| n.min(SPT_MAX_PARTITIONS))
    }

    /// Whether the table has no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record at `index`
    pub fn get(&self, index: usize) -> Option<Partition> {
        if index >= self.len() {
            return None;
        }
        let at = entry_at(index);
        let entry = self.raw.get(at..at + ENTRY_SIZE)?;
        Some(Partition {
            name: decode_name(entry.get(..PARTITION_NAME_LEN)?),
            offset: read_u64(entry, ENTRY_OFFSET_AT),
            length: read_u32(entry, ENTRY_LENGTH_AT),
            flags: read_u32(entry, ENTRY_FLAGS_AT),
        })
    }

    /// Records in table order
    pub fn iter(&self) -> impl Iterator<Item = Partition> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }

    /// Index and record of the partition called `name`
    pub fn find(&self, name: &str) -> Option<(usize, Partition)> {
        self.iter().enumerate().find(|(_, p)| p.name == name)
    }

    /// Absolute offset of the SPT0 record, the base of the device address space
    pub fn spt0_offset(&self) -> Option<u64> {
        self.find(SPT0_NAME).map(|(_, p)| p.offset)
    }

    fn set(&mut self, index: usize, part: &Partition) {
        let at = entry_at(index);
        write_bytes(&mut self.raw, at, &encode_name(&part.name));
        write_u64(&mut self.raw, at + ENTRY_OFFSET_AT, part.offset);
        write_u32(&mut self.raw, at + ENTRY_LENGTH_AT, part.length);
        write_u32(&mut self.raw, at + ENTRY_FLAGS_AT, part.flags);
    }

    fn set_count(&mut self, count: usize) {
        write_u32(&mut self.raw, COUNT_AT, u32::try_from(count).unwrap_or(u32::MAX));
    }

    /// Append a record
    pub fn push(&mut self, part: &Partition) -> RsuResult<()> {
        let count = self.len();
        if count >= SPT_MAX_PARTITIONS {
            return Err(RsuError::TableFull("partition table"));
        }
        self.set(count, part);
        self.set_count(count + 1);
        Ok(())
    }

    /// Remove the record at `index`, shifting later records down
    pub fn remove(&mut self, index: usize) -> Option<Partition> {
        let removed = self.get(index)?;
        let count = self.len();
        let start = entry_at(index);
        let end = entry_at(count);
        if let Some(entries) = self.raw.get_mut(start..end) {
            entries.rotate_left(ENTRY_SIZE);
            if let Some(last) = entries.rchunks_exact_mut(ENTRY_SIZE).next() {
                last.fill(0);
            }
        }
        self.set_count(count.saturating_sub(1));
        Some(removed)
    }

    /// Change the name of the record at `index`
    pub fn set_name(&mut self, index: usize, name: &str) -> Option<()> {
        let mut part = self.get(index)?;
        part.name = name.to_string();
        self.set(index, &part);
        Some(())
    }

    /// Checksum field as stored
    pub fn stored_checksum(&self) -> [u8; 4] {
        self.raw
            .get(CHECKSUM_AT..)
            .and_then(|rest| rest.first_chunk::<4>())
            .copied()
            .unwrap_or_default()
    }

    /// CRC32 over the bit-reversed table with the checksum field zeroed
    pub fn compute_checksum(&self) -> u32 {
        let mut scratch = self.raw.clone();
        write_u32(&mut scratch, CHECKSUM_AT, 0);
        bit_reversed_crc32(&scratch)
    }

    /// Store a fresh checksum
    pub fn refresh_checksum(&mut self) {
        let crc = self.compute_checksum();
        write_bytes(&mut self.raw, CHECKSUM_AT, &crc.to_be_bytes());
    }

    /// Structural validation of one copy
    ///
    /// The checksum is only checked when `verify_checksum` is set and the
    /// table declares a version above [`SPT_VERSION`].
    pub fn check(&self, verify_checksum: bool) -> Result<(), TableDefect> {
        if self.magic() != SPT_MAGIC {
            return Err(TableDefect::BadMagic(self.magic()));
        }

        if verify_checksum
            && self.version() > SPT_VERSION
            && self.stored_checksum() != self.compute_checksum().to_be_bytes()
        {
            return Err(TableDefect::BadChecksum);
        }

        let count = self.declared_count();
        if !usize::try_from(count).is_ok_and(|n| n <= SPT_MAX_PARTITIONS) {
            return Err(TableDefect::TooManyEntries {
                count,
                max: SPT_MAX_PARTITIONS,
            });
        }

        let parts: Vec<Partition> = self.iter().collect();
        for (i, a) in parts.iter().enumerate() {
            trace!(
                name = %a.name,
                offset = format_args!("{:#018x}", a.offset),
                length = format_args!("{:#010x}", a.length),
                flags = a.flags,
                "partition entry"
            );
            for b in parts.iter().skip(i + 1) {
                if a.name == b.name {
                    return Err(TableDefect::DuplicateName(a.name.clone()));
                }
                if a.overlaps(b.offset, b.end()) {
                    return Err(TableDefect::Overlap(a.name.clone(), b.name.clone()));
                }
            }
        }

        for required in [SPT0_NAME, SPT1_NAME, CPB0_NAME, CPB1_NAME] {
            if !parts.iter().any(|p| p.name == required) {
                return Err(TableDefect::MissingEntry(required));
            }
        }

        Ok(())
    }

    /// Device address of `part`
    pub fn device_offset(&self, part: &Partition) -> RsuResult<u64> {
        let base = self
            .spt0_offset()
            .ok_or(RsuError::CorruptedPartitionTable)?;
        part.offset.checked_sub(base).ok_or_else(|| {
            RsuError::InvalidArgument(format!(
                "partition '{}' at {:#x} lies below SPT0 at {base:#x}",
                part.name, part.offset
            ))
        })
    }

    fn span(&self, part: &Partition, offset: u64, len: usize) -> RsuResult<u64> {
        let end = offset.checked_add(len as u64);
        if end.is_none_or(|end| end > u64::from(part.length)) {
            return Err(RsuError::InvalidArgument(format!(
                "access {offset:#x}+{len:#x} outside partition '{}' of size {:#x}",
                part.name, part.length
            )));
        }
        Ok(self.device_offset(part)?.saturating_add(offset))
    }

    /// Read from `part` at a partition-relative offset
    pub fn read_part(
        &self,
        dev: &mut dyn BlockDevice,
        part: &Partition,
        offset: u64,
        buf: &mut [u8],
    ) -> RsuResult<()> {
        let at = self.span(part, offset, buf.len())?;
        dev.read(at, buf)?;
        Ok(())
    }

    /// Write into `part` at a partition-relative offset
    pub fn write_part(
        &self,
        dev: &mut dyn BlockDevice,
        part: &Partition,
        offset: u64,
        data: &[u8],
    ) -> RsuResult<()> {
        let at = self.span(part, offset, data.len())?;
        dev.write(at, data)?;
        Ok(())
    }

    /// Erase all of `part`
    pub fn erase_part(&self, dev: &mut dyn BlockDevice, part: &Partition) -> RsuResult<()> {
        let at = self.device_offset(part)?;
        debug!(name = %part.name, at = format_args!("{at:#x}"), len = part.length, "erase partition");
        dev.erase(at, u64::from(part.length))?;
        Ok(())
    }
}

/// The in-memory partition table and its two on-flash copies
#[derive(Debug)]
pub struct PartitionStore {
    table: PartitionTable,
    corrupted: bool,
    verify_checksum: bool,
}

impl PartitionStore {
    /// Store holding an empty table; call [`load`](Self::load) next
    pub fn new(verify_checksum: bool) -> Self {
        Self {
            table: PartitionTable::new(SPT_VERSION),
            corrupted: false,
            verify_checksum,
        }
    }

    /// Whether no trustworthy copy was found at the last load
    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// The loaded table, refused while corrupted
    pub fn table(&self) -> RsuResult<&PartitionTable> {
        if self.corrupted {
            return Err(RsuError::CorruptedPartitionTable);
        }
        Ok(&self.table)
    }

    fn read_copy(
        &self,
        dev: &mut dyn BlockDevice,
        offset: u64,
        name: &'static str,
    ) -> RsuResult<Option<PartitionTable>> {
        let bytes = dev.read_vec(offset, SPT_SIZE)?;
        let Some(table) = PartitionTable::from_bytes(&bytes) else {
            return Ok(None);
        };
        match table.check(self.verify_checksum) {
            Ok(()) => Ok(Some(table)),
            Err(defect) => {
                debug!(copy = name, %defect, "partition table copy rejected");
                Ok(None)
            }
        }
    }

    fn rebuild_copy(
        dev: &mut dyn BlockDevice,
        offset: u64,
        name: &'static str,
        good: &PartitionTable,
    ) -> RsuResult<()> {
        warn!(copy = name, "restoring partition table copy");
        dev.erase(offset, SPT_REGION_SIZE)?;
        commit_copy(dev, offset, good.as_bytes())?;
        Ok(())
    }

    /// Read both copies, repair a single bad one, and adopt the result
    ///
    /// With no good copy, or two good copies that differ, the store is
    /// marked corrupted and the matching error is returned.
    pub fn load(&mut self, dev: &mut dyn BlockDevice) -> RsuResult<()> {
        let spt1 = self.read_copy(dev, SPT1_OFFSET, SPT1_NAME)?;
        let spt0 = self.read_copy(dev, SPT0_OFFSET, SPT0_NAME)?;

        let table = match (spt0, spt1) {
            (Some(spt0), Some(spt1)) => {
                if spt0 != spt1 {
                    error!("partition table copies are both valid but differ");
                    self.corrupted = true;
                    return Err(RsuError::InconsistentRedundantCopies("partition table"));
                }
                spt0
            }
            (Some(good), None) => {
                Self::rebuild_copy(dev, SPT1_OFFSET, SPT1_NAME, &good)?;
                good
            }
            (None, Some(good)) => {
                Self::rebuild_copy(dev, SPT0_OFFSET, SPT0_NAME, &good)?;
                good
            }
            (None, None) => {
                error!("no valid partition table copy found");
                self.corrupted = true;
                return Err(RsuError::CorruptedPartitionTable);
            }
        };

        debug!(partitions = table.len(), version = table.version(), "partition table loaded");
        self.table = table;
        self.corrupted = false;
        Ok(())
    }

    /// Erase and rewrite both copies from the in-memory table
    fn writeback(&mut self, dev: &mut dyn BlockDevice) -> RsuResult<()> {
        if self.verify_checksum && self.table.version() > SPT_VERSION {
            self.table.refresh_checksum();
        }

        let copies: Vec<Partition> = self
            .table
            .iter()
            .filter(|p| p.name == SPT0_NAME || p.name == SPT1_NAME)
            .collect();
        if copies.len() != 2 {
            error!(found = copies.len(), "partition table does not name two copies");
            return Err(RsuError::CorruptedPartitionTable);
        }

        for part in &copies {
            self.table.erase_part(dev, part)?;
            let at = self.table.device_offset(part)?;
            commit_copy(dev, at, self.table.as_bytes())?;
            debug!(copy = %part.name, at = format_args!("{at:#x}"), "partition table written");
        }
        Ok(())
    }

    fn commit(&mut self, dev: &mut dyn BlockDevice) -> RsuResult<()> {
        self.writeback(dev)?;
        self.load(dev)
    }

    /// Add a partition at `[start, start + size)`
    pub fn create(
        &mut self,
        dev: &mut dyn BlockDevice,
        name: &str,
        start: u64,
        size: u64,
    ) -> RsuResult<()> {
        let table = self.table()?;
        validate_new_name(name)?;
        if table.find(name).is_some() {
            return Err(RsuError::NameInUse(name.to_string()));
        }

        let erase_size = dev.erase_size();
        if erase_size != 0 {
            let unit = u64::from(erase_size);
            if !size.is_multiple_of(unit) {
                return Err(RsuError::InvalidAlignment {
                    what: "partition size",
                    value: size,
                    erase_size,
                });
            }
            if !start.is_multiple_of(unit) {
                return Err(RsuError::InvalidAlignment {
                    what: "partition start",
                    value: start,
                    erase_size,
                });
            }
        }

        if table.len() >= SPT_MAX_PARTITIONS {
            return Err(RsuError::TableFull("partition table"));
        }

        let length = u32::try_from(size)
            .ok()
            .ok_or_else(|| RsuError::InvalidArgument(format!("size {size:#x} exceeds 32 bits")))?;
        let end = start.saturating_add(size);
        if let Some(existing) = table.iter().find(|p| p.overlaps(start, end)) {
            return Err(RsuError::Overlap {
                start,
                end,
                existing: existing.name,
            });
        }

        debug!(name, start = format_args!("{start:#x}"), size = format_args!("{size:#x}"), "create partition");
        self.table.push(&Partition::new(name, start, length, 0))?;
        self.commit(dev)
    }

    /// Remove the record at `index`
    pub fn delete(&mut self, dev: &mut dyn BlockDevice, index: usize) -> RsuResult<()> {
        self.table()?;
        let removed = self
            .table
            .remove(index)
            .ok_or_else(|| RsuError::InvalidArgument(format!("no partition {index}")))?;
        debug!(name = %removed.name, "delete partition");
        self.commit(dev)
    }

    /// Rename the record at `index`
    pub fn rename(&mut self, dev: &mut dyn BlockDevice, index: usize, name: &str) -> RsuResult<()> {
        let table = self.table()?;
        if table.get(index).is_none() {
            return Err(RsuError::InvalidArgument(format!("no partition {index}")));
        }
        validate_new_name(name)?;
        if table.find(name).is_some() {
            return Err(RsuError::NameInUse(name.to_string()));
        }

        self.table.set_name(index, name);
        self.commit(dev)
    }

    /// Save the raw SPT0 copy plus a CRC trailer to `path`
    pub fn save(&self, dev: &mut dyn BlockDevice, path: &Path) -> RsuResult<()> {
        self.table()?;
        let bytes = dev.read_vec(SPT0_OFFSET, SPT_SIZE)?;
        write_saved(path, &bytes)
    }

    /// Replace both copies with a table saved by [`save`](Self::save)
    pub fn restore(&mut self, dev: &mut dyn BlockDevice, path: &Path) -> RsuResult<()> {
        let bytes = read_saved(path, SPT_SIZE, SPT_MAGIC)?;
        self.table = PartitionTable::from_bytes(&bytes)
            .ok_or_else(|| RsuError::InvalidImage(format!("{} is truncated", path.display())))?;
        warn!(path = ?path, "restoring partition table from file");
        self.writeback(dev)?;
        self.corrupted = false;
        self.load(dev)
    }
}
