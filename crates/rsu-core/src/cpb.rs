//! Configuration pointer block (CPB): the boot-order log
//!
//! The table is an append log of partition offsets. Entries are written
//! into free (all-ones) slots without an erase and retired by clearing
//! them to zero, which flash allows in place. Only when no free slot is
//! left is the log compacted and both copies erased and rewritten.
//!
//! Header (little-endian `i32` fields):
//!
//! | offset | field              |
//! |--------|--------------------|
//! | 0x00   | magic `0x57789609` |
//! | 0x04   | header size        |
//! | 0x08   | table size         |
//! | 0x0C   | reserved           |
//! | 0x10   | pointer offset     |
//! | 0x14   | pointer slots      |

use crate::attr::AttributeStore;
use crate::codec::{
    commit_copy, exact, read_saved, read_u32, read_u64, write_saved, write_u32, write_u64,
};
use crate::error::{RsuError, RsuResult, TableDefect};
use crate::spt::{CPB0_NAME, CPB1_NAME, Partition, PartitionTable};
use rsu_flash::BlockDevice;
use std::fmt;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Priority table magic number
pub const CPB_MAGIC: u32 = 0x5778_9609;

/// Size of one table copy
pub const CPB_SIZE: usize = 4096;

/// Header size written by this library
pub const CPB_HEADER_SIZE: u32 = 24;

/// Pointer array offset written by this library
pub const CPB_IMAGE_PTR_OFFSET: u32 = 24;

/// Pointer slots written by this library
pub const CPB_IMAGE_PTR_SLOTS: u32 = 508;

/// Slot never written since the last erase
pub const POINTER_ERASED: u64 = u64::MAX;

/// Slot retired from the boot order
pub const POINTER_SPENT: u64 = 0;

/// Attribute reporting firmware-detected CPB corruption
pub const STATE_KEY: &str = "state";

/// `state` value: firmware found CPB0 corrupted, CPB1 fine
pub const STATE_CPB0_CORRUPTED: u64 = 0xF004_D00F;

/// `state` value: firmware found both copies corrupted
pub const STATE_CPB0_CPB1_CORRUPTED: u64 = 0xF004_D010;

const HEADER_SIZE_AT: usize = 0x04;
const SIZE_AT: usize = 0x08;
const PTR_OFFSET_AT: usize = 0x10;
const PTR_SLOTS_AT: usize = 0x14;
const POINTER_SIZE: usize = 8;

/// Whether a slot value is one of the two sentinels
pub fn is_sentinel(value: u64) -> bool {
    value == POINTER_ERASED || value == POINTER_SPENT
}

/// A priority table copy held as its on-flash bytes
#[derive(Clone, PartialEq, Eq)]
pub struct PriorityTable {
    raw: Vec<u8>,
}

impl fmt::Debug for PriorityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active: Vec<String> = self
            .slots()
            .into_iter()
            .filter(|&v| !is_sentinel(v))
            .map(|v| format!("{v:#x}"))
            .collect();
        f.debug_struct("PriorityTable")
            .field("magic", &format_args!("{:#010x}", self.magic()))
            .field("slots", &self.slot_count())
            .field("active", &active)
            .finish()
    }
}

impl PriorityTable {
    /// Freshly erased table: valid header, every slot free
    pub fn fresh() -> Self {
        let mut raw = vec![0xFFu8; CPB_SIZE];
        write_u32(&mut raw, 0, CPB_MAGIC);
        write_u32(&mut raw, HEADER_SIZE_AT, CPB_HEADER_SIZE);
        write_u32(&mut raw, SIZE_AT, u32::try_from(CPB_SIZE).unwrap_or(u32::MAX));
        write_u32(&mut raw, 0x0C, 0);
        write_u32(&mut raw, PTR_OFFSET_AT, CPB_IMAGE_PTR_OFFSET);
        write_u32(&mut raw, PTR_SLOTS_AT, CPB_IMAGE_PTR_SLOTS);
        Self { raw }
    }

    /// Wrap the first [`CPB_SIZE`] bytes of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        exact(bytes, CPB_SIZE).map(|raw| Self { raw })
    }

    /// On-flash bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Magic number field
    pub fn magic(&self) -> u32 {
        read_u32(&self.raw, 0)
    }

    /// Declared header size
    pub fn header_size(&self) -> u32 {
        read_u32(&self.raw, HEADER_SIZE_AT)
    }

    fn ptr_offset(&self) -> u32 {
        read_u32(&self.raw, PTR_OFFSET_AT)
    }

    fn declared_slots(&self) -> u32 {
        read_u32(&self.raw, PTR_SLOTS_AT)
    }

    fn pointer_array(&self) -> Option<(usize, usize)> {
        let offset = usize::try_from(self.ptr_offset()).ok()?;
        let slots = usize::try_from(self.declared_slots()).ok()?;
        let end = slots.checked_mul(POINTER_SIZE)?.checked_add(offset)?;
        (end <= CPB_SIZE).then_some((offset, slots))
    }

    /// Number of pointer slots, 0 when the header is out of bounds
    pub fn slot_count(&self) -> usize {
        self.pointer_array().map_or(0, |(_, slots)| slots)
    }

    /// Value of slot `index`
    pub fn slot(&self, index: usize) -> Option<u64> {
        let (offset, slots) = self.pointer_array()?;
        (index < slots).then(|| read_u64(&self.raw, offset + index * POINTER_SIZE))
    }

    /// Every slot in array order
    pub fn slots(&self) -> Vec<u64> {
        (0..self.slot_count()).filter_map(|i| self.slot(i)).collect()
    }

    fn set_slot(&mut self, index: usize, value: u64) -> Option<()> {
        let (offset, slots) = self.pointer_array()?;
        if index >= slots {
            return None;
        }
        write_u64(&mut self.raw, offset + index * POINTER_SIZE, value);
        Some(())
    }

    /// Boot priority of `offset`: 1 for the newest entry, 0 when absent
    pub fn priority_of(&self, offset: u64) -> u32 {
        let mut priority = 0u32;
        for value in self.slots().into_iter().rev() {
            if is_sentinel(value) {
                continue;
            }
            priority = priority.saturating_add(1);
            if value == offset {
                return priority;
            }
        }
        0
    }

    /// Index of the first free slot
    pub fn first_free(&self) -> Option<usize> {
        self.slots().iter().position(|&v| v == POINTER_ERASED)
    }

    /// Squeeze out sentinels, append `offset` and pad with free slots
    pub fn compact_with(&mut self, offset: u64) -> RsuResult<()> {
        let slots = self.slot_count();
        let mut active: Vec<u64> = self
            .slots()
            .into_iter()
            .filter(|&v| !is_sentinel(v))
            .collect();
        if active.len() >= slots {
            return Err(RsuError::TableFull("priority table"));
        }
        active.push(offset);
        active.resize(slots, POINTER_ERASED);

        for (index, value) in active.into_iter().enumerate() {
            self.set_slot(index, value);
        }
        Ok(())
    }

    /// Structural validation against the partition table
    pub fn check(&self, spt: &PartitionTable) -> Result<(), TableDefect> {
        if self.magic() != CPB_MAGIC {
            return Err(TableDefect::BadMagic(self.magic()));
        }
        if self.header_size() > CPB_HEADER_SIZE {
            warn!(
                header_size = self.header_size(),
                "priority table header is larger than expected; newer features are ignored"
            );
        }
        if self.pointer_array().is_none() {
            return Err(TableDefect::PointerArrayOutOfBounds {
                offset: self.ptr_offset(),
                slots: self.declared_slots(),
            });
        }

        for (slot, value) in self.slots().into_iter().enumerate() {
            if is_sentinel(value) {
                continue;
            }
            let part = spt
                .iter()
                .find(|p| p.offset == value)
                .ok_or(TableDefect::UnknownPointer { slot, value })?;
            if part.is_reserved() {
                return Err(TableDefect::ReservedPointer {
                    slot,
                    name: part.name,
                });
            }
        }
        Ok(())
    }
}

/// The in-memory priority table and its two on-flash copies
#[derive(Debug)]
pub struct PriorityStore {
    table: PriorityTable,
    corrupted: bool,
}

impl Default for PriorityStore {
    fn default() -> Self {
        Self::new()
    }
}

fn copies(spt: &PartitionTable) -> RsuResult<(Partition, Partition)> {
    match (spt.find(CPB0_NAME), spt.find(CPB1_NAME)) {
        (Some((_, cpb0)), Some((_, cpb1))) => Ok((cpb0, cpb1)),
        _ => {
            error!("partition table has no CPB0/CPB1 entries");
            Err(RsuError::CorruptedPartitionTable)
        }
    }
}

impl PriorityStore {
    /// Store holding a fresh table; call [`load`](Self::load) next
    pub fn new() -> Self {
        Self {
            table: PriorityTable::fresh(),
            corrupted: false,
        }
    }

    /// Whether no trustworthy copy was found at the last load
    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// The loaded table, refused while corrupted
    pub fn table(&self) -> RsuResult<&PriorityTable> {
        if self.corrupted {
            return Err(RsuError::CorruptedPriorityTable);
        }
        Ok(&self.table)
    }

    fn read_copy(
        dev: &mut dyn BlockDevice,
        spt: &PartitionTable,
        part: &Partition,
    ) -> RsuResult<Option<PriorityTable>> {
        let mut buf = vec![0u8; CPB_SIZE];
        spt.read_part(dev, part, 0, &mut buf)?;
        let Some(table) = PriorityTable::from_bytes(&buf) else {
            return Ok(None);
        };
        match table.check(spt) {
            Ok(()) => Ok(Some(table)),
            Err(defect) => {
                info!(copy = %part.name, %defect, "priority table copy rejected");
                Ok(None)
            }
        }
    }

    fn rebuild_copy(
        dev: &mut dyn BlockDevice,
        spt: &PartitionTable,
        part: &Partition,
        good: &PriorityTable,
    ) -> RsuResult<()> {
        warn!(copy = %part.name, "restoring priority table copy");
        spt.erase_part(dev, part)?;
        commit_copy(dev, spt.device_offset(part)?, good.as_bytes())?;
        Ok(())
    }

    /// Read both copies, repair a single bad one, and adopt the result
    ///
    /// The firmware `state` attribute is consulted first: when it reports
    /// both copies corrupted the store is marked corrupted without looking
    /// at flash, and when it reports CPB0 corrupted that copy is treated as
    /// bad and rebuilt from CPB1 whatever its content.
    pub fn load(
        &mut self,
        dev: &mut dyn BlockDevice,
        spt: &PartitionTable,
        attrs: &dyn AttributeStore,
    ) -> RsuResult<()> {
        let state = attrs.get(STATE_KEY)?;
        debug!(state = format_args!("{state:#010x}"), "firmware state");

        if state == STATE_CPB0_CPB1_CORRUPTED {
            error!("firmware reports both priority table copies corrupted");
            self.corrupted = true;
            return Err(RsuError::CorruptedPriorityTable);
        }
        let distrust_cpb0 = state == STATE_CPB0_CORRUPTED;
        if distrust_cpb0 {
            warn!("firmware reports CPB0 corrupted");
        }
        self.load_copies(dev, spt, distrust_cpb0)
    }

    fn load_copies(
        &mut self,
        dev: &mut dyn BlockDevice,
        spt: &PartitionTable,
        distrust_cpb0: bool,
    ) -> RsuResult<()> {
        let (cpb0, cpb1) = copies(spt)?;
        let table1 = Self::read_copy(dev, spt, &cpb1)?;
        let table0 = if distrust_cpb0 {
            None
        } else {
            Self::read_copy(dev, spt, &cpb0)?
        };

        let table = match (table0, table1) {
            (Some(table0), Some(table1)) => {
                if table0 != table1 {
                    error!("priority table copies are both valid but differ");
                    self.corrupted = true;
                    return Err(RsuError::InconsistentRedundantCopies("priority table"));
                }
                table0
            }
            (Some(good), None) => {
                Self::rebuild_copy(dev, spt, &cpb1, &good)?;
                good
            }
            (None, Some(good)) => {
                Self::rebuild_copy(dev, spt, &cpb0, &good)?;
                good
            }
            (None, None) => {
                error!("no valid priority table copy found");
                self.corrupted = true;
                return Err(RsuError::CorruptedPriorityTable);
            }
        };

        self.table = table;
        self.corrupted = false;
        Ok(())
    }

    fn writeback(&self, dev: &mut dyn BlockDevice, spt: &PartitionTable) -> RsuResult<()> {
        let (cpb0, cpb1) = copies(spt)?;
        for part in [&cpb0, &cpb1] {
            spt.erase_part(dev, part)?;
            commit_copy(dev, spt.device_offset(part)?, self.table.as_bytes())?;
            debug!(copy = %part.name, "priority table written");
        }
        Ok(())
    }

    /// Program one slot in place in both copies, without erasing
    ///
    /// Only clears bits: the new value must be a subset of the old one.
    fn update(
        &mut self,
        dev: &mut dyn BlockDevice,
        spt: &PartitionTable,
        index: usize,
        value: u64,
    ) -> RsuResult<()> {
        let old = self
            .table
            .slot(index)
            .ok_or_else(|| RsuError::InvalidArgument(format!("no priority slot {index}")))?;
        if old & value != value {
            return Err(RsuError::InvalidArgument(format!(
                "priority slot {index} holds {old:#x}, cannot program {value:#x} without erase"
            )));
        }
        self.table.set_slot(index, value);

        let (cpb0, cpb1) = copies(spt)?;
        for part in [&cpb0, &cpb1] {
            spt.write_part(dev, part, 0, self.table.as_bytes())?;
        }
        debug!(index, value = format_args!("{value:#x}"), "priority slot updated");
        Ok(())
    }

    fn reload_after_failure(
        &mut self,
        dev: &mut dyn BlockDevice,
        spt: &PartitionTable,
        attrs: &dyn AttributeStore,
        err: RsuError,
    ) -> RsuError {
        if let Err(reload) = self.load(dev, spt, attrs) {
            warn!(%reload, "priority table reload after failed update");
        }
        err
    }

    /// Boot priority of the partition at `offset`
    pub fn priority(&self, offset: u64) -> RsuResult<u32> {
        Ok(self.table()?.priority_of(offset))
    }

    /// Make `offset` the highest-priority boot entry
    pub fn add(
        &mut self,
        dev: &mut dyn BlockDevice,
        spt: &PartitionTable,
        attrs: &dyn AttributeStore,
        offset: u64,
    ) -> RsuResult<()> {
        let table = self.table()?;

        if let Some(index) = table.first_free() {
            if let Err(err) = self.update(dev, spt, index, offset) {
                return Err(self.reload_after_failure(dev, spt, attrs, err));
            }
            return self.load(dev, spt, attrs);
        }

        warn!("priority table full, compacting");
        self.table.compact_with(offset)?;
        self.writeback(dev, spt)?;
        self.load(dev, spt, attrs)
    }

    /// Retire every entry for `offset`
    pub fn remove(
        &mut self,
        dev: &mut dyn BlockDevice,
        spt: &PartitionTable,
        attrs: &dyn AttributeStore,
        offset: u64,
    ) -> RsuResult<()> {
        let matching: Vec<usize> = self
            .table()?
            .slots()
            .into_iter()
            .enumerate()
            .filter(|&(_, v)| v == offset)
            .map(|(i, _)| i)
            .collect();

        for index in matching {
            if let Err(err) = self.update(dev, spt, index, POINTER_SPENT) {
                return Err(self.reload_after_failure(dev, spt, attrs, err));
            }
        }
        self.load(dev, spt, attrs)
    }

    /// Write a fresh table to both copies and reload it from flash
    ///
    /// The firmware `state` is not consulted: it describes the copies as
    /// they were before this rewrite.
    pub fn empty(&mut self, dev: &mut dyn BlockDevice, spt: &PartitionTable) -> RsuResult<()> {
        warn!("writing an empty priority table");
        self.table = PriorityTable::fresh();
        self.writeback(dev, spt)?;
        self.load_copies(dev, spt, false)
    }

    /// Save the raw CPB0 copy plus a CRC trailer to `path`
    pub fn save(&self, dev: &mut dyn BlockDevice, spt: &PartitionTable, path: &Path) -> RsuResult<()> {
        self.table()?;
        let (cpb0, _) = copies(spt)?;
        let mut buf = vec![0u8; CPB_SIZE];
        spt.read_part(dev, &cpb0, 0, &mut buf)?;
        write_saved(path, &buf)
    }

    /// Replace both copies with a table saved by [`save`](Self::save)
    pub fn restore(
        &mut self,
        dev: &mut dyn BlockDevice,
        spt: &PartitionTable,
        path: &Path,
    ) -> RsuResult<()> {
        let bytes = read_saved(path, CPB_SIZE, CPB_MAGIC)?;
        self.table = PriorityTable::from_bytes(&bytes)
            .ok_or_else(|| RsuError::InvalidImage(format!("{} is truncated", path.display())))?;
        warn!(path = ?path, "restoring priority table from file");
        self.writeback(dev, spt)?;
        self.load_copies(dev, spt, false)
    }
}
