//! Flash images carrying both copies of the partition and priority tables.
//!
//! [`FlashLayout::standard`] models the upper megabyte of a QSPI flash: the
//! device starts at absolute offset [`BASE`], where SPT0 lives, and the
//! boot info and factory image partitions sit below it, outside the device.

use rsu_flash::MemoryDevice;

/// Absolute flash offset of device byte 0
pub const BASE: u64 = 0x0010_0000;

const DEVICE_SIZE: usize = 0x0010_0000;
const TABLE_SIZE: usize = 4096;

const SPT_MAGIC: u32 = 0x5771_3427;
const SPT_ENTRIES_AT: usize = 0x20;
const SPT_ENTRY_SIZE: usize = 32;
const SPT_CHECKSUM_AT: usize = 0x0C;

const CPB_MAGIC: u32 = 0x5778_9609;
const CPB_HEADER_SIZE: u32 = 24;
const CPB_SLOTS: usize = 508;

/// One partition record of a fixture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    /// Partition name
    pub name: String,
    /// Absolute offset
    pub offset: u64,
    /// Length in bytes
    pub length: u32,
    /// Flag bits
    pub flags: u32,
}

/// Builder for a flash image with valid, identical table copies
#[derive(Debug, Clone)]
pub struct FlashLayout {
    entries: Vec<LayoutEntry>,
    erase_size: u32,
    version: u32,
    checksum: bool,
    slots: Vec<u64>,
}

fn put(buf: &mut [u8], at: usize, bytes: &[u8]) {
    buf[at..at + bytes.len()].copy_from_slice(bytes);
}

impl FlashLayout {
    /// Reserved partitions plus three 256 KiB slots P1..P3
    pub fn standard() -> Self {
        let entry = |name: &str, offset: u64, length: u32, flags: u32| LayoutEntry {
            name: name.to_string(),
            offset,
            length,
            flags,
        };
        Self {
            entries: vec![
                entry("BOOT_INFO", 0, 0x1_0000, 3),
                entry("FACTORY_IMAGE", 0x1_0000, 0xF_0000, 3),
                entry("SPT0", 0x10_0000, 0x8000, 1),
                entry("SPT1", 0x10_8000, 0x8000, 1),
                entry("CPB0", 0x11_0000, 0x8000, 1),
                entry("CPB1", 0x11_8000, 0x8000, 1),
                entry("P1", 0x12_0000, 0x4_0000, 0),
                entry("P2", 0x16_0000, 0x4_0000, 0),
                entry("P3", 0x1A_0000, 0x4_0000, 0),
            ],
            erase_size: 0,
            version: 0,
            checksum: false,
            slots: vec![u64::MAX; CPB_SLOTS],
        }
    }

    /// Erase unit of the device returned by [`device`](Self::device)
    pub fn erase_size(mut self, erase_size: u32) -> Self {
        self.erase_size = erase_size;
        self
    }

    /// Partition table format version
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Fill in the partition table checksum
    pub fn checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    /// Append a partition record
    pub fn partition(mut self, name: &str, offset: u64, length: u32, flags: u32) -> Self {
        self.entries.push(LayoutEntry {
            name: name.to_string(),
            offset,
            length,
            flags,
        });
        self
    }

    /// Drop the record called `name`
    pub fn without(mut self, name: &str) -> Self {
        self.entries.retain(|e| e.name != name);
        self
    }

    /// Boot order, first entry booting first
    ///
    /// The newest priority slot boots first, so the list is stored reversed
    /// from slot 0 and the remaining slots stay free.
    pub fn boot_order(mut self, offsets: &[u64]) -> Self {
        self.slots = vec![u64::MAX; CPB_SLOTS];
        for (slot, &offset) in self.slots.iter_mut().zip(offsets.iter().rev()) {
            *slot = offset;
        }
        self
    }

    /// Raw priority slot values; padded with free slots to 508 entries
    pub fn cpb_slots(mut self, mut slots: Vec<u64>) -> Self {
        slots.resize(CPB_SLOTS, u64::MAX);
        self.slots = slots;
        self
    }

    /// Partition records in table order
    pub fn partitions(&self) -> &[LayoutEntry] {
        &self.entries
    }

    /// Absolute offset of the partition called `name`
    pub fn offset_of(&self, name: &str) -> u64 {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.offset)
            .unwrap_or_else(|| panic!("no partition {name} in layout"))
    }

    /// Device offset of the partition called `name`
    pub fn device_offset_of(&self, name: &str) -> u64 {
        self.offset_of(name) - BASE
    }

    /// Device offset of `name` as a byte index
    pub fn device_index_of(&self, name: &str) -> usize {
        usize::try_from(self.device_offset_of(name)).unwrap()
    }

    /// First absolute offset after the last partition
    pub fn free_offset(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.offset + u64::from(e.length))
            .max()
            .unwrap_or(BASE)
    }

    /// Encoded partition table
    pub fn spt_bytes(&self) -> Vec<u8> {
        let mut table = vec![0xFFu8; TABLE_SIZE];
        put(&mut table, 0, &SPT_MAGIC.to_le_bytes());
        put(&mut table, 4, &self.version.to_le_bytes());
        put(&mut table, 8, &u32::try_from(self.entries.len()).unwrap().to_le_bytes());
        put(&mut table, SPT_CHECKSUM_AT, &[0; 4]);
        put(&mut table, 0x10, &[0; 0x10]);

        for (i, entry) in self.entries.iter().enumerate() {
            let at = SPT_ENTRIES_AT + i * SPT_ENTRY_SIZE;
            let mut name = [0u8; 16];
            let bytes = entry.name.as_bytes();
            name[..bytes.len().min(16)].copy_from_slice(&bytes[..bytes.len().min(16)]);
            put(&mut table, at, &name);
            put(&mut table, at + 16, &entry.offset.to_le_bytes());
            put(&mut table, at + 24, &entry.length.to_le_bytes());
            put(&mut table, at + 28, &entry.flags.to_le_bytes());
        }

        if self.checksum {
            let reversed: Vec<u8> = table.iter().map(|b| b.reverse_bits()).collect();
            let crc = crc32fast::hash(&reversed);
            put(&mut table, SPT_CHECKSUM_AT, &crc.to_be_bytes());
        }
        table
    }

    /// Encoded priority table
    pub fn cpb_bytes(&self) -> Vec<u8> {
        let mut table = vec![0xFFu8; TABLE_SIZE];
        put(&mut table, 0, &CPB_MAGIC.to_le_bytes());
        put(&mut table, 4, &CPB_HEADER_SIZE.to_le_bytes());
        put(&mut table, 8, &u32::try_from(TABLE_SIZE).unwrap().to_le_bytes());
        put(&mut table, 12, &0u32.to_le_bytes());
        put(&mut table, 16, &CPB_HEADER_SIZE.to_le_bytes());
        put(&mut table, 20, &u32::try_from(CPB_SLOTS).unwrap().to_le_bytes());
        for (i, value) in self.slots.iter().enumerate() {
            put(&mut table, 24 + i * 8, &value.to_le_bytes());
        }
        table
    }

    /// Whole device image: erased flash with both copies of each table
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut image = vec![0xFFu8; DEVICE_SIZE];
        let spt = self.spt_bytes();
        put(&mut image, 0, &spt);
        put(&mut image, 0x8000, &spt);

        let cpb = self.cpb_bytes();
        for name in ["CPB0", "CPB1"] {
            if self.entries.iter().any(|e| e.name == name) {
                put(&mut image, self.device_index_of(name), &cpb);
            }
        }
        image
    }

    /// RAM device holding [`to_bytes`](Self::to_bytes)
    pub fn device(&self) -> MemoryDevice {
        MemoryDevice::from_bytes(self.to_bytes(), self.erase_size)
    }
}
