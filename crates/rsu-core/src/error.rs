//! Error taxonomy for RSU sessions
//!
//! Every public operation returns an [`RsuError`] kind specific enough for a
//! caller to decide whether a restore-from-file is needed before retrying
//! (see [`RsuError::requires_restore`]).

use crate::attr::AttributeError;
use crate::config::ConfigError;
use rsu_flash::FlashError;
use rsu_image::ImageError;
use thiserror::Error;

/// Errors returned by RSU session operations
#[derive(Error, Debug)]
pub enum RsuError {
    /// Operation attempted on a closed session
    #[error("session is not open")]
    NotInitialized,

    /// Caller-supplied argument rejected
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Slot number does not map to a partition
    #[error("unknown slot {0}")]
    UnknownSlot(usize),

    /// No slot carries the requested name
    #[error("no slot named '{0}'")]
    SlotNotFound(String),

    /// Name already used by another partition
    #[error("partition name '{0}' already in use")]
    NameInUse(String),

    /// Name is reserved, empty or too long
    #[error("invalid partition name '{name}': {reason}")]
    InvalidName {
        /// Rejected name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Partition start or size is not a multiple of the erase unit
    #[error("{what} {value:#x} not aligned to erase unit {erase_size:#x}")]
    InvalidAlignment {
        /// Which value is misaligned
        what: &'static str,
        /// Offending value
        value: u64,
        /// Device erase unit
        erase_size: u32,
    },

    /// New partition intersects an existing one
    #[error("range {start:#x}..{end:#x} overlaps partition '{existing}'")]
    Overlap {
        /// Requested start
        start: u64,
        /// Requested end
        end: u64,
        /// Name of the overlapped partition
        existing: String,
    },

    /// Table has no room for another entry
    #[error("{0} is full")]
    TableFull(&'static str),

    /// Slot is write-protected by configuration
    #[error("slot {0} is write-protected")]
    WriteProtected(usize),

    /// Slot is not in the boot order
    #[error("slot {0} is erased")]
    AlreadyErased(usize),

    /// Slot is already in the boot order
    #[error("slot {0} is already in use")]
    AlreadyInUse(usize),

    /// Image does not fit the slot
    #[error("image of at least {needed:#x} bytes exceeds slot size {size:#x}")]
    SizeExceeded {
        /// Bytes the image needs
        needed: u64,
        /// Slot size
        size: u64,
    },

    /// Flash contents differ from the expected data
    #[error("compare mismatch at slot offset {offset:#x}")]
    CompareMismatch {
        /// Slot-relative offset of the first differing byte
        offset: u64,
    },

    /// Signature block CRC check failed
    #[error("bad checksum in image block at {offset:#x}")]
    BadChecksum {
        /// Image offset of the failing block
        offset: u64,
    },

    /// Image pointer table is unusable for this slot
    #[error("image pointer error: {0}")]
    PointerOutOfRange(#[source] ImageError),

    /// Image or saved table file is malformed
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Block device access failed
    #[error("flash device failure")]
    DeviceIoFailure(#[from] FlashError),

    /// Image source returned a read error
    #[error("image source read failed")]
    SourceRead(#[source] std::io::Error),

    /// Local file access failed
    #[error("file I/O failed on {path}")]
    Io {
        /// File involved
        path: std::path::PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file problem
    #[error("configuration error")]
    Config(#[from] ConfigError),

    /// Attribute store access failed
    #[error("device attribute error")]
    Attribute(#[from] AttributeError),

    /// No valid partition table copy; restore from file required
    #[error("partition table is corrupted")]
    CorruptedPartitionTable,

    /// No valid priority table copy; restore or empty required
    #[error("priority table is corrupted")]
    CorruptedPriorityTable,

    /// Both copies pass validation but differ
    #[error("{0} copies are individually valid but differ")]
    InconsistentRedundantCopies(&'static str),

    /// Flash has no FACTORY_IMAGE partition
    #[error("no FACTORY_IMAGE partition")]
    FactoryImageMissing,

    /// Firmware does not implement the requested feature
    #[error("firmware does not support {0}")]
    UnsupportedFirmware(&'static str),
}

/// Why one physical table copy was rejected during load
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableDefect {
    /// Magic number does not match
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    /// Stored table checksum does not match
    #[error("bad table checksum")]
    BadChecksum,

    /// Entry count exceeds the table capacity
    #[error("{count} entries exceed the maximum of {max}")]
    TooManyEntries {
        /// Declared count
        count: u32,
        /// Capacity
        max: usize,
    },

    /// Two partitions share a name
    #[error("partition name '{0}' appears more than once")]
    DuplicateName(String),

    /// Two partitions share flash
    #[error("partitions '{0}' and '{1}' overlap")]
    Overlap(String, String),

    /// One of SPT0, SPT1, CPB0, CPB1 is missing
    #[error("missing critical entry {0}")]
    MissingEntry(&'static str),

    /// Header fields describe a pointer array outside the table
    #[error("pointer array at {offset:#x} with {slots} slots exceeds table size")]
    PointerArrayOutOfBounds {
        /// Declared array offset
        offset: u32,
        /// Declared slot count
        slots: u32,
    },

    /// Boot-order entry names no partition
    #[error("boot entry {slot} = {value:#x} is not a partition offset")]
    UnknownPointer {
        /// Array index
        slot: usize,
        /// Stored value
        value: u64,
    },

    /// Boot-order entry names a reserved partition
    #[error("boot entry {slot} points at reserved partition '{name}'")]
    ReservedPointer {
        /// Array index
        slot: usize,
        /// Partition name
        name: String,
    },

    /// Copy could not be read
    #[error("copy unreadable")]
    Unreadable,
}

/// Result alias for RSU operations
pub type RsuResult<T> = Result<T, RsuError>;

impl RsuError {
    /// Build an [`RsuError::Io`] for a path
    pub fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether on-flash metadata is damaged
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptedPartitionTable
                | Self::CorruptedPriorityTable
                | Self::InconsistentRedundantCopies(_)
        )
    }

    /// Whether a restore-from-file is needed before retrying
    pub fn requires_restore(&self) -> bool {
        self.is_corruption()
    }

    /// Stable process exit code for this error kind
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NotInitialized => 1,
            Self::Config(_) => 2,
            Self::UnknownSlot(_) => 3,
            Self::FactoryImageMissing | Self::InvalidImage(_) => 4,
            Self::AlreadyErased(_) => 5,
            Self::AlreadyInUse(_)
            | Self::BadChecksum { .. }
            | Self::PointerOutOfRange(_)
            | Self::TableFull(_)
            | Self::Overlap { .. }
            | Self::InvalidAlignment { .. } => 6,
            Self::CompareMismatch { .. } => 7,
            Self::SizeExceeded { .. } => 8,
            Self::NameInUse(_) | Self::InvalidName { .. } | Self::SlotNotFound(_) => 9,
            Self::Io { .. } | Self::Attribute(_) | Self::UnsupportedFirmware(_) => 10,
            Self::SourceRead(_) => 11,
            Self::DeviceIoFailure(_)
            | Self::CorruptedPartitionTable
            | Self::CorruptedPriorityTable
            | Self::InconsistentRedundantCopies(_) => 12,
            Self::WriteProtected(_) => 13,
            Self::InvalidArgument(_) => 14,
        }
    }
}

impl From<ImageError> for RsuError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::BadChecksum { offset, .. } => Self::BadChecksum { offset },
            ImageError::CompareMismatch { offset } => Self::CompareMismatch { offset },
            ImageError::TruncatedSignatureBlock { .. } => Self::InvalidImage(err.to_string()),
            ImageError::PointerOutOfRange { .. }
            | ImageError::TooManyPointers { .. }
            | ImageError::TooManySections { .. } => Self::PointerOutOfRange(err),
        }
    }
}
