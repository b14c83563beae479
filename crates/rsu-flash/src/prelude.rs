//! Commonly used block device types

pub use crate::concat::{ConcatDevice, Extent};
pub use crate::device::{BlockDevice, ERASED_BYTE};
pub use crate::error::{FlashError, FlashResult};
pub use crate::file::FileDevice;
pub use crate::memory::{IoStats, MemoryDevice};
#[cfg(target_os = "linux")]
pub use crate::mtd::{MtdDevice, MtdGeometry};
