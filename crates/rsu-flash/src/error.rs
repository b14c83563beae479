//! Error types for block device access

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a [`BlockDevice`](crate::BlockDevice) backend
#[derive(Error, Debug)]
pub enum FlashError {
    /// Access falls outside the device address space
    #[error("access {offset:#x}+{len:#x} outside device of size {size:#x}")]
    OutOfRange {
        /// Requested start offset
        offset: u64,
        /// Requested length in bytes
        len: u64,
        /// Device size in bytes
        size: u64,
    },

    /// Erase request not aligned to the erase unit
    #[error("erase {offset:#x}+{len:#x} not aligned to erase unit {erase_size:#x}")]
    Misaligned {
        /// Requested start offset
        offset: u64,
        /// Requested length in bytes
        len: u64,
        /// Device erase unit in bytes
        erase_size: u32,
    },

    /// Device could not be opened or probed
    #[error("cannot open flash device {path}: {source}")]
    Open {
        /// Device path
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// A read, write or erase failed at the OS level
    #[error("{op} failed at {offset:#x}: {source}")]
    Io {
        /// Operation name
        op: &'static str,
        /// Device offset of the failed access
        offset: u64,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Concatenated devices disagree on their erase unit
    #[error("erase unit mismatch: device {index} has {found:#x}, expected {expected:#x}")]
    EraseSizeMismatch {
        /// Index of the offending device
        index: usize,
        /// Erase unit of the first device
        expected: u32,
        /// Erase unit of the offending device
        found: u32,
    },

    /// A concatenated device was built with no members
    #[error("no flash devices given")]
    NoDevices,

    /// Write rejected by an injected fault window (test backends only)
    #[error("injected write fault at {offset:#x}")]
    InjectedFault {
        /// Offset of the rejected write
        offset: u64,
    },
}

/// Result alias for block device operations
pub type FlashResult<T> = Result<T, FlashError>;

impl FlashError {
    /// Create an I/O error for the given operation and offset
    pub fn io(op: &'static str, offset: u64, source: std::io::Error) -> Self {
        Self::Io { op, offset, source }
    }

    /// Create an open error for a device path
    pub fn open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is caused by the request itself rather than the device
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::OutOfRange { .. } | Self::Misaligned { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_message() {
        let err = FlashError::OutOfRange {
            offset: 0x1000,
            len: 0x20,
            size: 0x1000,
        };
        assert_eq!(
            err.to_string(),
            "access 0x1000+0x20 outside device of size 0x1000"
        );
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_io_helper() {
        let err = FlashError::io("write", 0x40, std::io::Error::other("boom"));
        assert_eq!(err.to_string(), "write failed at 0x40: boom");
        assert!(!err.is_caller_error());
    }
}
