//! Image engine errors

use thiserror::Error;

/// Errors raised while relocating or verifying a boot image
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// Signature block CRC does not match its contents
    #[error("bad signature block CRC at {offset:#x}: stored {stored:#010x}, computed {computed:#010x}")]
    BadChecksum {
        /// Stream offset of the signature block
        offset: u64,
        /// CRC decoded from the block
        stored: u32,
        /// CRC computed over the block
        computed: u32,
    },

    /// A section pointer falls outside the destination slot
    #[error("pointer {pointer:#x} in block {offset:#x} outside [{start:#x}, {end:#x})")]
    PointerOutOfRange {
        /// Stream offset of the signature block
        offset: u64,
        /// Offending pointer value
        pointer: u64,
        /// Lowest accepted value
        start: u64,
        /// One past the highest accepted value
        end: u64,
    },

    /// Pointer table declares more entries than it can hold
    #[error("signature block at {offset:#x} declares {count} pointers")]
    TooManyPointers {
        /// Stream offset of the signature block
        offset: u64,
        /// Declared pointer count
        count: u32,
    },

    /// More sections than the engine tracks
    #[error("section limit reached at {offset:#x}")]
    TooManySections {
        /// Stream offset of the signature block
        offset: u64,
    },

    /// Expected and stored contents differ
    #[error("compare mismatch at image offset {offset:#x}")]
    CompareMismatch {
        /// Stream offset of the first differing byte
        offset: u64,
    },

    /// Signature block shorter than a full block
    #[error("signature block at {offset:#x} truncated to {len} bytes")]
    TruncatedSignatureBlock {
        /// Stream offset of the block
        offset: u64,
        /// Bytes available
        len: usize,
    },
}

/// Result alias for image engine operations
pub type ImageResult<T> = Result<T, ImageError>;
