//! Boot image relocation and verification for RSU slots
//!
//! Bitstreams are written into flash slots one 4 KiB block at a time. Some
//! of those blocks, the signature blocks, embed pointers to other sections
//! of the same image plus a CRC32 guarding the whole block. An image built
//! for offset zero ("relative") has to have those pointers rebased when it
//! lands in a slot; an image built for its final location ("absolute") must
//! be written untouched.
//!
//! [`ImageState`] is the per-call state machine driving both directions:
//!
//! - [`ImageState::program_block`] rewrites blocks before they are written
//! - [`ImageState::verify_block`] compares flash against the expected result
//!
//! # Example
//!
//! ```
//! use rsu_image::prelude::*;
//!
//! # fn main() -> Result<(), ImageError> {
//! let bounds = SlotBounds::new(0x0100_0000, 0x0080_0000);
//! let mut image = vec![0u8; 3 * BLOCK_SIZE];
//! let state = program_image(bounds, &mut image)?;
//! assert!(!state.is_absolute());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod crc;
pub mod error;
pub mod pointer;
pub mod prelude;
pub mod state;

pub use crc::{bit_reversed_crc32, compute_block_crc, refresh_block_crc, stored_block_crc};
pub use error::{ImageError, ImageResult};
pub use pointer::PointerTable;
pub use state::{BlockKind, ImageState, SlotBounds, program_image, verify_image};

/// Image block size in bytes
pub const BLOCK_SIZE: usize = 0x1000;

/// Offset of the pointer table inside a signature block
pub const POINTER_OFFSET: usize = 0x0F00;

/// Offset of the CRC field inside a signature block
pub const CRC_OFFSET: usize = 0x0FFC;

/// First word of a header block that is followed by a signature block
pub const CMF_MAGIC: u32 = 0x6229_4895;

/// Most sections tracked per image, including the implicit one at zero
pub const MAX_SECTIONS: usize = 64;

/// Pointer slots in one signature block
pub const MAX_POINTERS: usize = 4;
