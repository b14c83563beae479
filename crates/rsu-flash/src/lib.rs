//! Block device port for RSU flash
//!
//! Every table store and the slot facade talk to flash through the
//! [`BlockDevice`] trait: a flat byte address space with `read`, `write`
//! and `erase`. This crate provides the backends:
//!
//! - [`FileDevice`]: a regular file standing in for the chip (erase unit 0,
//!   erase simulated with 0xFF fill)
//! - [`MtdDevice`]: a Linux `/dev/mtdN` node driven through MTD ioctls
//! - [`ConcatDevice`]: several devices joined into one address space
//! - [`MemoryDevice`]: RAM-backed flash with access counters and fault
//!   injection, for tests and host tooling
//!
//! # Example
//!
//! ```
//! use rsu_flash::prelude::*;
//!
//! # fn main() -> Result<(), FlashError> {
//! let mut dev = MemoryDevice::new(0x2000, 0x1000);
//! dev.write(0x10, b"RSU")?;
//! dev.erase(0, 0x1000)?;
//! assert_eq!(dev.read_vec(0x10, 3)?, vec![0xFF; 3]);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod concat;
pub mod device;
pub mod error;
pub mod file;
pub mod memory;
#[cfg(target_os = "linux")]
#[cfg_attr(docsrs, doc(cfg(target_os = "linux")))]
pub mod mtd;
pub mod prelude;

pub use concat::{ConcatDevice, Extent};
pub use device::{
    BlockDevice, ERASED_BYTE, FILL_CHUNK, check_erase_alignment, check_range, fill_erased,
};
pub use error::{FlashError, FlashResult};
pub use file::FileDevice;
pub use memory::{IoStats, MemoryDevice};
#[cfg(target_os = "linux")]
pub use mtd::{MtdDevice, MtdGeometry};
