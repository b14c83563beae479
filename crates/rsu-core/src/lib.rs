//! Redundant flash tables, slot management and firmware status for RSU
//!
//! A remote system update flash carries two tables, each stored twice:
//!
//! - the sub-partition table (SPT) naming every partition and its extent
//! - the configuration pointer block (CPB) listing boot candidates, the
//!   most recently added one booting first
//!
//! [`PartitionStore`](spt::PartitionStore) and
//! [`PriorityStore`](cpb::PriorityStore) load both copies, repair a single
//! damaged copy from the other, and rewrite both copies on every change.
//! [`Session`] ties the tables to a flash backend and an attribute store
//! and exposes slots: the partitions a user may program, verify, enable,
//! disable and erase.
//!
//! # Example
//!
//! ```
//! use rsu_core::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config: RsuConfig = "root datafile /tmp/flash.bin\nwrite-protect 0\n".parse()?;
//! assert!(config.is_write_protected(0));
//! assert!(!config.is_write_protected(1));
//! assert_eq!(config.root()?.kind, RootType::Datafile);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod attr;
mod codec;
pub mod config;
pub mod cpb;
pub mod error;
pub mod prelude;
pub mod session;
pub mod slot;
pub mod spt;
pub mod status;

pub use attr::{AttributeError, AttributeStore, MemoryAttributeStore, SysfsAttributeStore};
pub use codec::{INVALID_MAGIC, SAVED_CRC_LEN};
pub use config::{ConfigError, LogLevel, LogTarget, RootSpec, RootType, RsuConfig};
pub use error::{RsuError, RsuResult, TableDefect};
pub use session::{Session, open_device};
pub use slot::{RESERVED_NAMES, SlotInfo, is_reserved_name};
pub use spt::Partition;
pub use status::{DcmfVersion, StatusInfo};
