//! Shared test utilities for the RSU crates.
//!
//! The fixtures here encode flash contents byte by byte without going
//! through the codecs under test, so a decoder bug cannot cancel out an
//! identical encoder bug.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helpers with `#[track_caller]`
//! - [`layout`] - Flash images with a partition table and priority table
//! - [`image`] - Bitstream images with header and signature blocks
//! - [`shared`] - A memory device observable after being boxed
//! - [`prelude`] - Convenience re-exports
//!
//! # Usage
//!
//! ```rust,ignore
//! use rsu_test_helpers::prelude::*;
//!
//! let layout = FlashLayout::standard().boot_order(&[0x0012_0000]);
//! let dev = layout.device();
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::unwrap_used, clippy::panic)]

pub mod image;
pub mod layout;
pub mod must;
pub mod prelude;
pub mod shared;

pub use must::*;

/// Result type for tests that propagate errors with `?`
pub type TestResult = Result<(), Box<dyn std::error::Error>>;
