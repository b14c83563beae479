//! Convenience re-exports for tests

pub use crate::TestResult;
pub use crate::image::{ImageBuilder, crc_matches, pointers_at, seal};
pub use crate::layout::{BASE, FlashLayout, LayoutEntry};
pub use crate::must::{must, must_some};
pub use crate::shared::SharedDevice;
