//! Commonly used image engine items

pub use crate::error::{ImageError, ImageResult};
pub use crate::state::{BlockKind, ImageState, SlotBounds, program_image, verify_image};
pub use crate::{BLOCK_SIZE, CMF_MAGIC};
