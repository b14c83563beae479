//! Commonly used RSU session types

pub use crate::attr::{AttributeStore, MemoryAttributeStore, SysfsAttributeStore};
pub use crate::config::{RootType, RsuConfig};
pub use crate::error::{RsuError, RsuResult};
pub use crate::session::Session;
pub use crate::slot::SlotInfo;
pub use crate::spt::Partition;
pub use crate::status::{DcmfVersion, StatusInfo};
