//! Firmware status, notification and reboot requests
//!
//! These go through the attribute store only, except where a partition
//! offset has to be looked up in the loaded partition table.

use crate::attr::AttributeStore;
use crate::error::{RsuError, RsuResult};
use crate::session::Session;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Low 16 bits of a notify value carry the HPS stage
pub const NOTIFY_VALUE_MASK: u64 = 0xFFFF;

/// Notify flag: do not record a stage value
pub const NOTIFY_IGNORE_STAGE: u64 = 1 << 18;

/// Notify flag: clear the recorded error
pub const NOTIFY_CLEAR_ERROR_STATUS: u64 = 1 << 17;

/// Notify flag: zero the retry counter
pub const NOTIFY_RESET_RETRY_COUNTER: u64 = 1 << 16;

/// Number of decision firmware copies
pub const DCMF_COPIES: usize = 4;

const FACTORY_IMAGE: &str = "FACTORY_IMAGE";

/// Snapshot of the firmware status attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusInfo {
    /// Packed version word
    pub version: u64,
    /// Last failure state
    pub state: u64,
    /// Offset of the running image
    pub current_image: u64,
    /// Offset of the image that failed
    pub fail_image: u64,
    /// Where the failure happened
    pub error_location: u64,
    /// Failure details
    pub error_details: u64,
    /// Boot retries so far; 0 when the firmware does not report it
    pub retry_counter: u64,
}

impl StatusInfo {
    /// Error source field of `version`
    pub fn error_source(&self) -> u64 {
        (self.version & 0xFFFF_0000) >> 16
    }

    /// Application firmware interface version
    pub fn acmf_version(&self) -> u64 {
        (self.version & 0xFF00) >> 8
    }

    /// Decision firmware interface version
    pub fn dcmf_version(&self) -> u64 {
        self.version & 0xFF
    }

    fn supports_retry_counter(&self) -> bool {
        self.acmf_version() != 0 && self.dcmf_version() != 0
    }
}

/// Version of one decision firmware copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DcmfVersion {
    /// Raw attribute value
    pub raw: u32,
    /// Major number
    pub major: u8,
    /// Minor number
    pub minor: u8,
    /// Update number
    pub update: u8,
}

impl DcmfVersion {
    /// Decode a `dcmfN` attribute value
    pub fn from_raw(value: u64) -> Self {
        let raw = u32::try_from(value & 0xFFFF_FFFF).unwrap_or_default();
        let [major, minor, update, _] = raw.to_be_bytes();
        Self {
            raw,
            major,
            minor,
            update,
        }
    }
}

impl fmt::Display for DcmfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.update)
    }
}

impl Session {
    /// Read the firmware status attributes
    pub fn status_log(&self) -> RsuResult<StatusInfo> {
        let attrs = self.inner()?.attrs.as_ref();
        let mut info = StatusInfo {
            version: attrs.get("version")?,
            state: attrs.get("state")?,
            current_image: attrs.get("current_image")?,
            fail_image: attrs.get("fail_image")?,
            error_location: attrs.get("error_location")?,
            error_details: attrs.get("error_details")?,
            retry_counter: 0,
        };

        if info.supports_retry_counter() {
            info.retry_counter = attrs.get("retry_counter").unwrap_or_else(|err| {
                warn!(%err, "retry_counter could not be retrieved");
                0
            });
        }
        Ok(info)
    }

    /// Report an HPS stage value to the firmware
    pub fn notify(&mut self, value: u64) -> RsuResult<()> {
        let value = value & NOTIFY_VALUE_MASK;
        self.inner_mut()?.attrs.put("notify", value)?;
        debug!(value = format_args!("{value:#x}"), "notify sent");
        Ok(())
    }

    /// Clear the last recorded error
    pub fn clear_error_status(&mut self) -> RsuResult<()> {
        let info = self.status_log()?;
        if info.acmf_version() == 0 {
            return Err(RsuError::UnsupportedFirmware("clearing the error status"));
        }
        self.inner_mut()?
            .attrs
            .put("notify", NOTIFY_IGNORE_STAGE | NOTIFY_CLEAR_ERROR_STATUS)?;
        info!("error status cleared");
        Ok(())
    }

    /// Zero the firmware retry counter
    pub fn reset_retry_counter(&mut self) -> RsuResult<()> {
        let info = self.status_log()?;
        if !info.supports_retry_counter() {
            return Err(RsuError::UnsupportedFirmware("the retry counter"));
        }
        self.inner_mut()?
            .attrs
            .put("notify", NOTIFY_IGNORE_STAGE | NOTIFY_RESET_RETRY_COUNTER)?;
        info!("retry counter reset");
        Ok(())
    }

    /// Versions of the four decision firmware copies
    pub fn dcmf_version(&self) -> RsuResult<[DcmfVersion; DCMF_COPIES]> {
        let attrs = self.inner()?.attrs.as_ref();
        let mut versions = [DcmfVersion::default(); DCMF_COPIES];
        for (index, version) in versions.iter_mut().enumerate() {
            *version = DcmfVersion::from_raw(attrs.get(&format!("dcmf{index}"))?);
        }
        Ok(versions)
    }

    /// Corruption flags of the four decision firmware copies
    pub fn dcmf_status(&self) -> RsuResult<[bool; DCMF_COPIES]> {
        let attrs = self.inner()?.attrs.as_ref();
        let mut corrupted = [false; DCMF_COPIES];
        for (index, flag) in corrupted.iter_mut().enumerate() {
            *flag = attrs.get(&format!("dcmf{index}_status"))? != 0;
        }
        Ok(corrupted)
    }

    /// Configured maximum boot retry count
    pub fn max_retry(&self) -> RsuResult<u8> {
        let value = self.inner()?.attrs.get("max_retry")?;
        Ok(u8::try_from(value & 0xFF).unwrap_or_default())
    }

    /// Ask the firmware to boot `slot` on the next reboot
    pub fn slot_load_after_reboot(&mut self, slot: usize) -> RsuResult<()> {
        let info = self.slot_info(slot)?;
        if info.priority == 0 {
            warn!(slot, "trying to reboot to an erased slot");
            return Err(RsuError::AlreadyErased(slot));
        }
        self.inner_mut()?.attrs.put("reboot_image", info.offset)?;
        info!(slot, offset = format_args!("{:#x}", info.offset), "reboot image requested");
        Ok(())
    }

    /// Ask the firmware to boot the factory image on the next reboot
    pub fn slot_load_factory_after_reboot(&mut self) -> RsuResult<()> {
        let offset = self.factory_offset()?;
        self.inner_mut()?.attrs.put("reboot_image", offset)?;
        info!(offset = format_args!("{offset:#x}"), "factory image requested");
        Ok(())
    }

    /// Whether the running image is the factory image
    pub fn running_factory(&self) -> RsuResult<bool> {
        let offset = self.factory_offset()?;
        Ok(self.status_log()?.current_image == offset)
    }

    fn factory_offset(&self) -> RsuResult<u64> {
        self.inner()?
            .table()?
            .find(FACTORY_IMAGE)
            .map(|(_, part)| part.offset)
            .ok_or(RsuError::FactoryImageMissing)
    }
}
