//! Checked little-endian field access over owned table buffers, the
//! two-phase copy commit and the saved-table file format

use crate::error::{RsuError, RsuResult};
use rsu_flash::{BlockDevice, FlashError};
use std::path::Path;
use tracing::debug;

/// Magic written while a table copy is being rewritten
pub const INVALID_MAGIC: u32 = 0xFFFF_FFFF;

/// Length of the CRC trailer of a saved table file
pub const SAVED_CRC_LEN: usize = 4;

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    buf.get(at..)
        .and_then(|rest| rest.first_chunk::<4>())
        .map_or(0, |bytes| u32::from_le_bytes(*bytes))
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    buf.get(at..)
        .and_then(|rest| rest.first_chunk::<8>())
        .map_or(0, |bytes| u64::from_le_bytes(*bytes))
}

pub(crate) fn write_bytes(buf: &mut [u8], at: usize, bytes: &[u8]) {
    if let Some(dst) = buf.get_mut(at..at.saturating_add(bytes.len())) {
        dst.copy_from_slice(bytes);
    }
}

pub(crate) fn write_u32(buf: &mut [u8], at: usize, value: u32) {
    write_bytes(buf, at, &value.to_le_bytes());
}

pub(crate) fn write_u64(buf: &mut [u8], at: usize, value: u64) {
    write_bytes(buf, at, &value.to_le_bytes());
}

/// Copy `bytes` into a fresh buffer of exactly `size` bytes
pub(crate) fn exact(bytes: &[u8], size: usize) -> Option<Vec<u8>> {
    bytes.get(..size).map(<[u8]>::to_vec)
}

/// Plain CRC32 used by saved table files
pub(crate) fn file_crc(table: &[u8]) -> u32 {
    crc32fast::hash(table)
}

/// Write one table copy so a torn write never carries a valid magic
///
/// The table goes out with [`INVALID_MAGIC`] first; the real magic is
/// written on its own as the final step.
pub(crate) fn commit_copy(
    dev: &mut dyn BlockDevice,
    offset: u64,
    table: &[u8],
) -> Result<(), FlashError> {
    let mut staged = table.to_vec();
    write_u32(&mut staged, 0, INVALID_MAGIC);
    dev.write(offset, &staged)?;
    dev.write(offset, table.get(..4).unwrap_or_default())
}

/// Store `table` followed by its plain CRC32 (little-endian)
pub(crate) fn write_saved(path: &Path, table: &[u8]) -> RsuResult<()> {
    let crc = file_crc(table);
    let mut out = Vec::with_capacity(table.len() + SAVED_CRC_LEN);
    out.extend_from_slice(table);
    out.extend_from_slice(&crc.to_le_bytes());
    std::fs::write(path, out).map_err(|e| RsuError::io(path, e))?;
    debug!(path = ?path, crc = format_args!("{crc:#010x}"), "saved table");
    Ok(())
}

/// Load a saved table, checking its length, trailing CRC and magic
pub(crate) fn read_saved(path: &Path, size: usize, magic: u32) -> RsuResult<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|e| RsuError::io(path, e))?;
    let (Some(table), Some(trailer)) = (
        bytes.get(..size),
        bytes.get(size..).and_then(|rest| rest.first_chunk::<SAVED_CRC_LEN>()),
    ) else {
        return Err(RsuError::InvalidImage(format!(
            "{} holds {} bytes, expected at least {}",
            path.display(),
            bytes.len(),
            size + SAVED_CRC_LEN
        )));
    };

    let stored = u32::from_le_bytes(*trailer);
    let computed = file_crc(table);
    if stored != computed {
        return Err(RsuError::InvalidImage(format!(
            "{} is corrupted: crc {stored:#010x}, expected {computed:#010x}",
            path.display()
        )));
    }

    let found = read_u32(table, 0);
    if found != magic {
        return Err(RsuError::InvalidImage(format!(
            "{} has magic {found:#010x}, expected {magic:#010x}",
            path.display()
        )));
    }

    Ok(table.to_vec())
}
