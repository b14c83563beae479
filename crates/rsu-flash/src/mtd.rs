//! Linux MTD character device backend ("qspi" root)
//!
//! Geometry comes from `MEMGETINFO` and erase goes through `MEMERASE`.
//! Reads and writes are positional I/O on the `/dev/mtdN` node, which the
//! kernel driver turns into flash page programs.

#![expect(
    unsafe_code,
    reason = "MTD geometry and erase are only reachable through ioctl"
)]

use crate::device::{BlockDevice, check_erase_alignment, check_range};
use crate::error::FlashError;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

const MTD_IOCTL_TYPE: u8 = b'M';
const MTD_NR_GETINFO: u8 = 1;
const MTD_NR_ERASE: u8 = 2;

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const MTD_WRITEABLE: u32 = 0x400;
const MTD_BIT_WRITEABLE: u32 = 0x800;
const MTD_NO_ERASE: u32 = 0x1000;
const MTD_POWERUP_LOCK: u32 = 0x2000;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct MtdInfoUser {
    kind: u8,
    flags: u32,
    size: u32,
    erasesize: u32,
    writesize: u32,
    oobsize: u32,
    padding: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct EraseInfoUser {
    start: u32,
    length: u32,
}

const fn ioctl_code(direction: u32, kind: u8, nr: u8, size: usize) -> libc::c_ulong {
    ((direction << IOC_DIRSHIFT)
        | ((kind as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)) as libc::c_ulong
}

const MEMGETINFO: libc::c_ulong = ioctl_code(
    IOC_READ,
    MTD_IOCTL_TYPE,
    MTD_NR_GETINFO,
    std::mem::size_of::<MtdInfoUser>(),
);

const MEMERASE: libc::c_ulong = ioctl_code(
    IOC_WRITE,
    MTD_IOCTL_TYPE,
    MTD_NR_ERASE,
    std::mem::size_of::<EraseInfoUser>(),
);

fn type_name(kind: u8) -> &'static str {
    match kind {
        0 => "ABSENT",
        1 => "RAM",
        2 => "ROM",
        3 => "NORFLASH",
        4 => "NANDFLASH",
        6 => "DATAFLASH",
        7 => "UBIVOLUME",
        8 => "MLCNANDFLASH",
        _ => "[UNKNOWN]",
    }
}

/// Geometry reported by the MTD driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtdGeometry {
    /// Raw MTD type code
    pub kind: u8,
    /// Capability flags
    pub flags: u32,
    /// Device size in bytes
    pub size: u32,
    /// Erase block size in bytes
    pub erase_size: u32,
    /// Minimal program unit in bytes
    pub write_size: u32,
}

impl MtdGeometry {
    /// Human-readable type name
    pub fn type_name(&self) -> &'static str {
        type_name(self.kind)
    }
}

/// An opened `/dev/mtdN` device
#[derive(Debug)]
pub struct MtdDevice {
    path: PathBuf,
    file: File,
    geometry: MtdGeometry,
}

impl MtdDevice {
    /// Open an MTD node and query its geometry
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FlashError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|e| FlashError::open(path, e))?;

        let mut info = MtdInfoUser::default();
        // SAFETY: `file` is an open descriptor for the lifetime of the call and
        // `info` is a writable repr(C) struct of the size encoded in MEMGETINFO.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), MEMGETINFO, &mut info) };
        if rc < 0 {
            return Err(FlashError::open(path, std::io::Error::last_os_error()));
        }

        let geometry = MtdGeometry {
            kind: info.kind,
            flags: info.flags,
            size: info.size,
            erase_size: info.erasesize,
            write_size: info.writesize,
        };

        debug!(
            path = ?path,
            kind = geometry.kind,
            type_name = geometry.type_name(),
            size = geometry.size,
            erase_size = geometry.erase_size,
            write_size = geometry.write_size,
            "opened MTD device"
        );
        for (bit, name) in [
            (MTD_WRITEABLE, "MTD_WRITEABLE"),
            (MTD_BIT_WRITEABLE, "MTD_BIT_WRITEABLE"),
            (MTD_NO_ERASE, "MTD_NO_ERASE"),
            (MTD_POWERUP_LOCK, "MTD_POWERUP_LOCK"),
        ] {
            if geometry.flags & bit != 0 {
                debug!(flag = name, "MTD capability");
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            geometry,
        })
    }

    /// Device node path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Geometry reported at open
    pub fn geometry(&self) -> MtdGeometry {
        self.geometry
    }
}

impl BlockDevice for MtdDevice {
    fn size(&self) -> u64 {
        u64::from(self.geometry.size)
    }

    fn erase_size(&self) -> u32 {
        self.geometry.erase_size
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), FlashError> {
        check_range(self.size(), offset, buf.len() as u64)?;
        self.file
            .read_exact_at(buf, offset)
            .map_err(|e| FlashError::io("read", offset, e))
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FlashError> {
        check_range(self.size(), offset, data.len() as u64)?;
        self.file
            .write_all_at(data, offset)
            .map_err(|e| FlashError::io("write", offset, e))
    }

    fn erase(&mut self, offset: u64, len: u64) -> Result<(), FlashError> {
        check_range(self.size(), offset, len)?;
        check_erase_alignment(self.geometry.erase_size, offset, len)?;

        let range_error = FlashError::OutOfRange {
            offset,
            len,
            size: self.size(),
        };
        let (Ok(start), Ok(length)) = (u32::try_from(offset), u32::try_from(len)) else {
            return Err(range_error);
        };

        let mut erase = EraseInfoUser { start, length };
        // SAFETY: `self.file` stays open for the call and `erase` is a repr(C)
        // struct of the size encoded in MEMERASE; the kernel only reads it.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), MEMERASE, &mut erase) };
        if rc < 0 {
            return Err(FlashError::io(
                "erase",
                offset,
                std::io::Error::last_os_error(),
            ));
        }

        debug!(offset, len, "MTD erase");
        Ok(())
    }
}
