//! An open RSU session: configuration, flash backend, attribute store and
//! the two loaded tables
//!
//! All slot, table and status operations hang off [`Session`]. A closed
//! session refuses every operation with [`RsuError::NotInitialized`].

use crate::attr::{AttributeStore, SysfsAttributeStore};
use crate::config::{RootSpec, RootType, RsuConfig};
use crate::cpb::PriorityStore;
use crate::error::{RsuError, RsuResult};
use crate::spt::{Partition, PartitionStore, PartitionTable};
use rsu_flash::{BlockDevice, ConcatDevice, FileDevice};
use std::path::Path;
use tracing::{debug, info, warn};

pub(crate) struct Inner {
    pub(crate) config: RsuConfig,
    pub(crate) dev: Box<dyn BlockDevice>,
    pub(crate) attrs: Box<dyn AttributeStore>,
    pub(crate) spt: PartitionStore,
    pub(crate) cpb: PriorityStore,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("dev_size", &self.dev.size())
            .field("erase_size", &self.dev.erase_size())
            .field("spt_corrupted", &self.spt.is_corrupted())
            .field("cpb_corrupted", &self.cpb.is_corrupted())
            .finish_non_exhaustive()
    }
}

/// Map a load result: corrupted tables are kept open for restore
fn tolerate(result: RsuResult<()>, what: &str) -> RsuResult<()> {
    match result {
        Err(err) if err.is_corruption() => {
            warn!(%err, "{what} unusable; only restore operations are available");
            Ok(())
        }
        other => other,
    }
}

fn open_member(kind: RootType, path: &Path) -> RsuResult<Box<dyn BlockDevice>> {
    match kind {
        RootType::Datafile => Ok(Box::new(FileDevice::open(path)?)),
        #[cfg(target_os = "linux")]
        RootType::Qspi => Ok(Box::new(rsu_flash::MtdDevice::open(path)?)),
        #[cfg(not(target_os = "linux"))]
        RootType::Qspi => Err(RsuError::InvalidArgument(format!(
            "qspi root {} needs Linux MTD support",
            path.display()
        ))),
    }
}

/// Open the backend a root spec names, concatenating multiple paths
pub fn open_device(root: &RootSpec) -> RsuResult<Box<dyn BlockDevice>> {
    let mut members = root
        .paths
        .iter()
        .map(|path| open_member(root.kind, path))
        .collect::<RsuResult<Vec<_>>>()?;

    if members.len() == 1
        && let Some(single) = members.pop()
    {
        return Ok(single);
    }
    Ok(Box::new(ConcatDevice::new(members)?))
}

/// Handle to one RSU flash
#[derive(Debug)]
pub struct Session {
    inner: Option<Inner>,
}

impl Session {
    /// Load the rc file at `path` and open what it names
    pub fn open(path: impl AsRef<Path>) -> RsuResult<Self> {
        let config = RsuConfig::load(path)?;
        Self::open_with_config(config)
    }

    /// Open the flash and attribute directory named by `config`
    pub fn open_with_config(config: RsuConfig) -> RsuResult<Self> {
        let root = config.root()?.clone();
        let dev = open_device(&root)?;
        let attrs = Box::new(SysfsAttributeStore::new(&config.rsu_dev));
        Self::with_parts(config, dev, attrs)
    }

    /// Open a session over caller-supplied backends
    ///
    /// Both tables are loaded. A corrupted table does not fail the open so
    /// that it can still be restored; any other load error does.
    pub fn with_parts(
        config: RsuConfig,
        mut dev: Box<dyn BlockDevice>,
        attrs: Box<dyn AttributeStore>,
    ) -> RsuResult<Self> {
        debug!(size = dev.size(), erase_size = dev.erase_size(), "opening session");

        let mut spt = PartitionStore::new(config.spt_checksum);
        tolerate(spt.load(dev.as_mut()), "partition table")?;

        let mut cpb = PriorityStore::new();
        if let Ok(table) = spt.table() {
            tolerate(cpb.load(dev.as_mut(), table, attrs.as_ref()), "priority table")?;
        }

        info!(
            spt_corrupted = spt.is_corrupted(),
            cpb_corrupted = cpb.is_corrupted(),
            "session open"
        );
        Ok(Self {
            inner: Some(Inner {
                config,
                dev,
                attrs,
                spt,
                cpb,
            }),
        })
    }

    /// Release the device; later calls fail with `NotInitialized`
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!("session closed");
        }
    }

    /// Whether [`close`](Self::close) has not been called
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub(crate) fn inner(&self) -> RsuResult<&Inner> {
        self.inner.as_ref().ok_or(RsuError::NotInitialized)
    }

    pub(crate) fn inner_mut(&mut self) -> RsuResult<&mut Inner> {
        self.inner.as_mut().ok_or(RsuError::NotInitialized)
    }

    /// Configuration the session was opened with
    pub fn config(&self) -> RsuResult<&RsuConfig> {
        Ok(&self.inner()?.config)
    }

    /// Flash backend, for inspection and diagnostics
    pub fn device_mut(&mut self) -> RsuResult<&mut dyn BlockDevice> {
        Ok(self.inner_mut()?.dev.as_mut())
    }

    /// Whether the partition table needs a restore
    pub fn spt_corrupted(&self) -> RsuResult<bool> {
        Ok(self.inner()?.spt.is_corrupted())
    }

    /// Whether the priority table needs a restore or an empty
    pub fn cpb_corrupted(&self) -> RsuResult<bool> {
        Ok(self.inner()?.cpb.is_corrupted())
    }

    /// Every partition record, reserved ones included
    pub fn partitions(&self) -> RsuResult<Vec<Partition>> {
        Ok(self.inner()?.spt.table()?.iter().collect())
    }

    /// Save the partition table to `path`
    pub fn save_spt(&mut self, path: impl AsRef<Path>) -> RsuResult<()> {
        let inner = self.inner_mut()?;
        inner.spt.save(inner.dev.as_mut(), path.as_ref())
    }

    /// Restore the partition table from `path`, then reload the priority table
    pub fn restore_spt(&mut self, path: impl AsRef<Path>) -> RsuResult<()> {
        let inner = self.inner_mut()?;
        inner.spt.restore(inner.dev.as_mut(), path.as_ref())?;
        inner.reload_cpb()
    }

    /// Save the priority table to `path`
    pub fn save_cpb(&mut self, path: impl AsRef<Path>) -> RsuResult<()> {
        let inner = self.inner_mut()?;
        let table = inner.spt.table()?;
        inner.cpb.save(inner.dev.as_mut(), table, path.as_ref())
    }

    /// Restore the priority table from `path`
    pub fn restore_cpb(&mut self, path: impl AsRef<Path>) -> RsuResult<()> {
        let inner = self.inner_mut()?;
        let table = inner.spt.table()?;
        inner.cpb.restore(inner.dev.as_mut(), table, path.as_ref())
    }

    /// Replace the priority table with an empty one
    pub fn empty_cpb(&mut self) -> RsuResult<()> {
        let inner = self.inner_mut()?;
        let table = inner.spt.table()?;
        inner.cpb.empty(inner.dev.as_mut(), table)
    }
}

impl Inner {
    pub(crate) fn table(&self) -> RsuResult<&PartitionTable> {
        self.spt.table()
    }

    pub(crate) fn reload_cpb(&mut self) -> RsuResult<()> {
        let table = self.spt.table()?;
        tolerate(
            self.cpb.load(self.dev.as_mut(), table, self.attrs.as_ref()),
            "priority table",
        )
    }

    pub(crate) fn priority_of(&self, part: &Partition) -> RsuResult<u32> {
        self.cpb.priority(part.offset)
    }

    pub(crate) fn priority_add(&mut self, part: &Partition) -> RsuResult<()> {
        let table = self.spt.table()?;
        self.cpb
            .add(self.dev.as_mut(), table, self.attrs.as_ref(), part.offset)
    }

    pub(crate) fn priority_remove(&mut self, part: &Partition) -> RsuResult<()> {
        let table = self.spt.table()?;
        self.cpb
            .remove(self.dev.as_mut(), table, self.attrs.as_ref(), part.offset)
    }
}
