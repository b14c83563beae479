//! Device attribute store (sysfs-style key/value access)
//!
//! The RSU driver publishes status words (`state`, `version`,
//! `current_image`, ...) as one file per key and accepts commands
//! (`notify`, `reboot_image`) by writing to them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// Base directory for relative `rsu-dev` names
pub const DEFAULT_SYS_DRIVER: &str = "/sys/bus/platform/drivers/intel-rsu/";

/// Default attribute directory
pub const DEFAULT_RSU_DEV: &str = "/sys/devices/platform/stratix10-rsu.0";

/// Errors raised by an [`AttributeStore`]
#[derive(Error, Debug)]
pub enum AttributeError {
    /// Attribute file could not be read
    #[error("cannot read attribute {path}: {source}")]
    Read {
        /// Attribute file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Attribute file could not be written
    #[error("cannot write attribute {path}: {source}")]
    Write {
        /// Attribute file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Attribute contents are not a number
    #[error("attribute '{key}' has non-numeric value '{value}'")]
    Parse {
        /// Attribute name
        key: String,
        /// Raw contents
        value: String,
    },

    /// Attribute does not exist
    #[error("attribute '{0}' not present")]
    Missing(String),
}

/// Key/value access to driver attributes
pub trait AttributeStore: std::fmt::Debug {
    /// Read the numeric value of `key`
    fn get(&self, key: &str) -> Result<u64, AttributeError>;

    /// Write `value` to `key`
    fn put(&mut self, key: &str, value: u64) -> Result<(), AttributeError>;
}

impl<A: AttributeStore + ?Sized> AttributeStore for Box<A> {
    fn get(&self, key: &str) -> Result<u64, AttributeError> {
        (**self).get(key)
    }

    fn put(&mut self, key: &str, value: u64) -> Result<(), AttributeError> {
        (**self).put(key, value)
    }
}

/// Parse an attribute value: decimal, or hexadecimal with a `0x` prefix
pub fn parse_value(raw: &str) -> Option<u64> {
    let text = raw.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Attribute files under a sysfs directory
#[derive(Debug, Clone)]
pub struct SysfsAttributeStore {
    dir: PathBuf,
}

impl SysfsAttributeStore {
    /// Store rooted at `rsu_dev`
    ///
    /// Absolute paths are used as given; relative names are resolved under
    /// [`DEFAULT_SYS_DRIVER`].
    pub fn new(rsu_dev: impl AsRef<Path>) -> Self {
        let rsu_dev = rsu_dev.as_ref();
        let dir = if rsu_dev.is_absolute() {
            rsu_dev.to_path_buf()
        } else {
            Path::new(DEFAULT_SYS_DRIVER).join(rsu_dev)
        };
        debug!(dir = ?dir, "attribute store");
        Self { dir }
    }

    /// Directory holding the attribute files
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AttributeStore for SysfsAttributeStore {
    fn get(&self, key: &str) -> Result<u64, AttributeError> {
        let path = self.dir.join(key);
        let text = std::fs::read_to_string(&path)
            .map_err(|source| AttributeError::Read { path, source })?;
        let value = parse_value(&text).ok_or_else(|| AttributeError::Parse {
            key: key.to_string(),
            value: text.trim().to_string(),
        })?;
        trace!(key, value, "attribute read");
        Ok(value)
    }

    fn put(&mut self, key: &str, value: u64) -> Result<(), AttributeError> {
        let path = self.dir.join(key);
        std::fs::write(&path, value.to_string())
            .map_err(|source| AttributeError::Write { path, source })?;
        debug!(key, value, "attribute written");
        Ok(())
    }
}

/// In-memory attribute store recording every put
#[derive(Debug, Clone, Default)]
pub struct MemoryAttributeStore {
    values: BTreeMap<String, u64>,
    puts: Vec<(String, u64)>,
}

impl MemoryAttributeStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: u64) -> Self {
        self.set(key, value);
        self
    }

    /// Set `key` without recording a put
    pub fn set(&mut self, key: &str, value: u64) {
        self.values.insert(key.to_string(), value);
    }

    /// Remove `key`
    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    /// Every put in call order
    pub fn puts(&self) -> &[(String, u64)] {
        &self.puts
    }
}

impl AttributeStore for MemoryAttributeStore {
    fn get(&self, key: &str) -> Result<u64, AttributeError> {
        self.values
            .get(key)
            .copied()
            .ok_or_else(|| AttributeError::Missing(key.to_string()))
    }

    fn put(&mut self, key: &str, value: u64) -> Result<(), AttributeError> {
        self.values.insert(key.to_string(), value);
        self.puts.push((key.to_string(), value));
        Ok(())
    }
}
