//! Line-oriented rc configuration
//!
//! ```text
//! # comment
//! // also a comment
//! root qspi /dev/mtd0,/dev/mtd1
//! rsu-dev /sys/devices/platform/stratix10-rsu.0
//! log med /var/log/librsu.log
//! write-protect 0
//! rsu-spt-checksum 1
//! ```

use crate::attr::DEFAULT_RSU_DEV;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Default rc file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/librsu.rc";

/// Highest slot index that can be write-protected
pub const MAX_WRITE_PROTECT_SLOT: u32 = 31;

/// Errors raised while loading or parsing an rc file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// rc file could not be read
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Directive has the wrong number of arguments
    #[error("wrong number of parameters for '{directive}' @{line}")]
    WrongArgCount {
        /// 1-based line number
        line: usize,
        /// Directive name
        directive: String,
    },

    /// A second `root` directive
    #[error("redefinition of root @{line}")]
    RootRedefined {
        /// 1-based line number
        line: usize,
    },

    /// Directive argument not understood
    #[error("invalid parameter '{value}' for '{directive}' @{line}")]
    InvalidValue {
        /// 1-based line number
        line: usize,
        /// Directive name
        directive: String,
        /// Offending argument
        value: String,
    },

    /// Write protection beyond the first 32 slots
    #[error("write-protect only works on the first 32 slots @{line}")]
    WriteProtectRange {
        /// 1-based line number
        line: usize,
    },

    /// Directive name not recognised
    #[error("invalid cfg file option '{directive}' @{line}")]
    UnknownDirective {
        /// 1-based line number
        line: usize,
        /// Directive name
        directive: String,
    },

    /// No `root` directive
    #[error("missing 'root' spec in configuration file")]
    MissingRoot,
}

/// Backend selected by the `root` directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootType {
    /// Regular file standing in for flash
    Datafile,
    /// One or more MTD devices
    Qspi,
}

impl FromStr for RootType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "datafile" => Ok(Self::Datafile),
            "qspi" => Ok(Self::Qspi),
            _ => Err(()),
        }
    }
}

/// Flash backend and device paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSpec {
    /// Backend kind
    pub kind: RootType,
    /// Device paths, concatenated in order
    pub paths: Vec<PathBuf>,
}

/// Verbosity of the `log` directive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// No output
    Off,
    /// Errors and repairs
    #[default]
    Low,
    /// Operational detail
    Med,
    /// Everything
    High,
}

impl LogLevel {
    /// `tracing` filter directive for this level
    pub fn filter_directive(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Low => "warn",
            Self::Med => "info",
            Self::High => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "low" => Ok(Self::Low),
            "med" => Ok(Self::Med),
            "high" => Ok(Self::High),
            _ => Err(()),
        }
    }
}

/// Where log output goes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Standard error
    #[default]
    Stderr,
    /// Append to a file
    File(PathBuf),
}

/// Parsed rc file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsuConfig {
    /// Flash backend; required
    pub root: Option<RootSpec>,
    /// Attribute store directory
    pub rsu_dev: PathBuf,
    /// Log verbosity
    pub log_level: LogLevel,
    /// Log destination
    pub log_target: LogTarget,
    /// Bit `n` set means slot `n` is write-protected
    pub write_protect: u32,
    /// Validate and maintain the partition table checksum
    pub spt_checksum: bool,
}

impl Default for RsuConfig {
    fn default() -> Self {
        Self {
            root: None,
            rsu_dev: PathBuf::from(DEFAULT_RSU_DEV),
            log_level: LogLevel::default(),
            log_target: LogTarget::default(),
            write_protect: 0,
            spt_checksum: false,
        }
    }
}

impl RsuConfig {
    /// Read and parse an rc file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    /// Whether `slot` is write-protected
    pub fn is_write_protected(&self, slot: usize) -> bool {
        u32::try_from(slot)
            .ok()
            .filter(|&s| s <= MAX_WRITE_PROTECT_SLOT)
            .is_some_and(|s| self.write_protect & (1 << s) != 0)
    }

    /// Root spec, or [`ConfigError::MissingRoot`]
    pub fn root(&self) -> Result<&RootSpec, ConfigError> {
        self.root.as_ref().ok_or(ConfigError::MissingRoot)
    }
}

fn expect_args(words: &[&str], count: usize, line: usize) -> Result<(), ConfigError> {
    if words.len() == count {
        Ok(())
    } else {
        Err(ConfigError::WrongArgCount {
            line,
            directive: words.first().copied().unwrap_or_default().to_string(),
        })
    }
}

fn invalid(line: usize, directive: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        line,
        directive: directive.to_string(),
        value: value.to_string(),
    }
}

impl FromStr for RsuConfig {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut config = Self::default();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let words: Vec<&str> = raw.split_whitespace().collect();
            let Some(&directive) = words.first() else {
                continue;
            };
            if directive.starts_with('#') || directive.starts_with("//") {
                continue;
            }

            match directive {
                "root" => {
                    expect_args(&words, 3, line)?;
                    if config.root.is_some() {
                        return Err(ConfigError::RootRedefined { line });
                    }
                    let (Some(&kind), Some(&paths)) = (words.get(1), words.get(2)) else {
                        continue;
                    };
                    let kind: RootType = kind.parse().map_err(|()| invalid(line, directive, kind))?;
                    let paths: Vec<PathBuf> = paths
                        .split(',')
                        .filter(|p| !p.is_empty())
                        .map(PathBuf::from)
                        .collect();
                    if paths.is_empty() {
                        return Err(invalid(line, directive, words.get(2).copied().unwrap_or_default()));
                    }
                    config.root = Some(RootSpec { kind, paths });
                }
                "rsu-dev" => {
                    expect_args(&words, 2, line)?;
                    if let Some(&dev) = words.get(1) {
                        config.rsu_dev = PathBuf::from(dev);
                    }
                }
                "log" => {
                    if words.len() < 2 {
                        return Err(ConfigError::WrongArgCount {
                            line,
                            directive: directive.to_string(),
                        });
                    }
                    let level_word = words.get(1).copied().unwrap_or_default();
                    let level: LogLevel = level_word
                        .parse()
                        .map_err(|()| invalid(line, directive, level_word))?;
                    config.log_level = level;
                    if level != LogLevel::Off {
                        config.log_target = match words.get(2) {
                            None | Some(&"stderr") => LogTarget::Stderr,
                            Some(path) => LogTarget::File(PathBuf::from(path)),
                        };
                    }
                }
                "write-protect" => {
                    expect_args(&words, 2, line)?;
                    let value = words.get(1).copied().unwrap_or_default();
                    let slot: i64 = value.parse().map_err(|_parse_err: std::num::ParseIntError| {
                        invalid(line, directive, value)
                    })?;
                    let slot = u32::try_from(slot)
                        .ok()
                        .filter(|&s| s <= MAX_WRITE_PROTECT_SLOT)
                        .ok_or(ConfigError::WriteProtectRange { line })?;
                    config.write_protect |= 1 << slot;
                }
                "rsu-spt-checksum" => {
                    expect_args(&words, 2, line)?;
                    let value = words.get(1).copied().unwrap_or_default();
                    let flag: i64 = value.parse().map_err(|_parse_err: std::num::ParseIntError| {
                        invalid(line, directive, value)
                    })?;
                    config.spt_checksum = flag != 0;
                }
                _ => {
                    return Err(ConfigError::UnknownDirective {
                        line,
                        directive: directive.to_string(),
                    });
                }
            }
        }

        config.root()?;
        Ok(config)
    }
}
