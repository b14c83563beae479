//! Error types and exit codes for rsu-client

use rsu_core::{ConfigError, RsuError};
use std::path::PathBuf;
use thiserror::Error;

/// Exit code for failures that carry no library error kind
pub const GENERIC_FAILURE: u8 = 1;

/// Exit code for a configuration file that could not be loaded
pub const CONFIG_FAILURE: u8 = 2;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Cannot open log file {path}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid log filter: {0}")]
    LogFilter(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Process exit code for `error`, taken from the first library error in its chain
pub fn exit_code(error: &anyhow::Error) -> u8 {
    for cause in error.chain() {
        if let Some(rsu) = cause.downcast_ref::<RsuError>() {
            return rsu.exit_code();
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return CONFIG_FAILURE;
        }
    }
    GENERIC_FAILURE
}
