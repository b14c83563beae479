//! Subscriber setup driven by the `log` directive of the configuration

use anyhow::Result;
use rsu_core::config::{LogLevel, LogTarget};
use rsu_core::RsuConfig;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::CliError;

/// Marker appended to a log file each time the client starts
pub const SESSION_MARKER: &str = "---- START SESSION ----";

/// Filter directive for the configured level, raised by `-v`
pub fn directive(level: LogLevel, verbose: u8) -> &'static str {
    match verbose {
        0 => level.filter_directive(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber; `RUST_LOG` wins over everything else
pub fn init(config: &RsuConfig, verbose: u8) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directive(config.log_level, verbose))
            .map_err(|e| CliError::LogFilter(e.to_string()))?,
    };

    let writer = match &config.log_target {
        LogTarget::File(path) if config.log_level != LogLevel::Off => {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| CliError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            writeln!(file, "{SESSION_MARKER}").map_err(|source| CliError::LogFile {
                path: path.clone(),
                source,
            })?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(matches!(config.log_target, LogTarget::Stderr))
        .with_writer(writer);

    // A second init in the same process keeps the first subscriber.
    if tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_overrides_configured_level() {
        assert_eq!(directive(LogLevel::Off, 0), "off");
        assert_eq!(directive(LogLevel::Low, 0), "warn");
        assert_eq!(directive(LogLevel::Off, 1), "info");
        assert_eq!(directive(LogLevel::High, 2), "debug");
        assert_eq!(directive(LogLevel::Low, 5), "trace");
    }
}
