//! Partition and priority table maintenance commands

use anyhow::{Context, Result};
use rsu_core::Session;
use std::path::Path;
use tracing::warn;

use crate::output;

pub fn save_spt(session: &mut Session, file: &Path, json: bool) -> Result<()> {
    session
        .save_spt(file)
        .with_context(|| format!("Failed to save partition table to {}", file.display()))?;
    output::print_done(json)
}

pub fn restore_spt(session: &mut Session, file: &Path, json: bool) -> Result<()> {
    session
        .restore_spt(file)
        .with_context(|| format!("Failed to restore partition table from {}", file.display()))?;
    if session.cpb_corrupted()? {
        warn!("priority table is still corrupted; restore it or create an empty one");
    }
    output::print_done(json)
}

pub fn empty_cpb(session: &mut Session, json: bool) -> Result<()> {
    session.empty_cpb()?;
    output::print_done(json)
}

pub fn save_cpb(session: &mut Session, file: &Path, json: bool) -> Result<()> {
    session
        .save_cpb(file)
        .with_context(|| format!("Failed to save priority table to {}", file.display()))?;
    output::print_done(json)
}

pub fn restore_cpb(session: &mut Session, file: &Path, json: bool) -> Result<()> {
    session
        .restore_cpb(file)
        .with_context(|| format!("Failed to restore priority table from {}", file.display()))?;
    output::print_done(json)
}
