//! Slot inspection, programming and partition commands

use anyhow::{Context, Result};
use rsu_core::Session;
use serde_json::json;
use std::path::Path;
use tracing::info;

use crate::output;

/// How `add` writes its file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMode {
    /// Relocated application image
    Image,
    /// Factory update image
    FactoryUpdate,
    /// Bytes written unchanged
    Raw,
}

impl AddMode {
    pub fn new(raw: bool, factory_update: bool) -> Self {
        match (raw, factory_update) {
            (true, _) => Self::Raw,
            (false, true) => Self::FactoryUpdate,
            (false, false) => Self::Image,
        }
    }
}

pub fn count(session: &Session, json: bool) -> Result<()> {
    let count = session.slot_count()?;
    if json {
        output::print_json(&json!({ "success": true, "count": count }))
    } else {
        println!("number of slots is {count}");
        Ok(())
    }
}

pub fn list(session: &Session, slot: Option<usize>, json: bool) -> Result<()> {
    let slots = match slot {
        Some(slot) => vec![(slot, session.slot_info(slot)?)],
        None => session.slots()?.into_iter().enumerate().collect(),
    };
    output::print_slots(&slots, json)
}

pub fn size(session: &Session, slot: usize, json: bool) -> Result<()> {
    let size = session.slot_size(slot)?;
    if json {
        output::print_json(&json!({ "success": true, "slot": slot, "size": size }))
    } else {
        println!("size of slot {slot} is {size}");
        Ok(())
    }
}

pub fn priority(session: &Session, slot: usize, json: bool) -> Result<()> {
    let priority = session.slot_priority(slot)?;
    if json {
        output::print_json(&json!({ "success": true, "slot": slot, "priority": priority }))
    } else {
        println!("priority of slot {slot} is {priority}");
        Ok(())
    }
}

pub fn enable(session: &mut Session, slot: usize, json: bool) -> Result<()> {
    session.slot_enable(slot)?;
    output::print_done(json)
}

pub fn disable(session: &mut Session, slot: usize, json: bool) -> Result<()> {
    session.slot_disable(slot)?;
    output::print_done(json)
}

pub fn erase(session: &mut Session, slot: usize, json: bool) -> Result<()> {
    session.slot_erase(slot)?;
    output::print_done(json)
}

pub fn add(session: &mut Session, slot: usize, file: &Path, mode: AddMode, json: bool) -> Result<()> {
    info!(slot, file = %file.display(), ?mode, "adding image");
    match mode {
        AddMode::Image => session.slot_program_file(slot, file),
        AddMode::FactoryUpdate => session.slot_program_factory_update_file(slot, file),
        AddMode::Raw => session.slot_program_file_raw(slot, file),
    }
    .with_context(|| format!("Failed to program slot {slot} from {}", file.display()))?;
    output::print_done(json)
}

pub fn verify(session: &mut Session, slot: usize, file: &Path, raw: bool, json: bool) -> Result<()> {
    if raw {
        session.slot_verify_file_raw(slot, file)
    } else {
        session.slot_verify_file(slot, file)
    }
    .with_context(|| format!("Slot {slot} does not match {}", file.display()))?;
    output::print_done(json)
}

pub fn copy(session: &mut Session, slot: usize, file: &Path, json: bool) -> Result<()> {
    session
        .slot_copy_to_file(slot, file)
        .with_context(|| format!("Failed to copy slot {slot} to {}", file.display()))?;
    output::print_done(json)
}

pub fn create(session: &mut Session, name: &str, address: u64, length: u64, json: bool) -> Result<()> {
    session.slot_create(name, address, length)?;
    output::print_done(json)
}

pub fn delete(session: &mut Session, slot: usize, json: bool) -> Result<()> {
    session.slot_delete(slot)?;
    output::print_done(json)
}

pub fn rename(session: &mut Session, slot: usize, name: &str, json: bool) -> Result<()> {
    session.slot_rename(slot, name)?;
    output::print_done(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_wins_over_image_kind() {
        assert_eq!(AddMode::new(false, false), AddMode::Image);
        assert_eq!(AddMode::new(false, true), AddMode::FactoryUpdate);
        assert_eq!(AddMode::new(true, false), AddMode::Raw);
    }
}
