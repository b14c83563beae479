//! Firmware status and reboot request commands

use anyhow::Result;
use rsu_core::Session;
use serde_json::json;

use crate::output;

pub fn log(session: &Session, json: bool) -> Result<()> {
    let info = session.status_log()?;
    output::print_status(&info, json)
}

pub fn request(session: &mut Session, slot: usize, json: bool) -> Result<()> {
    session.slot_load_after_reboot(slot)?;
    output::print_done(json)
}

pub fn request_factory(session: &mut Session, json: bool) -> Result<()> {
    session.slot_load_factory_after_reboot()?;
    output::print_done(json)
}

pub fn notify(session: &mut Session, value: u64, json: bool) -> Result<()> {
    session.notify(value)?;
    output::print_done(json)
}

pub fn clear_error_status(session: &mut Session, json: bool) -> Result<()> {
    session.clear_error_status()?;
    output::print_done(json)
}

pub fn reset_retry_counter(session: &mut Session, json: bool) -> Result<()> {
    session.reset_retry_counter()?;
    output::print_done(json)
}

pub fn dcmf_version(session: &Session, json: bool) -> Result<()> {
    let versions = session.dcmf_version()?;
    if json {
        return output::print_json(&json!({ "success": true, "dcmf": versions }));
    }
    for (index, version) in versions.iter().enumerate() {
        println!("DCMF{index} version = {version}");
    }
    Ok(())
}

pub fn dcmf_status(session: &Session, json: bool) -> Result<()> {
    let corrupted = session.dcmf_status()?;
    if json {
        return output::print_json(&json!({ "success": true, "corrupted": corrupted }));
    }
    for (index, bad) in corrupted.iter().enumerate() {
        println!("DCMF{index}: {}", output::health_word(!bad));
    }
    Ok(())
}

pub fn max_retry(session: &Session, json: bool) -> Result<()> {
    let value = session.max_retry()?;
    if json {
        output::print_json(&json!({ "success": true, "max_retry": value }))
    } else {
        println!("max_retry = {value}");
        Ok(())
    }
}

pub fn running_factory(session: &Session, json: bool) -> Result<()> {
    let factory = session.running_factory()?;
    if json {
        output::print_json(&json!({ "success": true, "running_factory": factory }))
    } else {
        println!("Running factory image: {}", if factory { "yes" } else { "no" });
        Ok(())
    }
}
