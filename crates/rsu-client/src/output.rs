//! Output formatting for CLI responses

use anyhow::{Error, Result};
use colored::*;
use rsu_core::config::{LogTarget, RootType};
use rsu_core::{RsuConfig, SlotInfo, StatusInfo};
use serde::Serialize;
use serde_json::json;

use crate::error::{CliError, exit_code};

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let causes: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "causes": causes,
            "exit_code": exit_code(error),
        }
    });
    match serde_json::to_string_pretty(&error_json) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format error as JSON: {}", e),
    }
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    for cause in error.chain().skip(1) {
        eprintln!("  {} {}", "Caused by:".yellow(), cause);
    }
}

/// Pretty-print any serializable value
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(CliError::from)?;
    println!("{}", text);
    Ok(())
}

/// Report a command that produces no data
pub fn print_done(json: bool) -> Result<()> {
    if json {
        print_json(&json!({ "success": true }))
    } else {
        println!("{}", "Operation completed".green());
        Ok(())
    }
}

/// Word shown for a healthy or corrupted firmware copy
pub fn health_word(ok: bool) -> ColoredString {
    if ok { "OK".green() } else { "Corrupted".red() }
}

/// Print slot attributes
pub fn print_slots(slots: &[(usize, SlotInfo)], json: bool) -> Result<()> {
    if json {
        let slots: Vec<_> = slots
            .iter()
            .map(|(index, info)| json!({ "slot": index, "info": info }))
            .collect();
        return print_json(&json!({ "success": true, "slots": slots }));
    }

    if slots.is_empty() {
        println!("{}", "No slots defined".yellow());
        return Ok(());
    }
    for (index, info) in slots {
        print!("{}", format_slot(*index, info));
    }
    Ok(())
}

fn format_slot(index: usize, info: &SlotInfo) -> String {
    let priority = if info.priority > 0 {
        info.priority.to_string()
    } else {
        "[disabled]".to_string()
    };
    format!(
        "{} {}\n      NAME: {}\n    OFFSET: 0x{:016X}\n      SIZE: 0x{:08X}\n  PRIORITY: {}\n",
        "SLOT".bold(),
        index,
        info.name,
        info.offset,
        info.size,
        priority
    )
}

/// Print the firmware status log
pub fn print_status(info: &StatusInfo, json: bool) -> Result<()> {
    if json {
        return print_json(&json!({
            "success": true,
            "status": info,
            "error_source": info.error_source(),
            "acmf_version": info.acmf_version(),
            "dcmf_version": info.dcmf_version(),
        }));
    }
    print!("{}", format_status(info));
    Ok(())
}

fn format_status(info: &StatusInfo) -> String {
    let mut text = format!(
        "      VERSION: 0x{:08X}\n        STATE: 0x{:08X}\nCURRENT IMAGE: 0x{:016X}\n   FAIL IMAGE: 0x{:016X}\n    ERROR LOC: 0x{:08X}\nERROR DETAILS: 0x{:08X}\n",
        info.version,
        info.state,
        info.current_image,
        info.fail_image,
        info.error_location,
        info.error_details,
    );
    if info.acmf_version() != 0 && info.dcmf_version() != 0 {
        text.push_str(&format!("RETRY COUNTER: 0x{:08X}\n", info.retry_counter));
    }
    text
}

/// Print the effective configuration
pub fn print_config(config: &RsuConfig, json: bool) -> Result<()> {
    if json {
        return print_json(&json!({ "success": true, "config": config }));
    }

    println!("{}", "Configuration:".bold());
    match &config.root {
        Some(root) => {
            let kind = match root.kind {
                RootType::Datafile => "datafile",
                RootType::Qspi => "qspi",
            };
            let paths: Vec<String> = root.paths.iter().map(|p| p.display().to_string()).collect();
            println!("  Root: {} {}", kind.cyan(), paths.join(","));
        }
        None => println!("  Root: {}", "none".red()),
    }
    println!("  RSU device: {}", config.rsu_dev.display());
    let target = match &config.log_target {
        LogTarget::Stderr => "stderr".to_string(),
        LogTarget::File(path) => path.display().to_string(),
    };
    println!("  Log: {:?} -> {}", config.log_level, target);
    println!("  Write-protect mask: 0x{:08X}", config.write_protect);
    println!(
        "  SPT checksum: {}",
        if config.spt_checksum { "enabled" } else { "disabled" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_rendering() {
        colored::control::set_override(false);
        let info = SlotInfo {
            name: "P1".to_string(),
            offset: 0x12_0000,
            size: 0x4_0000,
            priority: 0,
        };
        insta::assert_snapshot!(format_slot(0, &info), @r"
        SLOT 0
              NAME: P1
            OFFSET: 0x0000000000120000
              SIZE: 0x00040000
          PRIORITY: [disabled]
        ");
    }

    #[test]
    fn test_status_rendering_hides_unsupported_retry_counter() {
        let mut info = StatusInfo {
            version: 0x0000_0000,
            state: 0xF004_D003,
            current_image: 0x12_0000,
            fail_image: 0,
            error_location: 0,
            error_details: 0,
            retry_counter: 0,
        };
        insta::assert_snapshot!(format_status(&info), @r"
              VERSION: 0x00000000
                STATE: 0xF004D003
        CURRENT IMAGE: 0x0000000000120000
           FAIL IMAGE: 0x0000000000000000
            ERROR LOC: 0x00000000
        ERROR DETAILS: 0x00000000
        ");

        info.version = 0x0000_0202;
        info.retry_counter = 1;
        assert!(format_status(&info).ends_with("RETRY COUNTER: 0x00000001\n"));
    }
}
