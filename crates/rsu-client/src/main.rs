//! rsu-client - Remote System Update command-line client
//!
//! Inspects and updates the slots, partition table and boot-priority table
//! of an RSU flash, and talks to the firmware through its status attributes.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod error;
mod logging;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rsu_core::config::DEFAULT_CONFIG_PATH;
use rsu_core::{RsuConfig, Session};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::commands::{parse_slot, parse_u64};

#[derive(Parser, Debug)]
#[command(name = "rsu-client")]
#[command(about = "RSU client - manage application images, boot priority and firmware status")]
#[command(version)]
#[command(long_about = "
rsu-client manages the remote system update flash of an FPGA device: it lists
and programs slots, edits the boot order, saves and restores the redundant
partition and priority tables, and reads or updates firmware status.

Slot numbers, addresses, sizes and notify values accept decimal or 0x hex.
Use --json for machine-readable output.
")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "RSU_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Output in JSON format for machine parsing
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get the number of slots
    Count,

    /// List the attributes of one slot, or of every slot
    List {
        /// Slot number
        #[arg(value_parser = parse_slot)]
        slot: Option<usize>,
    },

    /// Get the size of a slot
    Size {
        /// Slot number
        #[arg(value_parser = parse_slot)]
        slot: usize,
    },

    /// Get the boot priority of a slot
    Priority {
        /// Slot number
        #[arg(value_parser = parse_slot)]
        slot: usize,
    },

    /// Print the firmware status log
    Status,

    /// Request that a slot is loaded on the next reboot
    Request {
        /// Slot number
        #[arg(value_parser = parse_slot)]
        slot: usize,
    },

    /// Request that the factory image is loaded on the next reboot
    RequestFactory,

    /// Put a slot at the top of the boot order
    Enable {
        /// Slot number
        #[arg(value_parser = parse_slot)]
        slot: usize,
    },

    /// Remove a slot from the boot order
    Disable {
        /// Slot number
        #[arg(value_parser = parse_slot)]
        slot: usize,
    },

    /// Program an image into an erased slot
    Add {
        /// Image file
        file: PathBuf,
        /// Slot number
        #[arg(short, long, value_parser = parse_slot)]
        slot: usize,
        /// Write the file as-is, without relocation or boot order changes
        #[arg(long, conflicts_with = "factory_update")]
        raw: bool,
        /// The file is a factory update image
        #[arg(long)]
        factory_update: bool,
    },

    /// Verify a slot against an image file
    Verify {
        /// Image file
        file: PathBuf,
        /// Slot number
        #[arg(short, long, value_parser = parse_slot)]
        slot: usize,
        /// Compare the file byte for byte
        #[arg(long)]
        raw: bool,
    },

    /// Copy the contents of a slot to a file
    Copy {
        /// Output file
        file: PathBuf,
        /// Slot number
        #[arg(short, long, value_parser = parse_slot)]
        slot: usize,
    },

    /// Erase a slot and remove it from the boot order
    Erase {
        /// Slot number
        #[arg(value_parser = parse_slot)]
        slot: usize,
    },

    /// Report a software state value to the firmware
    Notify {
        /// Value; only the low 16 bits are sent
        #[arg(value_parser = parse_u64)]
        value: u64,
    },

    /// Clear the last recorded error
    ClearErrorStatus,

    /// Reset the boot retry counter
    ResetRetryCounter,

    /// Show the version of each decision firmware copy
    DcmfVersion,

    /// Show the corruption status of each decision firmware copy
    DcmfStatus,

    /// Show the configured maximum retry count
    MaxRetry,

    /// Create a new slot
    CreateSlot {
        /// Slot name
        name: String,
        /// Absolute flash address
        #[arg(short = 'S', long, value_parser = parse_u64)]
        address: u64,
        /// Size in bytes
        #[arg(short = 'L', long, value_parser = parse_u64)]
        length: u64,
    },

    /// Delete a slot
    DeleteSlot {
        /// Slot number
        #[arg(value_parser = parse_slot)]
        slot: usize,
    },

    /// Rename a slot
    RenameSlot {
        /// Slot number
        #[arg(value_parser = parse_slot)]
        slot: usize,
        /// New name
        name: String,
    },

    /// Save the partition table to a file
    SaveSpt {
        /// Output file
        file: PathBuf,
    },

    /// Restore the partition table from a file
    RestoreSpt {
        /// Saved table
        file: PathBuf,
    },

    /// Replace the priority table with an empty one
    CreateEmptyCpb,

    /// Save the priority table to a file
    SaveCpb {
        /// Output file
        file: PathBuf,
    },

    /// Restore the priority table from a file
    RestoreCpb {
        /// Saved table
        file: PathBuf,
    },

    /// Check whether the factory image is running
    CheckRunningFactory,

    /// Print the effective configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            ExitCode::from(error::exit_code(&e))
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = RsuConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    logging::init(&config, cli.verbose)?;
    tracing::debug!(config = %cli.config.display(), "configuration loaded");

    if let Commands::Config = cli.command {
        return output::print_config(&config, cli.json);
    }

    let mut session = Session::open_with_config(config).context("Failed to open RSU session")?;
    let result = commands::execute(&mut session, &cli.command, cli.json);
    session.close();
    result
}
