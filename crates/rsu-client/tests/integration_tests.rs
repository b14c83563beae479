//! Integration tests for rsu-client
//!
//! Every test builds a datafile flash plus a directory of attribute files
//! and drives the binary through an rc file pointing at both.

use assert_cmd::Command;
use predicates::prelude::*;
use rsu_test_helpers::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

struct Board {
    dir: TempDir,
    rc: PathBuf,
    flash: PathBuf,
    sysfs: PathBuf,
}

impl Board {
    fn new(layout: &FlashLayout) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_rc_extra(layout, "")
    }

    fn with_rc_extra(layout: &FlashLayout, extra: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let flash = dir.path().join("flash.bin");
        fs::write(&flash, layout.to_bytes())?;

        let sysfs = dir.path().join("rsu");
        fs::create_dir(&sysfs)?;
        let attributes = [
            ("state", "0"),
            ("version", "0x00000202"),
            ("current_image", "0x120000"),
            ("fail_image", "0"),
            ("error_location", "0"),
            ("error_details", "0"),
            ("retry_counter", "1"),
            ("max_retry", "0x103"),
            ("dcmf0", "0x14030200"),
            ("dcmf1", "0x14030200"),
            ("dcmf2", "0x14030100"),
            ("dcmf3", "0x14030100"),
            ("dcmf0_status", "0"),
            ("dcmf1_status", "0"),
            ("dcmf2_status", "1"),
            ("dcmf3_status", "0"),
        ];
        for (key, value) in attributes {
            fs::write(sysfs.join(key), value)?;
        }

        let rc = dir.path().join("librsu.rc");
        fs::write(
            &rc,
            format!(
                "root datafile {}\nrsu-dev {}\nlog off\n{extra}",
                flash.display(),
                sysfs.display()
            ),
        )?;
        Ok(Self {
            dir,
            rc,
            flash,
            sysfs,
        })
    }

    fn cmd(&self) -> Result<Command, Box<dyn std::error::Error>> {
        let mut cmd = Command::cargo_bin("rsu-client")?;
        cmd.env_remove("RUST_LOG").arg("--config").arg(&self.rc);
        Ok(cmd)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn attribute(&self, key: &str) -> Result<String, std::io::Error> {
        fs::read_to_string(self.sysfs.join(key))
    }
}

fn json_of(output: &[u8]) -> Result<Value, Box<dyn std::error::Error>> {
    Ok(serde_json::from_slice(output)?)
}

fn write_image(path: &Path) -> std::io::Result<Vec<u8>> {
    let image = ImageBuilder::new()
        .header()
        .signature(&[0x3000])
        .data(0x5A, 0x2000)
        .build();
    fs::write(path, &image)?;
    Ok(image)
}

#[test]
fn test_count_and_list() -> TestResult {
    let board = Board::new(&FlashLayout::standard())?;

    board
        .cmd()?
        .arg("count")
        .assert()
        .success()
        .stdout(predicate::str::contains("number of slots is 3"));

    board
        .cmd()?
        .args(["list", "0x1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("NAME: P2"))
        .stdout(predicate::str::contains("OFFSET: 0x0000000000160000"))
        .stdout(predicate::str::contains("PRIORITY: [disabled]"));
    Ok(())
}

#[test]
fn test_json_list() -> TestResult {
    let board = Board::new(&FlashLayout::standard())?;
    let output = board.cmd()?.args(["--json", "list"]).output()?;
    assert!(output.status.success());

    let value = json_of(&output.stdout)?;
    assert_eq!(value.get("success"), Some(&Value::Bool(true)));
    let names: Vec<&str> = value
        .get("slots")
        .and_then(Value::as_array)
        .map(|slots| {
            slots
                .iter()
                .filter_map(|s| s.pointer("/info/name").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(names, ["P1", "P2", "P3"]);
    Ok(())
}

#[test]
fn test_add_verify_copy_erase() -> TestResult {
    let board = Board::new(&FlashLayout::standard())?;
    let image_path = board.path("app.rpd");
    write_image(&image_path)?;

    board
        .cmd()?
        .arg("add")
        .arg(&image_path)
        .args(["--slot", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Operation completed"));

    board
        .cmd()?
        .args(["priority", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("priority of slot 0 is 1"));

    board
        .cmd()?
        .arg("verify")
        .arg(&image_path)
        .args(["-s", "0"])
        .assert()
        .success();

    board
        .cmd()?
        .arg("verify")
        .arg(&image_path)
        .args(["-s", "0", "--raw"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("compare mismatch"));

    let copy = board.path("copy.bin");
    board
        .cmd()?
        .arg("copy")
        .arg(&copy)
        .args(["-s", "0"])
        .assert()
        .success();
    assert_eq!(fs::metadata(&copy)?.len(), 0x4000);

    board.cmd()?.args(["erase", "0"]).assert().success();
    board
        .cmd()?
        .arg("add")
        .arg(&image_path)
        .args(["-s", "0", "--raw"])
        .assert()
        .success();
    board
        .cmd()?
        .args(["priority", "0"])
        .assert()
        .stdout(predicate::str::contains("priority of slot 0 is 0"));
    Ok(())
}

#[test]
fn test_program_into_used_slot_fails_with_code() -> TestResult {
    let layout = FlashLayout::standard();
    let board = Board::new(&layout.clone().boot_order(&[layout.offset_of("P1")]))?;
    let image_path = board.path("app.rpd");
    write_image(&image_path)?;

    board
        .cmd()?
        .arg("add")
        .arg(&image_path)
        .args(["-s", "0"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("Caused by:"))
        .stderr(predicate::str::contains("slot 0 is already in use"));
    Ok(())
}

#[test]
fn test_write_protect_from_config() -> TestResult {
    let board = Board::with_rc_extra(&FlashLayout::standard(), "write-protect 1\n")?;
    board
        .cmd()?
        .args(["erase", "1"])
        .assert()
        .code(13)
        .stderr(predicate::str::contains("write-protected"));
    board.cmd()?.args(["erase", "0"]).assert().success();
    Ok(())
}

#[test]
fn test_slot_editing() -> TestResult {
    let board = Board::new(&FlashLayout::standard())?;
    board
        .cmd()?
        .args(["create-slot", "EXTRA", "-S", "0x1E0000", "-L", "0x10000"])
        .assert()
        .success();
    board
        .cmd()?
        .args(["rename-slot", "3", "RENAMED"])
        .assert()
        .success();
    board
        .cmd()?
        .args(["list", "3"])
        .assert()
        .stdout(predicate::str::contains("NAME: RENAMED"));
    board
        .cmd()?
        .args(["create-slot", "SPT0", "-S", "0x1F0000", "-L", "0x10000"])
        .assert()
        .code(9)
        .stderr(predicate::str::contains("reserved name"));
    board.cmd()?.args(["delete-slot", "3"]).assert().success();
    board
        .cmd()?
        .arg("count")
        .assert()
        .stdout(predicate::str::contains("number of slots is 3"));
    Ok(())
}

#[test]
fn test_boot_order_commands() -> TestResult {
    let board = Board::new(&FlashLayout::standard())?;
    board.cmd()?.args(["enable", "2"]).assert().success();
    board.cmd()?.args(["enable", "0"]).assert().success();
    board
        .cmd()?
        .args(["priority", "2"])
        .assert()
        .stdout(predicate::str::contains("is 2"));
    board.cmd()?.args(["disable", "0"]).assert().success();
    board
        .cmd()?
        .args(["priority", "2"])
        .assert()
        .stdout(predicate::str::contains("is 1"));
    Ok(())
}

#[test]
fn test_table_save_and_restore() -> TestResult {
    let board = Board::new(&FlashLayout::standard())?;
    let spt = board.path("spt.bin");
    let cpb = board.path("cpb.bin");
    board.cmd()?.arg("save-spt").arg(&spt).assert().success();
    board.cmd()?.arg("save-cpb").arg(&cpb).assert().success();
    assert_eq!(fs::metadata(&spt)?.len(), 4100);

    let mut flash = fs::read(&board.flash)?;
    for at in [0usize, 0x8000] {
        if let Some(magic) = flash.get_mut(at..at + 4) {
            magic.fill(0);
        }
    }
    fs::write(&board.flash, &flash)?;

    board
        .cmd()?
        .arg("count")
        .assert()
        .code(12)
        .stderr(predicate::str::contains("partition table is corrupted"));
    board.cmd()?.arg("restore-spt").arg(&spt).assert().success();
    board
        .cmd()?
        .arg("count")
        .assert()
        .success()
        .stdout(predicate::str::contains("3"));

    board.cmd()?.arg("create-empty-cpb").assert().success();
    board.cmd()?.arg("restore-cpb").arg(&cpb).assert().success();
    board
        .cmd()?
        .arg("restore-cpb")
        .arg(board.path("missing.bin"))
        .assert()
        .code(10);
    Ok(())
}

#[test]
fn test_status_commands() -> TestResult {
    let board = Board::new(&FlashLayout::standard())?;
    board
        .cmd()?
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("CURRENT IMAGE: 0x0000000000120000"))
        .stdout(predicate::str::contains("RETRY COUNTER: 0x00000001"));
    board
        .cmd()?
        .arg("dcmf-version")
        .assert()
        .success()
        .stdout(predicate::str::contains("DCMF2 version = 20.3.1"));
    board
        .cmd()?
        .arg("dcmf-status")
        .assert()
        .success()
        .stdout(predicate::str::contains("DCMF2: Corrupted"));
    board
        .cmd()?
        .arg("max-retry")
        .assert()
        .success()
        .stdout(predicate::str::contains("max_retry = 3"));
    board
        .cmd()?
        .arg("check-running-factory")
        .assert()
        .success()
        .stdout(predicate::str::contains("Running factory image: no"));
    Ok(())
}

#[test]
fn test_firmware_requests_write_attributes() -> TestResult {
    let layout = FlashLayout::standard();
    let board = Board::new(&layout.clone().boot_order(&[layout.offset_of("P2")]))?;

    board.cmd()?.args(["notify", "0x12345"]).assert().success();
    assert_eq!(board.attribute("notify")?, (0x2345u64).to_string());

    board.cmd()?.arg("clear-error-status").assert().success();
    assert_eq!(board.attribute("notify")?, ((1u64 << 18) | (1 << 17)).to_string());

    board.cmd()?.arg("reset-retry-counter").assert().success();
    assert_eq!(board.attribute("notify")?, ((1u64 << 18) | (1 << 16)).to_string());

    board.cmd()?.args(["request", "1"]).assert().success();
    assert_eq!(board.attribute("reboot_image")?, 0x16_0000u64.to_string());

    board.cmd()?.args(["request", "0"]).assert().code(5);

    board.cmd()?.arg("request-factory").assert().success();
    assert_eq!(board.attribute("reboot_image")?, 0x1_0000u64.to_string());
    Ok(())
}

#[test]
fn test_json_error_output() -> TestResult {
    let board = Board::new(&FlashLayout::standard())?;
    let output = board.cmd()?.args(["--json", "size", "7"]).output()?;
    assert_eq!(output.status.code(), Some(3));
    let value = json_of(&output.stdout)?;
    assert_eq!(value.get("success"), Some(&Value::Bool(false)));
    assert_eq!(value.pointer("/error/exit_code").and_then(Value::as_u64), Some(3));
    Ok(())
}

#[test]
fn test_config_errors() -> TestResult {
    let dir = tempfile::tempdir()?;
    let rc = dir.path().join("bad.rc");
    fs::write(&rc, "root datafile /nonexistent\nbogus 1\n")?;

    Command::cargo_bin("rsu-client")?
        .arg("--config")
        .arg(&rc)
        .arg("count")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid cfg file option 'bogus' @2"));

    Command::cargo_bin("rsu-client")?
        .arg("--config")
        .arg(dir.path().join("missing.rc"))
        .arg("count")
        .assert()
        .code(2);
    Ok(())
}

#[test]
fn test_config_command_and_log_file() -> TestResult {
    let dir = tempfile::tempdir()?;
    let log = dir.path().join("rsu.log");
    let board = Board::new(&FlashLayout::standard())?;
    let rc = dir.path().join("logged.rc");
    fs::write(
        &rc,
        format!(
            "root datafile {}\nrsu-dev {}\nlog med {}\nwrite-protect 2\n",
            board.flash.display(),
            board.sysfs.display(),
            log.display()
        ),
    )?;

    let output = Command::cargo_bin("rsu-client")?
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(&rc)
        .args(["--json", "config"])
        .output()?;
    assert!(output.status.success());
    let value = json_of(&output.stdout)?;
    assert_eq!(value.pointer("/config/write_protect").and_then(Value::as_u64), Some(4));
    assert_eq!(value.pointer("/config/log_level").and_then(Value::as_str), Some("med"));

    Command::cargo_bin("rsu-client")?
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(&rc)
        .arg("count")
        .assert()
        .success();
    let text = fs::read_to_string(&log)?;
    assert_eq!(text.matches("---- START SESSION ----").count(), 2);
    Ok(())
}

#[test]
fn test_help_lists_commands() -> TestResult {
    Command::cargo_bin("rsu-client")?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create-empty-cpb"))
        .stdout(predicate::str::contains("check-running-factory"));
    Ok(())
}
