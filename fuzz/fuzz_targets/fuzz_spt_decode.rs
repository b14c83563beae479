//! Fuzzes the partition table decoder and its structural checks.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_spt_decode
#![no_main]
use libfuzzer_sys::fuzz_target;
use rsu_core::spt::PartitionTable;

fuzz_target!(|data: &[u8]| {
    // Must never panic on arbitrary bytes; errors are expected, panics are not.
    let Some(table) = PartitionTable::from_bytes(data) else {
        return;
    };
    let _ = table.check(false);
    let _ = table.check(true);
    let _ = table.spt0_offset();
    for part in table.iter() {
        let _ = table.device_offset(&part);
        let _ = table.find(&part.name);
    }
    let _ = table.compute_checksum();
});
