//! Fuzzes the priority table decoder against a fixed partition table.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_cpb_decode
#![no_main]
use libfuzzer_sys::fuzz_target;
use rsu_core::Partition;
use rsu_core::cpb::PriorityTable;
use rsu_core::spt::PartitionTable;

fn partition_table() -> PartitionTable {
    let mut table = PartitionTable::new(0);
    for part in [
        Partition::new("SPT0", 0x10_0000, 0x8000, 1),
        Partition::new("SPT1", 0x10_8000, 0x8000, 1),
        Partition::new("CPB0", 0x11_0000, 0x8000, 1),
        Partition::new("CPB1", 0x11_8000, 0x8000, 1),
        Partition::new("P1", 0x12_0000, 0x4_0000, 0),
        Partition::new("P2", 0x16_0000, 0x4_0000, 0),
    ] {
        let _ = table.push(&part);
    }
    table
}

fuzz_target!(|data: &[u8]| {
    // Must never panic on arbitrary bytes; errors are expected, panics are not.
    let Some(mut table) = PriorityTable::from_bytes(data) else {
        return;
    };
    let spt = partition_table();
    let _ = table.check(&spt);
    let _ = table.priority_of(0x12_0000);
    let _ = table.first_free();
    let _ = table.compact_with(0x16_0000);
    let _ = table.slots();
});
