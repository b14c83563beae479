//! Fuzzes opening a session over arbitrary flash contents.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_session_open
#![no_main]
use libfuzzer_sys::fuzz_target;
use rsu_core::{MemoryAttributeStore, RsuConfig, Session};
use rsu_flash::MemoryDevice;

const DEVICE_SIZE: usize = 0x2_0000;

fuzz_target!(|data: &[u8]| {
    // Must never panic on arbitrary bytes; errors are expected, panics are not.
    let mut flash = data.to_vec();
    flash.resize(DEVICE_SIZE, 0xFF);
    let dev = MemoryDevice::from_bytes(flash, 0);
    let attrs = MemoryAttributeStore::new().with("state", 0);
    let Ok(mut session) =
        Session::with_parts(RsuConfig::default(), Box::new(dev), Box::new(attrs))
    else {
        return;
    };
    if let Ok(slots) = session.slots() {
        for index in 0..slots.len() {
            let _ = session.slot_enable(index);
            let _ = session.slot_priority(index);
        }
    }
    let _ = session.empty_cpb();
});
