//! Fuzzes the rc configuration parser.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_config_parse
#![no_main]
use libfuzzer_sys::fuzz_target;
use rsu_core::RsuConfig;

fuzz_target!(|data: &[u8]| {
    // Must never panic on arbitrary bytes; errors are expected, panics are not.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(config) = text.parse::<RsuConfig>() {
            for slot in 0..40 {
                let _ = config.is_write_protected(slot);
            }
        }
    }
});
