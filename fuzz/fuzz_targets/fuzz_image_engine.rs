//! Fuzzes the image relocation engine block by block.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_image_engine
#![no_main]
use libfuzzer_sys::fuzz_target;
use rsu_image::{BLOCK_SIZE, ImageState, SlotBounds};

fuzz_target!(|data: &[u8]| {
    // Must never panic on arbitrary bytes; errors are expected, panics are not.
    let bounds = SlotBounds::new(0x12_0000, 0x4_0000);
    let mut programmed = data.to_vec();
    let mut state = ImageState::new(bounds);
    let mut offset = 0u64;
    for block in programmed.chunks_mut(BLOCK_SIZE) {
        if state.program_block(offset, block).is_err() {
            return;
        }
        offset += block.len() as u64;
    }

    let mut verifier = ImageState::new(bounds);
    let mut offset = 0u64;
    for (image, flash) in data.chunks(BLOCK_SIZE).zip(programmed.chunks(BLOCK_SIZE)) {
        assert!(verifier.verify_block(offset, image, flash).is_ok());
        offset += image.len() as u64;
    }
});
