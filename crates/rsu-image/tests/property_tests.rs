//! Property tests for relocation and the bit-reversed CRC

use proptest::prelude::*;
use rsu_image::prelude::*;
use rsu_image::{
    MAX_POINTERS, POINTER_OFFSET, PointerTable, bit_reversed_crc32, compute_block_crc,
    refresh_block_crc, stored_block_crc,
};

fn relative_image(pointers: &[u64], filler: u8) -> Vec<u8> {
    let mut image = vec![filler; 3 * BLOCK_SIZE];
    image.splice(0..4, CMF_MAGIC.to_le_bytes());
    let sig_at = BLOCK_SIZE + POINTER_OFFSET;
    image.splice(sig_at..sig_at + 8, [0u8; 8]);
    image.splice(sig_at..sig_at + 4, (pointers.len() as u32).to_le_bytes());
    for i in 0..MAX_POINTERS {
        let at = sig_at + 8 + i * 8;
        let value = pointers.get(i).copied().unwrap_or(0);
        image.splice(at..at + 8, value.to_le_bytes());
    }
    if let Some(sig) = image.get_mut(BLOCK_SIZE..2 * BLOCK_SIZE) {
        let _crc = refresh_block_crc(sig);
    }
    image
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Programming a relative image at offset O yields pointers P + O, a valid
    /// CRC, and a stream that verifies against the original.
    #[test]
    fn prop_relocation_round_trip(
        slot_blocks in 16u64..256,
        base_blocks in 0u64..4096,
        raw in prop::collection::vec(1u64..u64::MAX, 1..=MAX_POINTERS),
        filler in any::<u8>(),
    ) {
        let size = slot_blocks * BLOCK_SIZE as u64;
        let offset = base_blocks * BLOCK_SIZE as u64;
        let pointers: Vec<u64> = raw.iter().map(|p| p % size).map(|p| p.max(1)).collect();
        let bounds = SlotBounds::new(offset, size);

        let original = relative_image(&pointers, filler);
        let mut programmed = original.clone();
        let state = program_image(bounds, &mut programmed)?;
        prop_assert!(!state.is_absolute());

        let sig = programmed.get(BLOCK_SIZE..2 * BLOCK_SIZE).unwrap_or_default();
        let table = PointerTable::read(sig).unwrap_or_default();
        for (i, p) in pointers.iter().enumerate() {
            prop_assert_eq!(table.pointers.get(i).copied(), Some(p + offset));
        }
        prop_assert_eq!(stored_block_crc(sig), compute_block_crc(sig));

        verify_image(bounds, &original, &programmed)?;
    }

    /// Any single bit flip inside a signature block is caught by its CRC.
    #[test]
    fn prop_bit_flip_breaks_crc(
        at in 0usize..0xFFC,
        bit in 0u8..8,
    ) {
        let mut image = relative_image(&[0x2000], 0x3C);
        if let Some(byte) = image.get_mut(BLOCK_SIZE + at) {
            *byte ^= 1 << bit;
        }
        let result = program_image(SlotBounds::new(0, 0x10_0000), &mut image);
        let is_bad_checksum = matches!(result, Err(ImageError::BadChecksum { .. }));
        prop_assert!(is_bad_checksum);
    }

    /// The bit-reversed CRC equals a plain CRC over reversed bytes.
    #[test]
    fn prop_bit_reversed_crc(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let reversed: Vec<u8> = data.iter().map(|b| b.reverse_bits()).collect();
        prop_assert_eq!(bit_reversed_crc32(&data), crc32fast::hash(&reversed));
    }
}
