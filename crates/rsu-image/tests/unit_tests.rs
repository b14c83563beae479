//! Block classification through the public engine API

use rsu_image::prelude::*;
use rsu_image::{POINTER_OFFSET, refresh_block_crc};

fn cmf_header() -> Vec<u8> {
    let mut block = vec![0u8; BLOCK_SIZE];
    block.splice(0..4, CMF_MAGIC.to_le_bytes());
    block
}

fn signature_with(pointer: u64) -> Vec<u8> {
    let mut block = vec![0u8; BLOCK_SIZE];
    block.splice(POINTER_OFFSET..POINTER_OFFSET + 4, 1u32.to_le_bytes());
    block.splice(POINTER_OFFSET + 8..POINTER_OFFSET + 16, pointer.to_le_bytes());
    let _crc = refresh_block_crc(&mut block);
    block
}

mod classification_tests {
    use super::*;

    #[test]
    fn test_header_signature_data_sequence() -> Result<(), ImageError> {
        let mut state = ImageState::new(SlotBounds::new(0x4_0000, 0x4_0000));
        let mut kinds = Vec::new();
        for (offset, mut block) in [
            (0x0000, cmf_header()),
            (0x1000, signature_with(0x3000)),
            (0x2000, vec![0u8; BLOCK_SIZE]),
            (0x3000, cmf_header()),
            (0x4000, signature_with(0)),
            (0x5000, vec![0u8; BLOCK_SIZE]),
        ] {
            kinds.push(state.program_block(offset, &mut block)?);
        }
        assert_eq!(
            kinds,
            vec![
                BlockKind::Header,
                BlockKind::Signature,
                BlockKind::Data,
                BlockKind::Header,
                BlockKind::Signature,
                BlockKind::Data,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_absolute_decided_only_at_second_block() -> Result<(), ImageError> {
        let bounds = SlotBounds::new(0x10_0000, 0x1_0000);
        let mut state = ImageState::new(bounds);
        state.program_block(0, &mut cmf_header())?;
        state.program_block(0x1000, &mut signature_with(0x3000))?;
        assert!(!state.is_absolute());

        // A later signature block with a large pointer is bounds-checked
        // under the relative rule instead of flipping the decision.
        state.program_block(0x3000, &mut cmf_header())?;
        let err = state.program_block(0x4000, &mut signature_with(0x10_8000));
        assert!(matches!(err, Err(ImageError::PointerOutOfRange { .. })));
        assert!(!state.is_absolute());
        Ok(())
    }

    #[test]
    fn test_short_header_block_is_data() -> Result<(), ImageError> {
        let mut state = ImageState::new(SlotBounds::new(0, 0x1_0000));
        assert_eq!(state.program_block(0, &mut [0x95, 0x48])?, BlockKind::Header);
        assert_eq!(
            state.program_block(0x1000, &mut [0u8; 16])?,
            BlockKind::Data
        );
        Ok(())
    }
}

mod verification_tests {
    use super::*;

    #[test]
    fn test_verify_does_not_modify_input() -> Result<(), ImageError> {
        let bounds = SlotBounds::new(0x8_0000, 0x4_0000);
        let sig = signature_with(0x2000);
        let mut flash = sig.clone();
        let mut program_state = ImageState::new(bounds);
        program_state.program_block(0, &mut cmf_header())?;
        program_state.program_block(0x1000, &mut flash)?;

        let mut verify_state = ImageState::new(bounds);
        verify_state.verify_block(0, &cmf_header(), &cmf_header())?;
        verify_state.verify_block(0x1000, &sig, &flash)?;
        assert_eq!(sig, signature_with(0x2000));
        Ok(())
    }
}
