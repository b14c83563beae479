//! Block-by-block relocation and verification state machine
//!
//! A bitstream is a chain of sections. Each section starts with a header
//! block; when the header carries [`CMF_MAGIC`] the block after it is a
//! signature block whose pointer table names further sections. The engine
//! walks the stream one [`BLOCK_SIZE`] block at a time, discovers sections
//! from those pointers, and either rebases the pointers for the destination
//! slot (programming) or checks flash contents against what programming
//! would have produced (verification).

use crate::crc::{compute_block_crc, refresh_block_crc, stored_block_crc};
use crate::error::{ImageError, ImageResult};
use crate::pointer::PointerTable;
use crate::{BLOCK_SIZE, CMF_MAGIC, MAX_POINTERS, MAX_SECTIONS};
use tracing::{debug, trace};

/// Classification of one image block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// First block of a section
    Header,
    /// Block carrying the pointer table and CRC
    Signature,
    /// Anything else
    Data,
}

/// Destination slot placement seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotBounds {
    /// Absolute flash offset of the slot
    pub offset: u64,
    /// Slot size in bytes
    pub size: u64,
}

impl SlotBounds {
    /// Placement at `offset` spanning `size` bytes
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

/// Per-call engine state
#[derive(Debug, Clone)]
pub struct ImageState {
    bounds: SlotBounds,
    next: BlockKind,
    sections: Vec<u64>,
    absolute: bool,
}

impl ImageState {
    /// Fresh state for a stream targeting `bounds`
    pub fn new(bounds: SlotBounds) -> Self {
        let mut sections = Vec::with_capacity(MAX_SECTIONS);
        sections.push(0);
        Self {
            bounds,
            next: BlockKind::Header,
            sections,
            absolute: false,
        }
    }

    /// Whether the image already carries final flash addresses
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Discovered section offsets, relative to the slot start
    pub fn sections(&self) -> &[u64] {
        &self.sections
    }

    /// Destination placement
    pub fn bounds(&self) -> SlotBounds {
        self.bounds
    }

    /// Rewrite `block` in place for programming at stream `offset`
    ///
    /// Signature blocks must pass their CRC check; for relative images the
    /// pointers are rebased by the slot offset and the CRC is recomputed.
    pub fn program_block(&mut self, offset: u64, block: &mut [u8]) -> ImageResult<BlockKind> {
        let kind = self.classify(offset);
        trace!(offset, ?kind, "program block");

        match kind {
            BlockKind::Header => self.advance_header(block),
            BlockKind::Signature => {
                require_full(offset, block)?;
                let stored = stored_block_crc(block);
                let computed = compute_block_crc(block);
                if let (Some(stored), Some(computed)) = (stored, computed)
                    && stored != computed
                {
                    debug!(offset, stored, computed, "signature block CRC mismatch");
                    return Err(ImageError::BadChecksum {
                        offset,
                        stored,
                        computed,
                    });
                }

                let table = self.scan_signature(offset, block)?;
                if !self.absolute {
                    relocate(offset, block, table, self.bounds.offset)?;
                }
                self.next = BlockKind::Data;
            }
            BlockKind::Data => {}
        }

        Ok(kind)
    }

    /// Compare `flash` against what programming `block` at `offset` yields
    ///
    /// `block` is never modified. Signature blocks of relative images are
    /// reconstructed with rebased pointers and a fresh CRC before comparing.
    pub fn verify_block(
        &mut self,
        offset: u64,
        block: &[u8],
        flash: &[u8],
    ) -> ImageResult<BlockKind> {
        let kind = self.classify(offset);
        trace!(offset, ?kind, "verify block");

        match kind {
            BlockKind::Header => {
                self.advance_header(block);
                compare(offset, block, flash)?;
            }
            BlockKind::Signature => {
                require_full(offset, block)?;
                let table = self.scan_signature(offset, block)?;
                if self.absolute {
                    compare(offset, block, flash)?;
                } else {
                    let mut expected = block.to_vec();
                    relocate(offset, &mut expected, table, self.bounds.offset)?;
                    compare(offset, &expected, flash)?;
                }
                self.next = BlockKind::Data;
            }
            BlockKind::Data => compare(offset, block, flash)?,
        }

        Ok(kind)
    }

    fn classify(&mut self, offset: u64) -> BlockKind {
        if self.sections.contains(&offset) {
            self.next = BlockKind::Header;
        }
        self.next
    }

    fn advance_header(&mut self, block: &[u8]) {
        let magic = block
            .first_chunk::<4>()
            .map(|b| u32::from_le_bytes(*b));
        self.next = if magic == Some(CMF_MAGIC) {
            BlockKind::Signature
        } else {
            BlockKind::Data
        };
    }

    fn scan_signature(&mut self, offset: u64, block: &[u8]) -> ImageResult<PointerTable> {
        let table = PointerTable::read(block).ok_or(ImageError::TruncatedSignatureBlock {
            offset,
            len: block.len(),
        })?;

        if table.num_ptrs as usize > MAX_POINTERS {
            return Err(ImageError::TooManyPointers {
                offset,
                count: table.num_ptrs,
            });
        }

        if offset == BLOCK_SIZE as u64 && table.active().any(|p| p > self.bounds.size) {
            debug!(
                slot_offset = self.bounds.offset,
                slot_size = self.bounds.size,
                "pointer beyond slot size, treating image as absolute"
            );
            self.absolute = true;
        }

        let (start, end) = if self.absolute {
            (self.bounds.offset, self.bounds.end())
        } else {
            (0, self.bounds.size)
        };

        for pointer in table.active() {
            if pointer < start || pointer >= end {
                return Err(ImageError::PointerOutOfRange {
                    offset,
                    pointer,
                    start,
                    end,
                });
            }

            let section = pointer - start;
            if self.sections.contains(&section) {
                continue;
            }
            if self.sections.len() >= MAX_SECTIONS {
                return Err(ImageError::TooManySections { offset });
            }
            trace!(section, "section discovered");
            self.sections.push(section);
        }

        Ok(table)
    }
}

fn require_full(offset: u64, block: &[u8]) -> ImageResult<()> {
    if block.len() < BLOCK_SIZE {
        return Err(ImageError::TruncatedSignatureBlock {
            offset,
            len: block.len(),
        });
    }
    Ok(())
}

fn relocate(offset: u64, block: &mut [u8], mut table: PointerTable, base: u64) -> ImageResult<()> {
    let len = block.len();
    let truncated = || ImageError::TruncatedSignatureBlock { offset, len };
    table.rebase(base);
    table.write_pointers(block).ok_or_else(truncated)?;
    refresh_block_crc(block).ok_or_else(truncated)?;
    Ok(())
}

fn compare(offset: u64, expected: &[u8], actual: &[u8]) -> ImageResult<()> {
    let first_diff = expected
        .iter()
        .zip(actual)
        .position(|(a, b)| a != b)
        .or_else(|| (expected.len() != actual.len()).then_some(expected.len().min(actual.len())));

    match first_diff {
        Some(at) => Err(ImageError::CompareMismatch {
            offset: offset.saturating_add(at as u64),
        }),
        None => Ok(()),
    }
}

/// Run the programming pass over a whole in-memory image
pub fn program_image(bounds: SlotBounds, image: &mut [u8]) -> ImageResult<ImageState> {
    let mut state = ImageState::new(bounds);
    for (index, block) in image.chunks_mut(BLOCK_SIZE).enumerate() {
        state.program_block((index * BLOCK_SIZE) as u64, block)?;
    }
    Ok(state)
}

/// Run the verification pass of `image` against `flash`
///
/// `flash` must hold at least as many bytes as `image`; any extra bytes
/// are ignored.
pub fn verify_image(bounds: SlotBounds, image: &[u8], flash: &[u8]) -> ImageResult<ImageState> {
    let mut state = ImageState::new(bounds);
    for (index, block) in image.chunks(BLOCK_SIZE).enumerate() {
        let start = index * BLOCK_SIZE;
        let stored = flash
            .get(start..start.saturating_add(block.len()))
            .unwrap_or_else(|| flash.get(start..).unwrap_or_default());
        state.verify_block(start as u64, block, stored)?;
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::refresh_block_crc;

    fn header() -> Vec<u8> {
        let mut block = vec![0u8; BLOCK_SIZE];
        if let Some(magic) = block.get_mut(..4) {
            magic.copy_from_slice(&CMF_MAGIC.to_le_bytes());
        }
        block
    }

    fn signature(pointers: &[u64]) -> Vec<u8> {
        let mut block = vec![0x5Au8; BLOCK_SIZE];
        let table = PointerTable {
            num_ptrs: pointers.len() as u32,
            pointers: {
                let mut p = [0u64; MAX_POINTERS];
                for (dst, src) in p.iter_mut().zip(pointers) {
                    *dst = *src;
                }
                p
            },
        };
        if let Some(field) = block.get_mut(crate::POINTER_OFFSET..crate::POINTER_OFFSET + 4) {
            field.copy_from_slice(&table.num_ptrs.to_le_bytes());
        }
        let _ = table.write_pointers(&mut block);
        let _ = refresh_block_crc(&mut block);
        block
    }

    fn image(pointers: &[u64]) -> Vec<u8> {
        let mut image = header();
        image.extend(signature(pointers));
        image.extend(vec![0x11u8; BLOCK_SIZE]);
        image
    }

    #[test]
    fn test_initial_state() {
        let state = ImageState::new(SlotBounds::new(0x10_0000, 0x8_0000));
        assert_eq!(state.sections(), &[0]);
        assert!(!state.is_absolute());
    }

    #[test]
    fn test_relative_image_is_rebased() -> ImageResult<()> {
        let bounds = SlotBounds::new(0x10_0000, 0x8_0000);
        let mut img = image(&[0x2000]);
        let state = program_image(bounds, &mut img)?;

        assert!(!state.is_absolute());
        assert_eq!(state.sections(), &[0, 0x2000]);
        let sig = img.get(BLOCK_SIZE..2 * BLOCK_SIZE).unwrap_or_default();
        let table = PointerTable::read(sig).unwrap_or_default();
        assert_eq!(table.pointers, [0x10_2000, 0, 0, 0]);
        assert_eq!(stored_block_crc(sig), compute_block_crc(sig));
        Ok(())
    }

    #[test]
    fn test_absolute_image_untouched() -> ImageResult<()> {
        let bounds = SlotBounds::new(0x10_0000, 0x8_0000);
        let original = image(&[0x10_2000]);
        let mut img = original.clone();
        let state = program_image(bounds, &mut img)?;

        assert!(state.is_absolute());
        assert_eq!(state.sections(), &[0, 0x2000]);
        assert_eq!(img, original);
        Ok(())
    }

    #[test]
    fn test_bad_crc_rejected() {
        let bounds = SlotBounds::new(0x10_0000, 0x8_0000);
        let mut img = image(&[0x2000]);
        if let Some(byte) = img.get_mut(BLOCK_SIZE + 10) {
            *byte ^= 1;
        }
        assert!(matches!(
            program_image(bounds, &mut img),
            Err(ImageError::BadChecksum { offset: 0x1000, .. })
        ));
    }

    #[test]
    fn test_non_cmf_header_means_data() -> ImageResult<()> {
        let mut state = ImageState::new(SlotBounds::new(0, 0x10000));
        let mut plain = vec![0u8; BLOCK_SIZE];
        assert_eq!(state.program_block(0, &mut plain)?, BlockKind::Header);
        let mut next = vec![0xFFu8; BLOCK_SIZE];
        assert_eq!(state.program_block(0x1000, &mut next)?, BlockKind::Data);
        assert_eq!(next, vec![0xFFu8; BLOCK_SIZE]);
        Ok(())
    }

    #[test]
    fn test_verify_detects_first_difference() -> ImageResult<()> {
        let bounds = SlotBounds::new(0x10_0000, 0x8_0000);
        let img = image(&[0x2000]);
        let mut flash = img.clone();
        program_image(bounds, &mut flash)?;
        verify_image(bounds, &img, &flash)?;

        if let Some(byte) = flash.get_mut(2 * BLOCK_SIZE + 7) {
            *byte = 0;
        }
        assert_eq!(
            verify_image(bounds, &img, &flash).err(),
            Some(ImageError::CompareMismatch {
                offset: 2 * BLOCK_SIZE as u64 + 7
            })
        );
        Ok(())
    }

    #[test]
    fn test_short_flash_is_mismatch() {
        let bounds = SlotBounds::new(0, 0x8_0000);
        let img = vec![0u8; 100];
        assert_eq!(
            verify_image(bounds, &img, img.get(..50).unwrap_or_default()).err(),
            Some(ImageError::CompareMismatch { offset: 50 })
        );
    }

    #[test]
    fn test_truncated_signature_block() {
        let bounds = SlotBounds::new(0, 0x8_0000);
        let mut img = header();
        img.extend(vec![0u8; 100]);
        assert_eq!(
            program_image(bounds, &mut img).err(),
            Some(ImageError::TruncatedSignatureBlock {
                offset: 0x1000,
                len: 100
            })
        );
    }

    #[test]
    fn test_relocate_short_block_is_truncated() {
        let mut short = vec![0u8; 0x800];
        assert_eq!(
            relocate(0x1000, &mut short, PointerTable::default(), 0x10_0000).err(),
            Some(ImageError::TruncatedSignatureBlock {
                offset: 0x1000,
                len: 0x800
            })
        );
    }
}
