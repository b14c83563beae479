//! Bit-reversed CRC32 used by bitstream signature blocks
//!
//! The bitstream is checksummed LSB-first: every byte has its bits reversed
//! before it is fed to a standard CRC32, and the result is stored as the
//! bit-reversal of the CRC in little-endian order. Read back through the
//! same per-byte reversal, that is the plain CRC in big-endian order.

use crate::{BLOCK_SIZE, CRC_OFFSET};

const REVERSE_CHUNK: usize = 256;

/// CRC32 of `data` with the bits of every byte reversed first
pub fn bit_reversed_crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    let mut scratch = [0u8; REVERSE_CHUNK];
    for chunk in data.chunks(REVERSE_CHUNK) {
        let reversed = scratch.get_mut(..chunk.len()).unwrap_or_default();
        for (dst, src) in reversed.iter_mut().zip(chunk) {
            *dst = src.reverse_bits();
        }
        hasher.update(reversed);
    }
    hasher.finalize()
}

/// Encode a computed CRC into the four on-flash bytes
pub fn encode_crc(crc: u32) -> [u8; 4] {
    crc.reverse_bits().to_le_bytes()
}

/// Decode the four on-flash bytes back into a CRC value
pub fn decode_crc(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes).reverse_bits()
}

/// CRC computed over a signature block, excluding the CRC field
pub fn compute_block_crc(block: &[u8]) -> Option<u32> {
    block.get(..CRC_OFFSET).map(bit_reversed_crc32)
}

/// CRC stored at the end of a signature block
pub fn stored_block_crc(block: &[u8]) -> Option<u32> {
    block
        .get(CRC_OFFSET..BLOCK_SIZE)
        .and_then(|field| field.first_chunk::<4>())
        .map(|bytes| decode_crc(*bytes))
}

/// Recompute the CRC of a signature block and store it in place
///
/// Returns the new CRC, or `None` when the block is shorter than
/// [`BLOCK_SIZE`].
pub fn refresh_block_crc(block: &mut [u8]) -> Option<u32> {
    let crc = compute_block_crc(block)?;
    let field = block.get_mut(CRC_OFFSET..BLOCK_SIZE)?;
    field.copy_from_slice(&encode_crc(crc));
    Some(crc)
}
