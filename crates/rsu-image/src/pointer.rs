//! Main image pointer table inside a signature block
//!
//! Layout at [`POINTER_OFFSET`](crate::POINTER_OFFSET), little-endian:
//!
//! | offset | field      |
//! |--------|------------|
//! | 0x00   | `num_ptrs` |
//! | 0x04   | reserved   |
//! | 0x08   | `ptrs[4]`  |

use crate::{MAX_POINTERS, POINTER_OFFSET};

const NUM_PTRS_AT: usize = POINTER_OFFSET;
const PTRS_AT: usize = POINTER_OFFSET + 8;

/// Decoded pointer table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerTable {
    /// Declared number of pointers
    pub num_ptrs: u32,
    /// Pointer slots; zero means unused
    pub pointers: [u64; MAX_POINTERS],
}

fn read_u32(block: &[u8], at: usize) -> Option<u32> {
    block
        .get(at..)
        .and_then(|s| s.first_chunk::<4>())
        .map(|b| u32::from_le_bytes(*b))
}

fn read_u64(block: &[u8], at: usize) -> Option<u64> {
    block
        .get(at..)
        .and_then(|s| s.first_chunk::<8>())
        .map(|b| u64::from_le_bytes(*b))
}

impl PointerTable {
    /// Decode the pointer table from a full signature block
    pub fn read(block: &[u8]) -> Option<Self> {
        let num_ptrs = read_u32(block, NUM_PTRS_AT)?;
        let mut pointers = [0u64; MAX_POINTERS];
        for (i, slot) in pointers.iter_mut().enumerate() {
            *slot = read_u64(block, PTRS_AT + i * 8)?;
        }
        Some(Self { num_ptrs, pointers })
    }

    /// Store the pointer slots back into `block`, leaving `num_ptrs` as is
    pub fn write_pointers(&self, block: &mut [u8]) -> Option<()> {
        for (i, ptr) in self.pointers.iter().enumerate() {
            let at = PTRS_AT + i * 8;
            block.get_mut(at..at + 8)?.copy_from_slice(&ptr.to_le_bytes());
        }
        Some(())
    }

    /// Non-zero pointers in slot order
    pub fn active(&self) -> impl Iterator<Item = u64> + '_ {
        self.pointers.iter().copied().filter(|&p| p != 0)
    }

    /// Add `base` to every non-zero pointer
    pub fn rebase(&mut self, base: u64) {
        for ptr in self.pointers.iter_mut().filter(|p| **p != 0) {
            *ptr = ptr.wrapping_add(base);
        }
    }
}
