//! Bitstream images built block by block.
//!
//! A section starts with a header block whose first word is the CMF magic,
//! followed by a signature block holding up to four section pointers at
//! 0xF00 and a bit-reversed CRC32 at 0xFFC.

const BLOCK_SIZE: usize = 0x1000;
const CMF_MAGIC: u32 = 0x6229_4895;
const POINTER_AT: usize = 0xF00;
const CRC_AT: usize = 0xFFC;
const MAX_POINTERS: usize = 4;

/// Image builder independent of the relocation engine
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    bytes: Vec<u8>,
}

impl ImageBuilder {
    /// Empty image
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a section header block
    pub fn header(mut self) -> Self {
        let mut block = vec![0u8; BLOCK_SIZE];
        block[..4].copy_from_slice(&CMF_MAGIC.to_le_bytes());
        self.bytes.extend(block);
        self
    }

    /// Append a signature block pointing at `pointers`, with a valid CRC
    pub fn signature(mut self, pointers: &[u64]) -> Self {
        let mut block: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
        block[POINTER_AT..POINTER_AT + 8].fill(0);
        let count = u32::try_from(pointers.len()).unwrap();
        block[POINTER_AT..POINTER_AT + 4].copy_from_slice(&count.to_le_bytes());
        for i in 0..MAX_POINTERS {
            let at = POINTER_AT + 8 + i * 8;
            let value = pointers.get(i).copied().unwrap_or(0);
            block[at..at + 8].copy_from_slice(&value.to_le_bytes());
        }
        seal(&mut block);
        self.bytes.extend(block);
        self
    }

    /// Append `len` bytes of `byte`
    pub fn data(mut self, byte: u8, len: usize) -> Self {
        self.bytes.extend(std::iter::repeat_n(byte, len));
        self
    }

    /// Append `bytes` verbatim
    pub fn data_bytes(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Finished image
    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Recompute the CRC field of a full signature block
pub fn seal(block: &mut [u8]) {
    let reversed: Vec<u8> = block[..CRC_AT].iter().map(|b| b.reverse_bits()).collect();
    let crc = crc32fast::hash(&reversed);
    let stored: Vec<u8> = crc.to_be_bytes().iter().map(|b| b.reverse_bits()).collect();
    block[CRC_AT..BLOCK_SIZE].copy_from_slice(&stored);
}

/// Pointer slots of the signature block at block index `index`
pub fn pointers_at(image: &[u8], index: usize) -> [u64; MAX_POINTERS] {
    let block = &image[index * BLOCK_SIZE..(index + 1) * BLOCK_SIZE];
    let mut pointers = [0u64; MAX_POINTERS];
    for (i, slot) in pointers.iter_mut().enumerate() {
        let at = POINTER_AT + 8 + i * 8;
        *slot = u64::from_le_bytes(block[at..at + 8].try_into().unwrap());
    }
    pointers
}

/// Whether the signature block at `index` carries a matching CRC
pub fn crc_matches(image: &[u8], index: usize) -> bool {
    let block = &image[index * BLOCK_SIZE..(index + 1) * BLOCK_SIZE];
    let mut copy = block.to_vec();
    seal(&mut copy);
    copy == block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_layout() {
        let image = ImageBuilder::new().header().signature(&[0x3000]).build();
        assert_eq!(image.len(), 2 * BLOCK_SIZE);
        assert_eq!(pointers_at(&image, 1), [0x3000, 0, 0, 0]);
        assert!(crc_matches(&image, 1));

        let mut broken = image.clone();
        broken[BLOCK_SIZE + 5] ^= 1;
        assert!(!crc_matches(&broken, 1));
    }
}
