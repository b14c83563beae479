//! A memory device that stays inspectable after it is boxed into a session.

use rsu_flash::{BlockDevice, FlashError, MemoryDevice};
use std::cell::RefCell;
use std::rc::Rc;

/// Cloneable handle to one [`MemoryDevice`]
///
/// Give one clone to the code under test and keep another to look at the
/// bytes, counters or fault window afterwards.
#[derive(Debug, Clone)]
pub struct SharedDevice {
    inner: Rc<RefCell<MemoryDevice>>,
}

impl SharedDevice {
    /// Share `dev`
    pub fn new(dev: MemoryDevice) -> Self {
        Self {
            inner: Rc::new(RefCell::new(dev)),
        }
    }

    /// Run `f` against the shared device
    pub fn with<R>(&self, f: impl FnOnce(&mut MemoryDevice) -> R) -> R {
        f(&mut self.inner.borrow_mut())
    }

    /// Copy of `len` bytes at `offset`
    pub fn bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        self.with(|dev| dev.as_bytes()[offset..offset + len].to_vec())
    }
}

impl BlockDevice for SharedDevice {
    fn size(&self) -> u64 {
        self.inner.borrow().size()
    }

    fn erase_size(&self) -> u32 {
        self.inner.borrow().erase_size()
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), FlashError> {
        self.inner.borrow_mut().read(offset, buf)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FlashError> {
        self.inner.borrow_mut().write(offset, data)
    }

    fn erase(&mut self, offset: u64, len: u64) -> Result<(), FlashError> {
        self.inner.borrow_mut().erase(offset, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_see_the_same_bytes() {
        let shared = SharedDevice::new(MemoryDevice::new(0x100, 0));
        let mut writer = shared.clone();
        writer.write(0x10, &[1, 2, 3]).unwrap();
        assert_eq!(shared.bytes(0x10, 3), vec![1, 2, 3]);
        assert_eq!(shared.with(|dev| dev.stats().writes), 1);
    }
}
