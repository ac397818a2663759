//! Memory-mapped register backend.
//!
//! # Safety
//! - Base address must be the mapped BAR0 of the device
//! - Mapping must be uncached
//! - Offsets must stay inside the BAR

use super::RegisterAccess;

/// BAR0 register window accessed with volatile loads and stores.
#[derive(Debug)]
pub struct Mmio {
    base: u64,
}

impl Mmio {
    /// Wrap a mapped BAR0.
    ///
    /// # Safety
    /// `base` must be a valid, mapped, uncached MMIO address for the
    /// lifetime of the returned value.
    pub unsafe fn new(base: u64) -> Self {
        Self { base }
    }

    /// BAR0 base address.
    pub fn base(&self) -> u64 {
        self.base
    }
}

impl RegisterAccess for Mmio {
    #[inline]
    fn read32(&self, reg: u32) -> u32 {
        // SAFETY: constructor contract guarantees the window is mapped.
        unsafe { core::ptr::read_volatile((self.base + reg as u64) as *const u32) }
    }

    #[inline]
    fn write32(&self, reg: u32, value: u32) {
        // SAFETY: constructor contract guarantees the window is mapped.
        unsafe { core::ptr::write_volatile((self.base + reg as u64) as *mut u32, value) }
    }
}

// Safety: the window is plain device memory; all ordering is explicit.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_mmio_over_plain_memory() {
        let mut window = vec![0u32; 16];
        let mmio = unsafe { Mmio::new(window.as_mut_ptr() as u64) };
        mmio.write32(8, 0xDEAD_BEEF);
        assert_eq!(mmio.read32(8), 0xDEAD_BEEF);
        assert_eq!(window[2], 0xDEAD_BEEF);
    }
}
