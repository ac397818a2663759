//! Hardware access layer.
//!
//! The driver core talks to the device only through [`RegisterAccess`].
//! [`Hw`] wraps a register backend with the chip generation and the
//! per-adapter register lock that serializes read-modify-write sequences.
//!
//! # Reference
//! Intel 82576 Datasheet, Section 8

pub mod barriers;
pub mod mmio;
pub mod phy;
pub mod regs;

use spin::Mutex;

pub use mmio::Mmio;
pub use phy::{LinkSpeed, LinkStatus};

// ═══════════════════════════════════════════════════════════════════════════
// REGISTER CAPABILITY
// ═══════════════════════════════════════════════════════════════════════════

/// Register space of one adapter.
///
/// Offsets are byte offsets from the start of BAR0.
pub trait RegisterAccess {
    /// Read a 32-bit register.
    fn read32(&self, reg: u32) -> u32;

    /// Write a 32-bit register.
    fn write32(&self, reg: u32, value: u32);

    /// Force earlier posted writes to reach the device.
    #[inline]
    fn write_flush(&self) {
        let _ = self.read32(regs::STATUS);
    }

    /// Write element `index` of a register array.
    #[inline]
    fn write_array32(&self, base: u32, index: u32, value: u32) {
        self.write32(base + (index << 2), value);
    }

    /// Read element `index` of a register array.
    #[inline]
    fn read_array32(&self, base: u32, index: u32) -> u32 {
        self.read32(base + (index << 2))
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &T {
    fn read32(&self, reg: u32) -> u32 {
        (**self).read32(reg)
    }

    fn write32(&self, reg: u32, value: u32) {
        (**self).write32(reg, value)
    }

    fn write_flush(&self) {
        (**self).write_flush()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CHIP GENERATION
// ═══════════════════════════════════════════════════════════════════════════

/// MAC generation.
///
/// Ordered oldest to newest so `>=` comparisons read like the datasheets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Generation {
    /// 82575: MSIXBM bitmask vector tables, per-ring context index.
    I82575,
    /// 82576: per-byte IVAR table, VLVF/VMOLR virtualization.
    I82576,
    /// 82580: half-register IVAR layout.
    I82580,
}

impl Generation {
    /// Receive address (RAR) entries.
    pub fn rar_entry_count(&self) -> u32 {
        match self {
            Generation::I82575 => 16,
            Generation::I82576 | Generation::I82580 => 24,
        }
    }

    /// Maximum RSS queues.
    pub fn max_rss_queues(&self) -> u16 {
        match self {
            Generation::I82575 => 4,
            Generation::I82576 | Generation::I82580 => 8,
        }
    }

    /// RX descriptor prefetch threshold.
    pub fn rx_pthresh(&self) -> u32 {
        if *self <= Generation::I82576 {
            16
        } else {
            8
        }
    }
}

impl core::fmt::Display for Generation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Generation::I82575 => write!(f, "82575"),
            Generation::I82576 => write!(f, "82576"),
            Generation::I82580 => write!(f, "82580"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HW
// ═══════════════════════════════════════════════════════════════════════════

/// Register backend plus generation and register lock.
pub struct Hw<R> {
    regs: R,
    generation: Generation,
    lock: Mutex<()>,
}

impl<R: RegisterAccess> Hw<R> {
    /// Wrap a register backend.
    pub fn new(regs: R, generation: Generation) -> Self {
        Self {
            regs,
            generation,
            lock: Mutex::new(()),
        }
    }

    /// Chip generation.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Underlying register backend.
    #[inline]
    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// Read a register.
    #[inline]
    pub fn read(&self, reg: u32) -> u32 {
        self.regs.read32(reg)
    }

    /// Write a register.
    #[inline]
    pub fn write(&self, reg: u32, value: u32) {
        self.regs.write32(reg, value)
    }

    /// Flush posted writes.
    #[inline]
    pub fn flush(&self) {
        self.regs.write_flush()
    }

    /// Read element `index` of a register array.
    #[inline]
    pub fn read_array(&self, base: u32, index: u32) -> u32 {
        self.regs.read_array32(base, index)
    }

    /// Write element `index` of a register array.
    #[inline]
    pub fn write_array(&self, base: u32, index: u32, value: u32) {
        self.regs.write_array32(base, index, value)
    }

    /// Read-modify-write under the register lock.
    ///
    /// Returns the value written.
    pub fn rmw(&self, reg: u32, f: impl FnOnce(u32) -> u32) -> u32 {
        let _guard = self.lock.lock();
        let value = f(self.regs.read32(reg));
        self.regs.write32(reg, value);
        value
    }

    /// Read-modify-write of a register array element under the register lock.
    pub fn rmw_array(&self, base: u32, index: u32, f: impl FnOnce(u32) -> u32) -> u32 {
        let _guard = self.lock.lock();
        let value = f(self.regs.read_array32(base, index));
        self.regs.write_array32(base, index, value);
        value
    }

    /// Run a multi-register sequence under the register lock.
    pub fn locked<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        let _guard = self.lock.lock();
        f(&self.regs)
    }

    /// Current link state from STATUS.
    pub fn link_status(&self) -> LinkStatus {
        LinkStatus::from_status(self.read(regs::STATUS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockRegisters;

    #[test]
    fn test_generation_ordering() {
        assert!(Generation::I82580 > Generation::I82576);
        assert!(Generation::I82575 < Generation::I82576);
        assert_eq!(Generation::I82576.rx_pthresh(), 16);
        assert_eq!(Generation::I82580.rx_pthresh(), 8);
    }

    #[test]
    fn test_rmw_preserves_other_bits() {
        let hw = Hw::new(MockRegisters::new(), Generation::I82576);
        hw.write(regs::VFRE, 0b0101);
        let v = hw.rmw(regs::VFRE, |v| v | 0b0010);
        assert_eq!(v, 0b0111);
        assert_eq!(hw.read(regs::VFRE), 0b0111);
    }

    #[test]
    fn test_write_array_uses_dword_stride() {
        let hw = Hw::new(MockRegisters::new(), Generation::I82576);
        hw.write_array(regs::IVAR0, 3, 0x81);
        assert_eq!(hw.read(regs::IVAR0 + 12), 0x81);
    }
}
