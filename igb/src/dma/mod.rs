//! DMA capability.
//!
//! Descriptor rings live in coherent ("consistent") memory; packet
//! buffers are streamed through short-lived mappings. The platform
//! supplies both through [`DmaMapper`].
//!
//! # Reference
//! Documentation/DMA-API-HOWTO.txt (consistent vs. streaming mappings)

mod identity;

use core::ptr::NonNull;

pub use identity::IdentityDma;

/// Alignment and granularity of descriptor ring memory.
pub const RING_ALIGN: usize = 4096;

// ═══════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════

/// DMA layer errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// No memory for a coherent region.
    OutOfMemory,
    /// The IOMMU or bounce layer refused a streaming mapping.
    MappingFailed,
    /// Zero-sized or overflowing request.
    InvalidSize,
}

impl core::fmt::Display for DmaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "Out of DMA memory"),
            Self::MappingFailed => write!(f, "Mapping failed"),
            Self::InvalidSize => write!(f, "Invalid DMA size"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HANDLES
// ═══════════════════════════════════════════════════════════════════════════

/// Direction of a streaming mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// CPU writes, device reads (TX).
    ToDevice,
    /// Device writes, CPU reads (RX).
    FromDevice,
}

/// One outstanding streaming mapping.
///
/// Not `Clone`: each handle is unmapped exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct DmaHandle {
    /// Bus address handed to the device.
    pub bus: u64,
    /// Mapped length.
    pub len: usize,
    /// Mapping direction.
    pub direction: DmaDirection,
}

/// Coherent memory shared with the device.
#[derive(Debug)]
pub struct ConsistentRegion {
    /// CPU address.
    pub cpu: NonNull<u8>,
    /// Bus address.
    pub bus: u64,
    /// Size in bytes.
    pub size: usize,
}

impl ConsistentRegion {
    /// Zero the whole region.
    pub fn zero(&mut self) {
        // SAFETY: region is owned and `size` bytes long.
        unsafe { core::ptr::write_bytes(self.cpu.as_ptr(), 0, self.size) }
    }
}

// Safety: the region is owned by exactly one ring.
unsafe impl Send for ConsistentRegion {}

// ═══════════════════════════════════════════════════════════════════════════
// CAPABILITY
// ═══════════════════════════════════════════════════════════════════════════

/// DMA operations supplied by the platform.
pub trait DmaMapper {
    /// Map `buf` for device access.
    fn map(&self, buf: &[u8], direction: DmaDirection) -> Result<DmaHandle, DmaError>;

    /// Release a streaming mapping.
    fn unmap(&self, handle: DmaHandle);

    /// Allocate zeroed coherent memory of `size` bytes, 4 KiB aligned.
    fn alloc_consistent(&self, size: usize) -> Result<ConsistentRegion, DmaError>;

    /// Release coherent memory.
    fn free_consistent(&self, region: ConsistentRegion);
}

impl<T: DmaMapper + ?Sized> DmaMapper for &T {
    fn map(&self, buf: &[u8], direction: DmaDirection) -> Result<DmaHandle, DmaError> {
        (**self).map(buf, direction)
    }

    fn unmap(&self, handle: DmaHandle) {
        (**self).unmap(handle)
    }

    fn alloc_consistent(&self, size: usize) -> Result<ConsistentRegion, DmaError> {
        (**self).alloc_consistent(size)
    }

    fn free_consistent(&self, region: ConsistentRegion) {
        (**self).free_consistent(region)
    }
}

/// Round `size` up to the ring allocation granularity.
#[inline]
pub const fn ring_bytes(size: usize) -> usize {
    (size + RING_ALIGN - 1) & !(RING_ALIGN - 1)
}
