//! Identity-mapped DMA over the global heap.
//!
//! For platforms without an IOMMU where bus address == CPU address
//! (identity-mapped firmware environments, hosted tests).

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;

use super::{ConsistentRegion, DmaDirection, DmaError, DmaHandle, DmaMapper, RING_ALIGN};

/// Heap-backed, identity-mapped DMA.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityDma;

impl IdentityDma {
    /// Create the mapper.
    pub const fn new() -> Self {
        Self
    }
}

impl DmaMapper for IdentityDma {
    fn map(&self, buf: &[u8], direction: DmaDirection) -> Result<DmaHandle, DmaError> {
        if buf.is_empty() {
            return Err(DmaError::InvalidSize);
        }
        Ok(DmaHandle {
            bus: buf.as_ptr() as u64,
            len: buf.len(),
            direction,
        })
    }

    fn unmap(&self, _handle: DmaHandle) {}

    fn alloc_consistent(&self, size: usize) -> Result<ConsistentRegion, DmaError> {
        if size == 0 {
            return Err(DmaError::InvalidSize);
        }
        let layout = Layout::from_size_align(size, RING_ALIGN).map_err(|_| DmaError::InvalidSize)?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let cpu = NonNull::new(ptr).ok_or(DmaError::OutOfMemory)?;
        Ok(ConsistentRegion {
            cpu,
            bus: cpu.as_ptr() as u64,
            size,
        })
    }

    fn free_consistent(&self, region: ConsistentRegion) {
        if let Ok(layout) = Layout::from_size_align(region.size, RING_ALIGN) {
            // SAFETY: region came from alloc_consistent with this layout.
            unsafe { dealloc(region.cpu.as_ptr(), layout) }
        }
    }
}
