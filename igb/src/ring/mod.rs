//! Descriptor rings.
//!
//! A ring is a fixed array of hardware descriptors in coherent memory plus
//! a parallel buffer-ownership table. Software owns both cursors:
//! `next_to_use` is where the next descriptor is posted and
//! `next_to_clean` is where the next write-back is consumed. One slot is
//! always left empty so a full ring is distinguishable from an empty one.
//!
//! # Lifecycle
//! ```text
//! new() ──► allocate() ──► configure() ──► [post / clean_irq]* ──► clean() ──► free()
//!                              ▲                                     │
//!                              └──────────── (reset / MTU) ──────────┘
//! ```

pub mod buffer;
pub mod configure;
pub mod desc;

use alloc::vec::Vec;

use bitflags::bitflags;
use log::debug;

use crate::config::{MAX_RING_COUNT, MIN_RING_COUNT};
use crate::dma::{ring_bytes, ConsistentRegion, DmaMapper};
use crate::error::{IgbError, Result};
use crate::stats::{RxRingStats, TxRingStats};

pub use buffer::{BufferSlot, RxBuffer, RxBufferInfo, TxBufferInfo};
pub use desc::{RawDesc, DESC_SIZE};

use crate::rx::RxPacket;

// ═══════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════

/// Page size backing paged receive buffers.
pub const PAGE_SIZE: usize = 4096;
/// Half-page receive buffer used in paged mode.
pub const HALF_PAGE: usize = PAGE_SIZE / 2;
/// Receive buffer for frames up to 1024 bytes.
pub const RXBUFFER_1024: u16 = 1024;
/// Receive buffer for a VLAN-tagged 1500 MTU frame.
pub const MAXIMUM_ETHERNET_VLAN_SIZE: u16 = 1522;

bitflags! {
    /// Per-ring feature flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RingFlags: u8 {
        /// Hardware RX checksum reporting is trusted.
        const RX_CSUM = 0x01;
        /// Hardware may report SCTP checksum results.
        const RX_SCTP_CSUM = 0x02;
        /// Context descriptors carry the ring's register index (82575).
        const TX_CTX_IDX = 0x04;
        /// Queue disabled by `down`; no refills until reconfigured.
        const QUIESCED = 0x08;
    }
}

/// Traffic accumulated since the last throttle computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItrSample {
    /// Bytes completed.
    pub bytes: u32,
    /// Packets completed.
    pub packets: u32,
}

impl ItrSample {
    /// Add completed work.
    #[inline]
    pub fn add(&mut self, bytes: u32, packets: u32) {
        self.bytes = self.bytes.wrapping_add(bytes);
        self.packets = self.packets.wrapping_add(packets);
    }

    /// Zero both counters.
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DESCRIPTOR RING
// ═══════════════════════════════════════════════════════════════════════════

/// Descriptor memory, ownership table and cursors shared by TX and RX rings.
pub struct DescRing<B> {
    /// Number of descriptors.
    count: u16,
    /// Software queue index.
    pub(crate) queue_index: u16,
    /// Hardware queue register index.
    pub(crate) reg_idx: u16,
    /// Next descriptor to post.
    pub(crate) next_to_use: u16,
    /// Next descriptor to consume.
    pub(crate) next_to_clean: u16,
    /// Descriptor memory; `None` before allocation and after free.
    desc: Option<ConsistentRegion>,
    /// Buffer-ownership table, one record per descriptor.
    pub(crate) buffer_info: Vec<B>,
    /// Owning queue vector (arena index).
    pub(crate) q_vector: Option<usize>,
    /// Feature flags.
    pub(crate) flags: RingFlags,
    /// Throttle input.
    pub(crate) itr: ItrSample,
}

impl<B: BufferSlot> DescRing<B> {
    /// Create an unallocated ring.
    pub fn new(queue_index: u16, count: u16) -> Self {
        Self {
            count,
            queue_index,
            reg_idx: queue_index,
            next_to_use: 0,
            next_to_clean: 0,
            desc: None,
            buffer_info: Vec::new(),
            q_vector: None,
            flags: RingFlags::empty(),
            itr: ItrSample::default(),
        }
    }

    /// Number of descriptors.
    #[inline]
    pub fn count(&self) -> u16 {
        self.count
    }

    /// Hardware register index.
    #[inline]
    pub fn reg_idx(&self) -> u16 {
        self.reg_idx
    }

    /// Software queue index.
    #[inline]
    pub fn queue_index(&self) -> u16 {
        self.queue_index
    }

    /// Next descriptor to post.
    #[inline]
    pub fn next_to_use(&self) -> u16 {
        self.next_to_use
    }

    /// Next descriptor to consume.
    #[inline]
    pub fn next_to_clean(&self) -> u16 {
        self.next_to_clean
    }

    /// Descriptor memory is allocated.
    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.desc.is_some()
    }

    /// Bus address of descriptor memory.
    #[inline]
    pub fn desc_bus(&self) -> Option<u64> {
        self.desc.as_ref().map(|d| d.bus)
    }

    /// Descriptor ring length in bytes, as programmed into xDLEN.
    #[inline]
    pub fn len_bytes(&self) -> u32 {
        self.count as u32 * DESC_SIZE as u32
    }

    /// Allocate descriptor memory and the ownership table.
    ///
    /// On failure nothing stays allocated.
    pub fn allocate<D: DmaMapper + ?Sized>(&mut self, dma: &D) -> Result<()> {
        if !(MIN_RING_COUNT..=MAX_RING_COUNT).contains(&self.count) {
            return Err(IgbError::InvalidRingSize {
                requested: self.count,
            });
        }
        if self.is_allocated() {
            return Ok(());
        }

        let count = self.count as usize;
        let mut table = Vec::new();
        table
            .try_reserve_exact(count)
            .map_err(|_| IgbError::OutOfMemory)?;
        table.resize_with(count, B::default);

        // `table` is dropped on this error path.
        let region = dma
            .alloc_consistent(ring_bytes(count * DESC_SIZE))
            .map_err(|_| IgbError::OutOfMemory)?;

        debug!(
            "igb: queue {} ring of {} descriptors at bus {:#x}",
            self.queue_index, self.count, region.bus
        );
        self.desc = Some(region);
        self.buffer_info = table;
        self.next_to_use = 0;
        self.next_to_clean = 0;
        Ok(())
    }

    /// Unused descriptors; always in `0..count`.
    #[inline]
    pub fn unused(&self) -> u16 {
        let base = if self.next_to_clean > self.next_to_use {
            0
        } else {
            self.count
        };
        base + self.next_to_clean - self.next_to_use - 1
    }

    /// Advance an index by one slot.
    #[inline]
    pub fn next_index(&self, i: u16) -> u16 {
        if i + 1 == self.count {
            0
        } else {
            i + 1
        }
    }

    /// Step an index back by one slot.
    #[inline]
    pub fn prev_index(&self, i: u16) -> u16 {
        if i == 0 {
            self.count - 1
        } else {
            i - 1
        }
    }

    /// Ownership records currently holding a mapping or buffer.
    pub fn owned_entries(&self) -> usize {
        self.buffer_info.iter().filter(|b| b.is_owned()).count()
    }

    /// Read descriptor `idx`.
    #[inline]
    pub fn read_desc(&self, idx: u16) -> RawDesc {
        match self.desc_ptr(idx) {
            // SAFETY: idx < count and region holds count descriptors.
            Some(ptr) => unsafe { core::ptr::read_volatile(ptr) },
            None => RawDesc::default(),
        }
    }

    /// Write descriptor `idx`.
    #[inline]
    pub fn write_desc(&mut self, idx: u16, desc: RawDesc) {
        if let Some(ptr) = self.desc_ptr(idx) {
            // SAFETY: idx < count and region holds count descriptors.
            unsafe { core::ptr::write_volatile(ptr, desc) }
        }
    }

    /// Modify descriptor `idx` in place.
    #[inline]
    pub fn update_desc(&mut self, idx: u16, f: impl FnOnce(&mut RawDesc)) {
        let mut d = self.read_desc(idx);
        f(&mut d);
        self.write_desc(idx, d);
    }

    /// Release every owned mapping and buffer, zero the descriptors and
    /// rewind both cursors.
    ///
    /// Safe on a ring that was never populated or never allocated.
    pub fn clean<D: DmaMapper + ?Sized>(&mut self, dma: &D) {
        for info in self.buffer_info.iter_mut() {
            info.release(dma);
        }
        if let Some(region) = self.desc.as_mut() {
            region.zero();
        }
        self.next_to_use = 0;
        self.next_to_clean = 0;
        self.itr.clear();
    }

    /// Release descriptor memory. No-op when already released.
    pub fn free<D: DmaMapper + ?Sized>(&mut self, dma: &D) {
        self.clean(dma);
        self.buffer_info = Vec::new();
        if let Some(region) = self.desc.take() {
            dma.free_consistent(region);
        }
    }

    #[inline]
    fn desc_ptr(&self, idx: u16) -> Option<*mut RawDesc> {
        if idx >= self.count {
            return None;
        }
        self.desc
            .as_ref()
            // SAFETY: offset stays inside the region.
            .map(|d| unsafe { (d.cpu.as_ptr() as *mut RawDesc).add(idx as usize) })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TX / RX RINGS
// ═══════════════════════════════════════════════════════════════════════════

/// Transmit ring.
pub struct TxRing {
    /// Descriptors, ownership table and cursors.
    pub ring: DescRing<TxBufferInfo>,
    /// Counters.
    pub stats: TxRingStats,
    /// Watchdog asked for a hang check on the next clean.
    pub(crate) detect_tx_hung: bool,
    /// Queue is stopped towards the stack.
    pub(crate) stopped: bool,
    /// A unit hang was detected; the watchdog resets the adapter.
    pub(crate) hung: bool,
}

impl TxRing {
    /// Create an unallocated TX ring.
    pub fn new(queue_index: u16, count: u16) -> Self {
        Self {
            ring: DescRing::new(queue_index, count),
            stats: TxRingStats::default(),
            detect_tx_hung: false,
            stopped: false,
            hung: false,
        }
    }

    /// Queue is stopped.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Release buffers and rewind.
    pub fn clean<D: DmaMapper + ?Sized>(&mut self, dma: &D) {
        self.ring.clean(dma);
        self.detect_tx_hung = false;
        self.hung = false;
    }
}

/// Receive buffer strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxBufferMode {
    /// One contiguous buffer per descriptor, handed to the stack whole.
    Whole(u16),
    /// Half-page buffers; large frames span descriptors.
    Paged,
}

impl RxBufferMode {
    /// Buffer length programmed into SRRCTL.
    pub fn buffer_len(&self) -> u16 {
        match self {
            RxBufferMode::Whole(len) => *len,
            RxBufferMode::Paged => HALF_PAGE as u16,
        }
    }

    /// Mode for a maximum frame size.
    pub fn for_max_frame(max_frame: u32) -> Self {
        if max_frame <= RXBUFFER_1024 as u32 {
            RxBufferMode::Whole(RXBUFFER_1024)
        } else if max_frame <= MAXIMUM_ETHERNET_VLAN_SIZE as u32 {
            RxBufferMode::Whole(MAXIMUM_ETHERNET_VLAN_SIZE)
        } else {
            RxBufferMode::Paged
        }
    }
}

/// Receive ring.
pub struct RxRing {
    /// Descriptors, ownership table and cursors.
    pub ring: DescRing<RxBufferInfo>,
    /// Buffer strategy.
    pub buffer_mode: RxBufferMode,
    /// Counters.
    pub stats: RxRingStats,
    /// Frame being assembled across descriptors.
    pub(crate) partial: Option<RxPacket>,
}

impl RxRing {
    /// Create an unallocated RX ring.
    pub fn new(queue_index: u16, count: u16) -> Self {
        let mut ring = DescRing::new(queue_index, count);
        ring.flags = RingFlags::RX_CSUM;
        Self {
            ring,
            buffer_mode: RxBufferMode::Whole(MAXIMUM_ETHERNET_VLAN_SIZE),
            stats: RxRingStats::default(),
            partial: None,
        }
    }

    /// Release buffers, drop any half-assembled frame and rewind.
    pub fn clean<D: DmaMapper + ?Sized>(&mut self, dma: &D) {
        self.partial = None;
        self.ring.clean(dma);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::IdentityDma;
    use crate::testutil::FaultyDma;
    use proptest::prelude::*;

    #[test]
    fn test_allocate_zeroes_cursors_and_table() {
        let dma = IdentityDma::new();
        let mut ring: DescRing<TxBufferInfo> = DescRing::new(0, 256);
        ring.allocate(&dma).unwrap();
        assert!(ring.is_allocated());
        assert_eq!(ring.buffer_info.len(), 256);
        assert_eq!(ring.unused(), 255);
        assert_eq!(ring.owned_entries(), 0);
        ring.free(&dma);
    }

    #[test]
    fn test_allocate_failure_leaves_no_state() {
        let dma = FaultyDma::failing_consistent();
        let mut ring: DescRing<RxBufferInfo> = DescRing::new(0, 256);
        assert_eq!(ring.allocate(&dma), Err(IgbError::OutOfMemory));
        assert!(!ring.is_allocated());
        assert!(ring.buffer_info.is_empty());
    }

    #[test]
    fn test_allocate_rejects_out_of_range_count() {
        let dma = IdentityDma::new();
        let mut ring: DescRing<TxBufferInfo> = DescRing::new(0, 16);
        assert_eq!(
            ring.allocate(&dma),
            Err(IgbError::InvalidRingSize { requested: 16 })
        );
    }

    #[test]
    fn test_free_is_idempotent() {
        let dma = FaultyDma::new();
        let mut ring: DescRing<TxBufferInfo> = DescRing::new(0, 80);
        ring.allocate(&dma).unwrap();
        ring.free(&dma);
        ring.free(&dma);
        assert_eq!(dma.consistent_outstanding(), 0);
    }

    #[test]
    fn test_clean_on_unallocated_ring() {
        let dma = IdentityDma::new();
        let mut ring: DescRing<RxBufferInfo> = DescRing::new(3, 128);
        ring.clean(&dma);
        assert_eq!(ring.next_to_use(), 0);
        assert_eq!(ring.next_to_clean(), 0);
    }

    #[test]
    fn test_unused_with_wrapped_cursors() {
        let mut ring: DescRing<TxBufferInfo> = DescRing::new(0, 256);
        ring.next_to_use = 10;
        ring.next_to_clean = 200;
        assert_eq!(ring.unused(), 189);
    }

    #[test]
    fn test_rx_buffer_mode_thresholds() {
        assert_eq!(RxBufferMode::for_max_frame(600), RxBufferMode::Whole(1024));
        assert_eq!(RxBufferMode::for_max_frame(1522), RxBufferMode::Whole(1522));
        assert_eq!(RxBufferMode::for_max_frame(9018), RxBufferMode::Paged);
    }

    proptest! {
        #[test]
        fn test_unused_never_reports_full(count in 80u16..=4096, a in 0u16..4096, b in 0u16..4096) {
            let mut ring: DescRing<TxBufferInfo> = DescRing::new(0, count);
            ring.next_to_use = a % count;
            ring.next_to_clean = b % count;
            let unused = ring.unused();
            prop_assert!(unused < count);
        }

        #[test]
        fn test_next_and_prev_are_inverse(count in 80u16..=4096, i in 0u16..4096) {
            let ring: DescRing<TxBufferInfo> = DescRing::new(0, count);
            let i = i % count;
            prop_assert_eq!(ring.prev_index(ring.next_index(i)), i);
        }
    }
}
