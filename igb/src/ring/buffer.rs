//! Buffer-ownership records.
//!
//! One record per descriptor slot. A record owns at most one streaming
//! mapping and at most one pending buffer; releasing it gives both back.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::dma::{DmaHandle, DmaMapper};
use crate::tx::TxPacket;

/// Ownership record attached to a descriptor slot.
pub trait BufferSlot: Default {
    /// Unmap and drop whatever the slot holds.
    fn release<D: DmaMapper + ?Sized>(&mut self, dma: &D);

    /// Slot holds a mapping or a buffer.
    fn is_owned(&self) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════════
// TX
// ═══════════════════════════════════════════════════════════════════════════

/// TX slot state.
#[derive(Debug, Default)]
pub struct TxBufferInfo {
    /// Mapping of the fragment this descriptor points at.
    pub(crate) dma: Option<DmaHandle>,
    /// Bytes covered by this descriptor.
    pub(crate) length: u16,
    /// Tick at which the packet was posted; set on the first slot.
    pub(crate) time_stamp: Option<u64>,
    /// Index of the packet's last descriptor; set on the first slot.
    pub(crate) next_to_watch: Option<u16>,
    /// Packet released once its last descriptor completes.
    pub(crate) packet: Option<TxPacket>,
    /// Segments this packet produces on the wire.
    pub(crate) gso_segs: u16,
    /// Bytes this packet produces on the wire.
    pub(crate) bytecount: u32,
}

impl BufferSlot for TxBufferInfo {
    fn release<D: DmaMapper + ?Sized>(&mut self, dma: &D) {
        if let Some(handle) = self.dma.take() {
            dma.unmap(handle);
        }
        self.packet = None;
        self.time_stamp = None;
        self.next_to_watch = None;
        self.length = 0;
        self.gso_segs = 0;
        self.bytecount = 0;
    }

    fn is_owned(&self) -> bool {
        self.dma.is_some() || self.packet.is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RX
// ═══════════════════════════════════════════════════════════════════════════

/// Buffer posted to an RX descriptor.
#[derive(Debug)]
pub enum RxBuffer {
    /// Whole-frame buffer.
    Whole(Vec<u8>),
    /// Half of a page; `offset` is 0 or half a page.
    Paged {
        /// Backing page.
        page: Box<[u8]>,
        /// Offset of the half in use.
        offset: usize,
    },
}

impl RxBuffer {
    /// Bytes the device may write.
    pub fn dma_slice(&self, len: usize) -> &[u8] {
        match self {
            RxBuffer::Whole(buf) => &buf[..len.min(buf.len())],
            RxBuffer::Paged { page, offset } => {
                let end = (*offset + len).min(page.len());
                &page[*offset..end]
            }
        }
    }
}

/// RX slot state.
#[derive(Debug, Default)]
pub struct RxBufferInfo {
    /// Posted buffer.
    pub(crate) buffer: Option<RxBuffer>,
    /// Mapping of the posted buffer.
    pub(crate) dma: Option<DmaHandle>,
}

impl BufferSlot for RxBufferInfo {
    fn release<D: DmaMapper + ?Sized>(&mut self, dma: &D) {
        if let Some(handle) = self.dma.take() {
            dma.unmap(handle);
        }
        self.buffer = None;
    }

    fn is_owned(&self) -> bool {
        self.dma.is_some() || self.buffer.is_some()
    }
}
