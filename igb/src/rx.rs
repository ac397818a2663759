//! Receive path.
//!
//! `clean_rx_irq` drains completed descriptors under a budget, stitches
//! multi-descriptor frames together, classifies the hardware checksum
//! result and hands each frame to an [`RxSink`]. Freed descriptors are
//! refilled in batches of [`RX_BUFFER_WRITE`]; whatever is left unused is
//! topped up once the pass ends.
//!
//! # Reference
//! Intel 82576 Datasheet, Section 7.1 (Receive Functionality)

use alloc::vec::Vec;

use log::trace;

use crate::dma::{DmaDirection, DmaMapper};
use crate::hw::{barriers, regs, Hw, RegisterAccess};
use crate::ring::desc::*;
use crate::ring::{RingFlags, RxBuffer, RxBufferMode, RxRing, HALF_PAGE, PAGE_SIZE};

// ═══════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════

/// Freed descriptors that trigger a mid-poll refill.
pub const RX_BUFFER_WRITE: u16 = 16;

/// Frame length (without FCS) hit by the SCTP checksum erratum.
pub const SCTP_ERRATUM_LEN: usize = 60;

// ═══════════════════════════════════════════════════════════════════════════
// PACKETS
// ═══════════════════════════════════════════════════════════════════════════

/// Hardware checksum verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumResult {
    /// Hardware did not check; software must.
    None,
    /// Hardware verified the L4 checksum.
    Unnecessary,
    /// Hardware flagged an error; software must verify.
    Indeterminate,
}

/// A received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxPacket {
    /// Frame bytes without FCS.
    pub data: Vec<u8>,
    /// Tag stripped by hardware.
    pub vlan: Option<u16>,
    /// Checksum verdict.
    pub checksum: ChecksumResult,
    /// Software queue index the frame arrived on.
    pub queue: u16,
}

/// Consumer of received frames.
pub trait RxSink {
    /// Take one frame.
    fn receive(&mut self, packet: RxPacket);
}

impl<F: FnMut(RxPacket)> RxSink for F {
    fn receive(&mut self, packet: RxPacket) {
        self(packet)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CHECKSUM
// ═══════════════════════════════════════════════════════════════════════════

/// Classify the hardware checksum status of a completed frame.
pub fn rx_checksum(rx: &mut RxRing, status_error: u32, len: usize) -> ChecksumResult {
    if !rx.ring.flags.contains(RingFlags::RX_CSUM) || status_error & RXD_STAT_IXSM != 0 {
        return ChecksumResult::None;
    }

    if status_error & (RXDEXT_STATERR_TCPE | RXDEXT_STATERR_IPE) != 0 {
        // L4E is set on good 60-byte SCTP frames.
        if len == SCTP_ERRATUM_LEN && rx.ring.flags.contains(RingFlags::RX_SCTP_CSUM) {
            rx.stats.sctp_false_positive += 1;
        } else {
            rx.stats.csum_err += 1;
        }
        return ChecksumResult::Indeterminate;
    }

    if status_error & (RXD_STAT_TCPCS | RXD_STAT_UDPCS) != 0 {
        ChecksumResult::Unnecessary
    } else {
        ChecksumResult::None
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// REFILL
// ═══════════════════════════════════════════════════════════════════════════

/// Zeroed buffer of `len` bytes, or `None` when the heap is exhausted.
fn try_alloc_buffer(len: usize) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).ok()?;
    buf.resize(len, 0);
    Some(buf)
}

/// Post up to `cleaned_count` fresh buffers from `next_to_use`.
///
/// Allocation or mapping failure is counted and ends the refill early; the
/// ring keeps working with fewer buffers.
pub fn alloc_rx_buffers<R: RegisterAccess, D: DmaMapper + ?Sized>(
    hw: &Hw<R>,
    rx: &mut RxRing,
    dma: &D,
    cleaned_count: u16,
) {
    if !rx.ring.is_allocated() {
        return;
    }
    let mode = rx.buffer_mode;
    let len = mode.buffer_len() as usize;
    let start = rx.ring.next_to_use;
    let mut i = start;

    for _ in 0..cleaned_count {
        let info = &mut rx.ring.buffer_info[i as usize];

        if info.buffer.is_none() {
            let buffer = match mode {
                RxBufferMode::Whole(_) => try_alloc_buffer(len).map(RxBuffer::Whole),
                RxBufferMode::Paged => try_alloc_buffer(PAGE_SIZE).map(|page| RxBuffer::Paged {
                    page: page.into_boxed_slice(),
                    offset: 0,
                }),
            };
            match buffer {
                Some(b) => info.buffer = Some(b),
                None => {
                    rx.stats.alloc_failed += 1;
                    break;
                }
            }
        }

        if info.dma.is_none() {
            let mapped = match info.buffer.as_ref() {
                Some(b) => dma.map(b.dma_slice(len), DmaDirection::FromDevice),
                None => break,
            };
            match mapped {
                Ok(handle) => info.dma = Some(handle),
                Err(_) => {
                    rx.stats.alloc_failed += 1;
                    break;
                }
            }
        }

        let pkt_addr = info.dma.as_ref().map(|h| h.bus).unwrap_or(0);
        rx.ring.write_desc(
            i,
            RxReadDesc {
                pkt_addr,
                hdr_addr: 0,
            }
            .into(),
        );
        i = rx.ring.next_index(i);
    }

    if i != start {
        rx.ring.next_to_use = i;
        let tail = rx.ring.prev_index(i);
        // Descriptors must be visible before the tail moves.
        barriers::wmb();
        hw.write(regs::rdt(rx.ring.reg_idx), tail as u32);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// COMPLETION
// ═══════════════════════════════════════════════════════════════════════════

/// Drain up to `budget` completed descriptors.
///
/// Returns the number of descriptors processed.
pub fn clean_rx_irq<R, D, S>(hw: &Hw<R>, rx: &mut RxRing, dma: &D, sink: &mut S, budget: usize) -> usize
where
    R: RegisterAccess,
    D: DmaMapper + ?Sized,
    S: RxSink + ?Sized,
{
    if !rx.ring.is_allocated() || rx.ring.flags.contains(RingFlags::QUIESCED) {
        return 0;
    }

    let mut i = rx.ring.next_to_clean;
    let mut work_done = 0usize;
    let mut cleaned_count: u16 = 0;
    let mut total_bytes: u32 = 0;
    let mut total_packets: u32 = 0;

    loop {
        let wb = RxWriteback::from(rx.ring.read_desc(i));
        if wb.status_error & RXD_STAT_DD == 0 || work_done >= budget {
            break;
        }
        work_done += 1;
        // Descriptor fields are read only after DD.
        barriers::rmb();

        let length = wb.length as usize;
        let info = &mut rx.ring.buffer_info[i as usize];
        if let Some(handle) = info.dma.take() {
            dma.unmap(handle);
        }
        let fragment = match info.buffer.take() {
            Some(RxBuffer::Whole(mut buf)) => {
                buf.truncate(length);
                Some(buf)
            }
            Some(RxBuffer::Paged { page, offset }) => {
                let end = (offset + length).min(offset + HALF_PAGE);
                let bytes = page[offset..end].to_vec();
                // The other half is posted next time round.
                info.buffer = Some(RxBuffer::Paged {
                    page,
                    offset: offset ^ HALF_PAGE,
                });
                Some(bytes)
            }
            None => None,
        };

        let current = i;
        i = rx.ring.next_index(i);
        cleaned_count += 1;

        if let Some(bytes) = fragment {
            match rx.partial.as_mut() {
                Some(p) => p.data.extend_from_slice(&bytes),
                None => {
                    rx.partial = Some(RxPacket {
                        data: bytes,
                        vlan: None,
                        checksum: ChecksumResult::None,
                        queue: rx.ring.queue_index,
                    })
                }
            }
        }

        if wb.status_error & RXD_STAT_EOP != 0 {
            if let Some(mut packet) = rx.partial.take() {
                if wb.status_error & RXDEXT_ERR_FRAME_ERR_MASK != 0 {
                    rx.stats.frame_errors += 1;
                } else {
                    total_bytes += packet.data.len() as u32;
                    total_packets += 1;
                    packet.checksum = rx_checksum(rx, wb.status_error, packet.data.len());
                    if wb.status_error & RXD_STAT_VP != 0 {
                        packet.vlan = Some(wb.vlan);
                    }
                    sink.receive(packet);
                }
            }
        }

        rx.ring.update_desc(current, clear_rx_wb_status);

        if cleaned_count >= RX_BUFFER_WRITE {
            rx.ring.next_to_clean = i;
            alloc_rx_buffers(hw, rx, dma, cleaned_count);
            cleaned_count = 0;
        }
    }

    rx.ring.next_to_clean = i;
    let unused = rx.ring.unused();
    if unused > 0 {
        alloc_rx_buffers(hw, rx, dma, unused);
    }

    rx.ring.itr.add(total_bytes, total_packets);
    rx.stats.ring.bytes += total_bytes as u64;
    rx.stats.ring.packets += total_packets as u64;
    trace!(
        "igb: rx queue {} processed {} descriptors, {} packets",
        rx.ring.queue_index,
        work_done,
        total_packets
    );
    work_done
}
