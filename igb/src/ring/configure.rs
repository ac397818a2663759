//! Ring register programming.
//!
//! Every (re)configuration first clears the queue-enable bit and waits
//! for the hardware to acknowledge, then programs base, length, head,
//! tail and thresholds, and only then re-enables the queue.
//!
//! # Reference
//! Intel 82576 Datasheet, Sections 8.10 (RX queue) and 8.12 (TX queue)

use log::{debug, warn};

use super::{RingFlags, RxRing, TxRing};
use crate::error::{IgbError, Result};
use crate::hw::{regs, Generation, Hw, RegisterAccess};

// ═══════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════

/// TX prefetch threshold.
pub const TX_PTHRESH: u32 = 8;
/// TX host threshold.
pub const TX_HTHRESH: u32 = 1;
/// RX host threshold.
pub const RX_HTHRESH: u32 = 8;
/// RX write-back threshold.
pub const RX_WTHRESH: u32 = 1;

/// Reads of xXDCTL before giving up on a queue disable.
pub const QUEUE_DISABLE_POLL_LIMIT: u32 = 1_000;

/// TX write-back threshold: 82576 under MSI-X writes back every descriptor.
#[inline]
pub fn tx_wthresh(generation: Generation, msix: bool) -> u32 {
    if generation == Generation::I82576 && msix {
        1
    } else {
        16
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// QUEUE ENABLE
// ═══════════════════════════════════════════════════════════════════════════

/// Clear the enable bit in a queue control register and wait for it to read
/// back clear.
pub fn disable_queue<R: RegisterAccess>(hw: &Hw<R>, ctl: u32, reg_idx: u16) -> Result<()> {
    let value = hw.read(ctl);
    hw.write(ctl, value & !regs::XDCTL_QUEUE_ENABLE);
    hw.flush();

    for _ in 0..QUEUE_DISABLE_POLL_LIMIT {
        if hw.read(ctl) & regs::XDCTL_QUEUE_ENABLE == 0 {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    Err(IgbError::QueueDisableTimeout { reg_idx })
}

// ═══════════════════════════════════════════════════════════════════════════
// TX
// ═══════════════════════════════════════════════════════════════════════════

/// Program one TX queue and enable it.
pub fn configure_tx_ring<R: RegisterAccess>(hw: &Hw<R>, tx: &mut TxRing, msix: bool) {
    let ring = &mut tx.ring;
    let reg_idx = ring.reg_idx;
    let Some(bus) = ring.desc_bus() else {
        debug!("igb: tx queue {} not allocated, skipping", ring.queue_index);
        return;
    };

    // PHASE 1: quiesce
    hw.write(regs::txdctl(reg_idx), 0);
    hw.flush();
    if let Err(e) = disable_queue(hw, regs::txdctl(reg_idx), reg_idx) {
        warn!("igb: {} (continuing)", e);
    }

    // PHASE 2: base, length, head/tail
    hw.write(regs::tdlen(reg_idx), ring.len_bytes());
    hw.write(regs::tdbal(reg_idx), bus as u32);
    hw.write(regs::tdbah(reg_idx), (bus >> 32) as u32);
    hw.write(regs::tdh(reg_idx), 0);
    hw.write(regs::tdt(reg_idx), 0);
    ring.next_to_use = 0;
    ring.next_to_clean = 0;

    // PHASE 3: thresholds and enable
    let txdctl = TX_PTHRESH
        | (TX_HTHRESH << 8)
        | (tx_wthresh(hw.generation(), msix) << 16)
        | regs::XDCTL_QUEUE_ENABLE;
    hw.write(regs::txdctl(reg_idx), txdctl);
    hw.flush();

    tx.stopped = false;
    tx.detect_tx_hung = false;
    tx.hung = false;
    debug!(
        "igb: tx queue {} (reg {}) configured, {} descriptors",
        ring.queue_index,
        reg_idx,
        ring.count()
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// RX
// ═══════════════════════════════════════════════════════════════════════════

/// Program one RX queue and enable it.
///
/// `vfs` enables drop-when-empty so a stalled PF queue cannot back up VF
/// traffic.
pub fn configure_rx_ring<R: RegisterAccess>(hw: &Hw<R>, rx: &mut RxRing, vfs: u16) {
    let buffer_len = rx.buffer_mode.buffer_len() as u32;
    let ring = &mut rx.ring;
    let reg_idx = ring.reg_idx;
    let Some(bus) = ring.desc_bus() else {
        debug!("igb: rx queue {} not allocated, skipping", ring.queue_index);
        return;
    };

    // PHASE 1: quiesce
    if let Err(e) = disable_queue(hw, regs::rxdctl(reg_idx), reg_idx) {
        warn!("igb: {} (continuing)", e);
    }

    // PHASE 2: base, length, head/tail
    hw.write(regs::rdbal(reg_idx), bus as u32);
    hw.write(regs::rdbah(reg_idx), (bus >> 32) as u32);
    hw.write(regs::rdlen(reg_idx), ring.len_bytes());
    hw.write(regs::rdh(reg_idx), 0);
    hw.write(regs::rdt(reg_idx), 0);
    ring.next_to_use = 0;
    ring.next_to_clean = 0;
    ring.flags.remove(RingFlags::QUIESCED);

    // PHASE 3: buffer size
    hw.write(regs::srrctl(reg_idx), srrctl_value(buffer_len, vfs));

    // PHASE 4: thresholds and enable
    let mut rxdctl = hw.read(regs::rxdctl(reg_idx)) & 0xFFF0_0000;
    rxdctl |= hw.generation().rx_pthresh();
    rxdctl |= RX_HTHRESH << 8;
    rxdctl |= RX_WTHRESH << 16;
    hw.write(regs::rxdctl(reg_idx), rxdctl | regs::XDCTL_QUEUE_ENABLE);
    hw.flush();

    debug!(
        "igb: rx queue {} (reg {}) configured, {} descriptors of {} bytes",
        ring.queue_index,
        reg_idx,
        ring.count(),
        buffer_len
    );
}

/// SRRCTL for one-buffer advanced descriptors.
pub fn srrctl_value(buffer_len: u32, vfs: u16) -> u32 {
    let mut srrctl = ((buffer_len + 1023) & !1023) >> regs::SRRCTL_BSIZEPKT_SHIFT;
    srrctl |= regs::SRRCTL_DESCTYPE_ADV_ONEBUF;
    if vfs > 0 {
        srrctl |= regs::SRRCTL_DROP_EN;
    }
    srrctl
}

// ═══════════════════════════════════════════════════════════════════════════
// GLOBAL RX/TX CONTROL
// ═══════════════════════════════════════════════════════════════════════════

/// Enable the receiver with broadcast accept and CRC strip.
pub fn setup_rctl<R: RegisterAccess>(hw: &Hw<R>, max_frame: u32) {
    hw.rmw(regs::RCTL, |mut rctl| {
        rctl |= regs::RCTL_EN | regs::RCTL_BAM | regs::RCTL_SECRC;
        if max_frame > super::MAXIMUM_ETHERNET_VLAN_SIZE as u32 {
            rctl |= regs::RCTL_LPE;
        } else {
            rctl &= !regs::RCTL_LPE;
        }
        rctl
    });
}

/// Enable the transmitter.
pub fn setup_tctl<R: RegisterAccess>(hw: &Hw<R>) {
    hw.rmw(regs::TCTL, |tctl| tctl | regs::TCTL_EN | regs::TCTL_PSP);
}

/// Program the long-packet limit.
///
/// With VFs the PF owns pool `vfs` and its limit lives in that pool's VMOLR.
pub fn set_rlpml<R: RegisterAccess>(hw: &Hw<R>, max_frame: u32, vfs: u16) {
    if vfs > 0 {
        set_vmolr_rlpml(hw, vfs as u32, max_frame);
        hw.write(regs::RLPML, max_frame + 4);
    } else {
        hw.write(regs::RLPML, max_frame);
    }
}

/// Set the long-packet limit of one pool.
pub fn set_vmolr_rlpml<R: RegisterAccess>(hw: &Hw<R>, pool: u32, max_frame: u32) {
    hw.rmw(regs::vmolr(pool), |mut vmolr| {
        vmolr &= !regs::VMOLR_RLPML_MASK;
        vmolr |= (max_frame & regs::VMOLR_RLPML_MASK) | regs::VMOLR_LPE;
        vmolr
    });
}

// ═══════════════════════════════════════════════════════════════════════════
// REGISTER INDEX CACHING
// ═══════════════════════════════════════════════════════════════════════════

/// Queue layout inputs for register index caching.
#[derive(Debug, Clone, Copy)]
pub struct QueueLayout {
    /// Chip generation.
    pub generation: Generation,
    /// VMDq pools.
    pub vmdq_pools: u16,
    /// RSS queues.
    pub rss_queues: u16,
    /// VFs; their pools sit below the PF's.
    pub vfs: u16,
}

impl QueueLayout {
    /// Hardware register index of software queue `i`.
    pub fn reg_idx(&self, i: u16) -> u16 {
        if self.generation == Generation::I82576 && self.vmdq_pools > 0 && self.rss_queues > 1 {
            self.vfs + ((i & 1) << 3) + (i >> 1)
        } else {
            i
        }
    }
}

/// Assign register indices and feature flags to every ring.
pub fn cache_ring_register(layout: &QueueLayout, rx: &mut [RxRing], tx: &mut [TxRing]) {
    for r in rx.iter_mut() {
        r.ring.reg_idx = layout.reg_idx(r.ring.queue_index);
        r.ring.flags.insert(RingFlags::RX_CSUM);
        if layout.generation >= Generation::I82576 {
            r.ring.flags.insert(RingFlags::RX_SCTP_CSUM);
        }
    }
    for t in tx.iter_mut() {
        t.ring.reg_idx = layout.reg_idx(t.ring.queue_index);
        if layout.generation == Generation::I82575 {
            t.ring.flags.insert(RingFlags::TX_CTX_IDX);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::IdentityDma;
    use crate::ring::RxBufferMode;
    use crate::testutil::MockRegisters;

    fn allocated_tx(dma: &IdentityDma) -> TxRing {
        let mut tx = TxRing::new(0, 256);
        tx.ring.allocate(dma).unwrap();
        tx
    }

    #[test]
    fn test_tx_configure_disables_before_enable() {
        let dma = IdentityDma::new();
        let hw = Hw::new(MockRegisters::new(), Generation::I82576);
        hw.write(regs::txdctl(0), regs::XDCTL_QUEUE_ENABLE);
        hw.regs().clear_log();
        let mut tx = allocated_tx(&dma);
        tx.ring.next_to_use = 17;

        configure_tx_ring(&hw, &mut tx, true);

        let writes = hw.regs().writes_to(regs::txdctl(0));
        assert_eq!(writes.first(), Some(&0));
        let last = *writes.last().unwrap();
        assert_ne!(last & regs::XDCTL_QUEUE_ENABLE, 0);
        assert_eq!((last >> 16) & 0x3F, 1);
        assert_eq!(hw.read(regs::tdlen(0)), 256 * 16);
        assert_eq!(hw.read(regs::tdt(0)), 0);
        assert_eq!(tx.ring.next_to_use(), 0);
        tx.ring.free(&dma);
    }

    #[test]
    fn test_tx_wthresh_without_msix() {
        assert_eq!(tx_wthresh(Generation::I82576, false), 16);
        assert_eq!(tx_wthresh(Generation::I82580, true), 16);
    }

    #[test]
    fn test_stuck_queue_times_out_and_configure_continues() {
        let dma = IdentityDma::new();
        let regs_mock = MockRegisters::new();
        regs_mock.stick(regs::txdctl(0), regs::XDCTL_QUEUE_ENABLE);
        let hw = Hw::new(regs_mock, Generation::I82576);
        assert_eq!(
            disable_queue(&hw, regs::txdctl(0), 0),
            Err(IgbError::QueueDisableTimeout { reg_idx: 0 })
        );
        let mut tx = allocated_tx(&dma);
        configure_tx_ring(&hw, &mut tx, false);
        assert_eq!(hw.read(regs::tdlen(0)), 256 * 16);
        tx.ring.free(&dma);
    }

    #[test]
    fn test_rx_configure_programs_srrctl_and_thresholds() {
        let dma = IdentityDma::new();
        let hw = Hw::new(MockRegisters::new(), Generation::I82580);
        let mut rx = RxRing::new(5, 128);
        rx.ring.reg_idx = 5;
        rx.buffer_mode = RxBufferMode::Whole(1522);
        rx.ring.allocate(&dma).unwrap();

        configure_rx_ring(&hw, &mut rx, 2);

        let srrctl = hw.read(regs::srrctl(5));
        assert_eq!(srrctl & 0x7F, 2);
        assert_ne!(srrctl & regs::SRRCTL_DROP_EN, 0);
        let rxdctl = hw.read(regs::rxdctl(5));
        assert_eq!(rxdctl & 0x1F, 8);
        assert_ne!(rxdctl & regs::XDCTL_QUEUE_ENABLE, 0);
        rx.ring.free(&dma);
    }

    #[test]
    fn test_reg_idx_interleaves_with_vmdq_on_82576() {
        let layout = QueueLayout {
            generation: Generation::I82576,
            vmdq_pools: 1,
            rss_queues: 2,
            vfs: 2,
        };
        assert_eq!(layout.reg_idx(0), 2);
        assert_eq!(layout.reg_idx(1), 10);
        assert_eq!(layout.reg_idx(2), 3);
        assert_eq!(layout.reg_idx(3), 11);
    }

    #[test]
    fn test_cache_ring_register_sets_flags() {
        let layout = QueueLayout {
            generation: Generation::I82575,
            vmdq_pools: 0,
            rss_queues: 4,
            vfs: 0,
        };
        let mut rx = [RxRing::new(0, 256), RxRing::new(1, 256)];
        let mut tx = [TxRing::new(0, 256)];
        cache_ring_register(&layout, &mut rx, &mut tx);
        assert_eq!(rx[1].ring.reg_idx(), 1);
        assert!(!rx[0].ring.flags.contains(RingFlags::RX_SCTP_CSUM));
        assert!(tx[0].ring.flags.contains(RingFlags::TX_CTX_IDX));
    }

    #[test]
    fn test_rlpml_goes_to_pf_pool_with_vfs() {
        let hw = Hw::new(MockRegisters::new(), Generation::I82576);
        set_rlpml(&hw, 9018, 3);
        assert_eq!(hw.read(regs::vmolr(3)) & regs::VMOLR_RLPML_MASK, 9018);
        assert_eq!(hw.read(regs::RLPML), 9022);
    }
}
