//! Queue vectors and ring-to-vector mapping.
//!
//! Vectors and rings live in adapter-owned arenas. A vector names its rings
//! by arena index and a ring names its vector the same way.
//!
//! # Vector assignment
//! ```text
//! 82575   MSIXBM(v) = RX_QUEUE0 << rxq | TX_QUEUE0 << txq     eims = bitmap
//! 82576   IVAR(q & 7) byte 0/1 (q < 8) or 2/3 (q >= 8)         eims = 1 << v
//! 82580   IVAR(q >> 1) byte 0/1 (even q) or 2/3 (odd q)        eims = 1 << v
//! ```
//!
//! # Reference
//! Intel 82576 Datasheet, Section 7.3 (Interrupts)

use alloc::vec::Vec;

use log::debug;

use crate::config::ItrSetting;
use crate::error::{IgbError, Result};
use crate::hw::{regs, Generation, Hw, RegisterAccess};
use crate::ring::{RxRing, TxRing};

/// EITR value every adaptive vector starts from (~6000 ints/s).
pub const IGB_START_ITR: u32 = 648;

// ═══════════════════════════════════════════════════════════════════════════
// QUEUE VECTOR
// ═══════════════════════════════════════════════════════════════════════════

/// Latency class of recent traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LatencyRange {
    /// Small packets, few of them.
    Lowest,
    /// Mixed traffic.
    #[default]
    Low,
    /// Large packets or sustained streams.
    Bulk,
}

/// One interrupt vector with at most one RX and one TX ring.
#[derive(Debug, Clone)]
pub struct QueueVector {
    /// Arena index.
    pub(crate) v_idx: usize,
    /// RX ring served.
    pub(crate) rx_ring: Option<usize>,
    /// TX ring served.
    pub(crate) tx_ring: Option<usize>,
    /// Computed EITR interval.
    pub(crate) itr_val: u32,
    /// `itr_val` has not been written to hardware yet.
    pub(crate) set_itr: bool,
    /// EITR register of this vector.
    pub(crate) itr_register: u32,
    /// Bits this vector contributes to EIMS.
    pub(crate) eims_value: u32,
    /// RX latency class.
    pub(crate) rx_itr: LatencyRange,
    /// TX latency class.
    pub(crate) tx_itr: LatencyRange,
}

impl QueueVector {
    /// Empty vector.
    pub fn new(v_idx: usize) -> Self {
        Self {
            v_idx,
            rx_ring: None,
            tx_ring: None,
            itr_val: 0,
            set_itr: false,
            itr_register: regs::EITR0,
            eims_value: 0,
            rx_itr: LatencyRange::Low,
            tx_itr: LatencyRange::Low,
        }
    }

    /// Arena index.
    #[inline]
    pub fn index(&self) -> usize {
        self.v_idx
    }

    /// RX ring served.
    #[inline]
    pub fn rx_ring(&self) -> Option<usize> {
        self.rx_ring
    }

    /// TX ring served.
    #[inline]
    pub fn tx_ring(&self) -> Option<usize> {
        self.tx_ring
    }

    /// EIMS bits of this vector.
    #[inline]
    pub fn eims_value(&self) -> u32 {
        self.eims_value
    }

    /// Pending or current throttle value.
    #[inline]
    pub fn itr_val(&self) -> u32 {
        self.itr_val
    }
}

/// Allocate `n` empty vectors.
pub fn alloc_q_vectors(n: usize) -> Result<Vec<QueueVector>> {
    let mut vectors = Vec::new();
    vectors
        .try_reserve_exact(n)
        .map_err(|_| IgbError::OutOfMemory)?;
    vectors.extend((0..n).map(QueueVector::new));
    Ok(vectors)
}

// ═══════════════════════════════════════════════════════════════════════════
// RING MAPPING
// ═══════════════════════════════════════════════════════════════════════════

fn start_itr(itr: ItrSetting) -> u32 {
    match itr {
        ItrSetting::Fixed(v) => v,
        ItrSetting::Off => 0,
        _ => IGB_START_ITR,
    }
}

fn map_rx(vectors: &mut [QueueVector], rx: &mut [RxRing], ring: usize, v: usize, itr: ItrSetting) {
    vectors[v].rx_ring = Some(ring);
    vectors[v].itr_val = start_itr(itr);
    rx[ring].ring.q_vector = Some(v);
}

fn map_tx(vectors: &mut [QueueVector], tx: &mut [TxRing], ring: usize, v: usize, itr: ItrSetting) {
    vectors[v].tx_ring = Some(ring);
    vectors[v].itr_val = start_itr(itr);
    tx[ring].ring.q_vector = Some(v);
}

/// Attach rings to vectors.
///
/// With a vector for every ring, RX rings take the first vectors and TX
/// rings the rest. Otherwise TX ring `i` shares vector `i` with RX ring `i`.
pub fn map_ring_to_vector(
    vectors: &mut [QueueVector],
    rx: &mut [RxRing],
    tx: &mut [TxRing],
    itr: ItrSetting,
) -> Result<()> {
    let nv = vectors.len();
    if nv < rx.len() || nv < tx.len() {
        return Err(IgbError::InsufficientVectors {
            vectors: nv,
            rings: rx.len().max(tx.len()),
        });
    }

    for v in vectors.iter_mut() {
        v.rx_ring = None;
        v.tx_ring = None;
    }

    let mut v_idx = 0;
    if nv >= rx.len() + tx.len() {
        for i in 0..rx.len() {
            map_rx(vectors, rx, i, v_idx, itr);
            v_idx += 1;
        }
        for i in 0..tx.len() {
            map_tx(vectors, tx, i, v_idx, itr);
            v_idx += 1;
        }
    } else {
        let mut i = 0;
        while i < rx.len() {
            if i < tx.len() {
                map_tx(vectors, tx, i, v_idx, itr);
            }
            map_rx(vectors, rx, i, v_idx, itr);
            v_idx += 1;
            i += 1;
        }
        while i < tx.len() {
            map_tx(vectors, tx, i, v_idx, itr);
            v_idx += 1;
            i += 1;
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// VECTOR ASSIGNMENT
// ═══════════════════════════════════════════════════════════════════════════

/// Replace byte `slot` of an IVAR word with `vector | VALID`.
#[inline]
fn ivar_set(ivar: u32, slot: u32, msix_vector: u32) -> u32 {
    let shift = slot * 8;
    (ivar & !(0xFF << shift)) | ((msix_vector | regs::IVAR_VALID) << shift)
}

/// Route a vector's rings (by register index) to MSI-X vector `msix_vector`.
///
/// Returns the vector's EIMS bits. Marks the vector's throttle for writing
/// on the next interrupt.
pub fn assign_vector<R: RegisterAccess>(
    hw: &Hw<R>,
    q_vector: &mut QueueVector,
    rx_queue: Option<u16>,
    tx_queue: Option<u16>,
    msix_vector: u32,
    msix: bool,
) -> u32 {
    let eims = match hw.generation() {
        Generation::I82575 => {
            let mut msixbm = 0;
            if let Some(q) = rx_queue {
                msixbm |= regs::EICR_RX_QUEUE0 << q;
            }
            if let Some(q) = tx_queue {
                msixbm |= regs::EICR_TX_QUEUE0 << q;
            }
            if !msix && msix_vector == 0 {
                msixbm |= regs::EIMS_OTHER;
            }
            hw.write_array(regs::MSIXBM0, msix_vector, msixbm);
            msixbm
        }
        Generation::I82576 => {
            // Queues 0-7 use the low byte pair, 8-15 the high pair.
            if let Some(q) = rx_queue {
                let slot = if q < 8 { 0 } else { 2 };
                hw.rmw_array(regs::IVAR0, (q & 0x7) as u32, |v| {
                    ivar_set(v, slot, msix_vector)
                });
            }
            if let Some(q) = tx_queue {
                let slot = if q < 8 { 1 } else { 3 };
                hw.rmw_array(regs::IVAR0, (q & 0x7) as u32, |v| {
                    ivar_set(v, slot, msix_vector)
                });
            }
            1 << msix_vector
        }
        Generation::I82580 => {
            // Two queues per register, split by parity.
            if let Some(q) = rx_queue {
                let slot = if q & 1 != 0 { 2 } else { 0 };
                hw.rmw_array(regs::IVAR0, (q >> 1) as u32, |v| {
                    ivar_set(v, slot, msix_vector)
                });
            }
            if let Some(q) = tx_queue {
                let slot = if q & 1 != 0 { 3 } else { 1 };
                hw.rmw_array(regs::IVAR0, (q >> 1) as u32, |v| {
                    ivar_set(v, slot, msix_vector)
                });
            }
            1 << msix_vector
        }
    };
    q_vector.eims_value = eims;
    q_vector.itr_register = regs::EITR0 + (msix_vector << 2);
    q_vector.set_itr = true;
    eims
}

/// Interrupt masks produced by MSI-X configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsixMasks {
    /// Union of every vector's EIMS bits plus the other-cause bit.
    pub eims_enable_mask: u32,
    /// Other-cause bit.
    pub eims_other: u32,
}

/// Program the other-cause vector and every queue vector.
///
/// MSI-X vector 0 serves other causes; queue vectors follow from 1.
pub fn configure_msix<R: RegisterAccess>(
    hw: &Hw<R>,
    vectors: &mut [QueueVector],
    rx: &[RxRing],
    tx: &[TxRing],
) -> MsixMasks {
    let mut vector: u32 = 0;
    let eims_other = match hw.generation() {
        Generation::I82575 => {
            hw.rmw(regs::CTRL_EXT, |v| {
                v | regs::CTRL_EXT_PBA_CLR | regs::CTRL_EXT_EIAME | regs::CTRL_EXT_IRCA
            });
            hw.write_array(regs::MSIXBM0, vector, regs::EIMS_OTHER);
            vector += 1;
            regs::EIMS_OTHER
        }
        Generation::I82576 | Generation::I82580 => {
            hw.write(
                regs::GPIE,
                regs::GPIE_MSIX_MODE | regs::GPIE_PBA | regs::GPIE_EIAME | regs::GPIE_NSICR,
            );
            let other = 1 << vector;
            hw.write(regs::IVAR_MISC, (vector | regs::IVAR_VALID) << 8);
            vector += 1;
            other
        }
    };

    let mut mask = eims_other;
    for q in vectors.iter_mut() {
        let rxq = q.rx_ring.map(|r| rx[r].ring.reg_idx());
        let txq = q.tx_ring.map(|t| tx[t].ring.reg_idx());
        mask |= assign_vector(hw, q, rxq, txq, vector, true);
        vector += 1;
    }
    hw.flush();

    debug!(
        "igb: MSI-X configured, {} queue vectors, eims {:#010x}",
        vectors.len(),
        mask
    );
    MsixMasks {
        eims_enable_mask: mask,
        eims_other,
    }
}
