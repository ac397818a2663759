//! Interrupt capability, vector scheme and interrupt causes.
//!
//! The platform owns the PCI interrupt machinery and is reached through
//! [`InterruptPlatform`]. The driver asks for MSI-X first and degrades to
//! MSI and then the legacy line; every degradation collapses the adapter to
//! one queue pair on one vector.
//!
//! # Fallback
//! ```text
//! MsiX(num_q_vectors + 1) ──fail──► Msi ──fail──► Legacy ──fail──► InterruptSetup
//!                                    │              │
//!                                    └──────────────┴── vfs = vmdq = 0, rss = 1, 1 vector
//! ```
//!
//! Interrupt handlers never touch ring state. They decode causes, mark the
//! vector's poll as pending in a [`VectorSignal`] and return.
//!
//! # Reference
//! Intel 82576 Datasheet, Section 7.3 (Interrupts)

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use log::{debug, error, info};

use crate::config::{IgbConfig, InterruptMode};
use crate::error::{IgbError, Result};
use crate::hw::{regs, Generation, Hw, RegisterAccess};
use crate::ring::configure::{cache_ring_register, QueueLayout};
use crate::ring::{RxBufferMode, RxRing, TxRing};
use crate::vector::{alloc_q_vectors, map_ring_to_vector, MsixMasks, QueueVector};

// ═══════════════════════════════════════════════════════════════════════════
// PLATFORM CAPABILITY
// ═══════════════════════════════════════════════════════════════════════════

/// PCI interrupt services supplied by the platform.
pub trait InterruptPlatform {
    /// Enable `count` MSI-X vectors. `false` if the platform cannot.
    fn enable_msix(&mut self, count: usize) -> bool;

    /// Release MSI-X.
    fn disable_msix(&mut self);

    /// Enable single-message MSI.
    fn enable_msi(&mut self) -> bool;

    /// Release MSI.
    fn disable_msi(&mut self);

    /// Attach to the shared legacy line.
    fn request_legacy(&mut self) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════════
// QUEUE COUNTS
// ═══════════════════════════════════════════════════════════════════════════

/// Queue and vector counts after capability negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCounts {
    /// Mechanism actually in use.
    pub mode: InterruptMode,
    /// RX rings.
    pub num_rx_queues: u16,
    /// TX rings.
    pub num_tx_queues: u16,
    /// Queue vectors (excluding the other-cause vector).
    pub num_q_vectors: usize,
    /// Virtual functions still enabled.
    pub vfs: u16,
    /// VMDq pools still enabled.
    pub vmdq_pools: u16,
    /// RSS queues.
    pub rss_queues: u16,
    /// TX/RX rings share a vector.
    pub queue_pairs: bool,
}

impl QueueCounts {
    /// Counts requested by the configuration, before negotiation.
    fn requested(cfg: &IgbConfig) -> Self {
        let mut num_rx_queues = cfg.rss_queues;
        if cfg.vmdq_pools > 1 {
            num_rx_queues += cfg.vmdq_pools - 1;
        }
        let num_tx_queues = num_rx_queues;
        let mut num_q_vectors = num_rx_queues as usize;
        if !cfg.queue_pairs {
            num_q_vectors += num_tx_queues as usize;
        }
        Self {
            mode: cfg.int_mode,
            num_rx_queues,
            num_tx_queues,
            num_q_vectors,
            vfs: cfg.vfs_allocated_count,
            vmdq_pools: cfg.vmdq_pools,
            rss_queues: cfg.rss_queues,
            queue_pairs: cfg.queue_pairs,
        }
    }

    /// One queue pair on one vector.
    fn single(mode: InterruptMode) -> Self {
        Self {
            mode,
            num_rx_queues: 1,
            num_tx_queues: 1,
            num_q_vectors: 1,
            vfs: 0,
            vmdq_pools: 0,
            rss_queues: 1,
            queue_pairs: true,
        }
    }

    /// MSI-X is active.
    #[inline]
    pub fn is_msix(&self) -> bool {
        self.mode == InterruptMode::MsiX
    }

    /// Register index layout for these counts.
    pub fn layout(&self, generation: Generation) -> QueueLayout {
        QueueLayout {
            generation,
            vmdq_pools: self.vmdq_pools,
            rss_queues: self.rss_queues,
            vfs: self.vfs,
        }
    }
}

/// MSI, then the legacy line.
fn single_vector<P: InterruptPlatform + ?Sized>(platform: &mut P, try_msi: bool) -> Result<QueueCounts> {
    if try_msi {
        if platform.enable_msi() {
            return Ok(QueueCounts::single(InterruptMode::Msi));
        }
        info!("igb: Failed to initialize MSI interrupts. Falling back to legacy interrupts.");
    }
    if platform.request_legacy() {
        return Ok(QueueCounts::single(InterruptMode::Legacy));
    }
    error!("igb: Error getting interrupt");
    Err(IgbError::InterruptSetup)
}

/// Negotiate the interrupt mechanism and the queue counts it can serve.
pub fn set_interrupt_capability<P: InterruptPlatform + ?Sized>(
    platform: &mut P,
    cfg: &IgbConfig,
) -> Result<QueueCounts> {
    let counts = QueueCounts::requested(cfg);
    match cfg.int_mode {
        InterruptMode::MsiX => {
            // One extra vector for link and mailbox causes.
            if platform.enable_msix(counts.num_q_vectors + 1) {
                debug!(
                    "igb: MSI-X enabled, {} queue vectors, {} rx / {} tx queues",
                    counts.num_q_vectors, counts.num_rx_queues, counts.num_tx_queues
                );
                return Ok(counts);
            }
            info!("igb: Failed to initialize MSI-X interrupts. Falling back to MSI interrupts.");
            platform.disable_msix();
            single_vector(platform, true)
        }
        InterruptMode::Msi => single_vector(platform, true),
        InterruptMode::Legacy => single_vector(platform, false),
    }
}

/// Undo [`set_interrupt_capability`].
pub fn reset_interrupt_capability<P: InterruptPlatform + ?Sized>(platform: &mut P, mode: InterruptMode) {
    match mode {
        InterruptMode::MsiX => platform.disable_msix(),
        InterruptMode::Msi => platform.disable_msi(),
        InterruptMode::Legacy => {}
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// INTERRUPT SCHEME
// ═══════════════════════════════════════════════════════════════════════════

/// Vectors and unallocated rings, already mapped to each other.
pub struct InterruptScheme {
    /// Negotiated counts.
    pub counts: QueueCounts,
    /// Vector arena.
    pub vectors: Vec<QueueVector>,
    /// RX ring arena.
    pub rx: Vec<RxRing>,
    /// TX ring arena.
    pub tx: Vec<TxRing>,
}

/// Create the ring arenas; [`cache_ring_register`] sets flags and register indices.
pub fn alloc_queues(counts: &QueueCounts, cfg: &IgbConfig) -> Result<(Vec<RxRing>, Vec<TxRing>)> {
    let mut tx = Vec::new();
    tx.try_reserve_exact(counts.num_tx_queues as usize)
        .map_err(|_| IgbError::OutOfMemory)?;
    for i in 0..counts.num_tx_queues {
        tx.push(TxRing::new(i, cfg.tx_ring_count));
    }

    let mut rx = Vec::new();
    rx.try_reserve_exact(counts.num_rx_queues as usize)
        .map_err(|_| IgbError::OutOfMemory)?;
    for i in 0..counts.num_rx_queues {
        let mut ring = RxRing::new(i, cfg.rx_ring_count);
        ring.buffer_mode = RxBufferMode::for_max_frame(cfg.max_frame_size);
        rx.push(ring);
    }

    cache_ring_register(&counts.layout(cfg.generation), &mut rx, &mut tx);
    Ok((rx, tx))
}

fn build_scheme(counts: QueueCounts, cfg: &IgbConfig) -> Result<InterruptScheme> {
    let mut vectors = alloc_q_vectors(counts.num_q_vectors)?;
    let (mut rx, mut tx) = alloc_queues(&counts, cfg)?;
    map_ring_to_vector(&mut vectors, &mut rx, &mut tx, cfg.itr)?;
    Ok(InterruptScheme {
        counts,
        vectors,
        rx,
        tx,
    })
}

/// Negotiate interrupts, then allocate and map vectors and rings.
///
/// A mapping failure under MSI-X releases it and retries with one vector.
pub fn init_interrupt_scheme<P: InterruptPlatform + ?Sized>(
    platform: &mut P,
    cfg: &IgbConfig,
) -> Result<InterruptScheme> {
    let counts = set_interrupt_capability(platform, cfg)?;
    match build_scheme(counts, cfg) {
        Ok(scheme) => Ok(scheme),
        Err(IgbError::InsufficientVectors { vectors, rings }) if counts.is_msix() => {
            info!(
                "igb: Invalid q_vector to ring mapping ({} vectors, {} rings), falling back",
                vectors, rings
            );
            platform.disable_msix();
            let counts = single_vector(platform, true)?;
            build_scheme(counts, cfg).map_err(|e| {
                reset_interrupt_capability(platform, counts.mode);
                e
            })
        }
        Err(e) => {
            reset_interrupt_capability(platform, counts.mode);
            Err(e)
        }
    }
}

/// Route the single queue pair of MSI or legacy mode to interrupt 0.
pub fn configure_single_vector<R: RegisterAccess>(hw: &Hw<R>) {
    match hw.generation() {
        Generation::I82575 => hw.write_array(
            regs::MSIXBM0,
            0,
            regs::EICR_RX_QUEUE0 | regs::EICR_TX_QUEUE0 | regs::EIMS_OTHER,
        ),
        Generation::I82576 | Generation::I82580 => hw.write(regs::IVAR0, regs::IVAR_VALID),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOW LATENCY INTERRUPTS
// ═══════════════════════════════════════════════════════════════════════════

/// Low-latency interrupt filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LliConfig {
    /// TCP destination port (0 = off).
    pub port: u16,
    /// Packet size threshold (0 = off).
    pub size: u16,
    /// Interrupt on TCP PSH.
    pub push: bool,
}

impl From<&IgbConfig> for LliConfig {
    fn from(cfg: &IgbConfig) -> Self {
        Self {
            port: cfg.lli_port,
            size: cfg.lli_size,
            push: cfg.lli_push,
        }
    }
}

/// Program IMIR/IMIREXT filters 0 (port), 1 (push) and 2 (size).
///
/// Only MSI and MSI-X honor them.
pub fn configure_lli<R: RegisterAccess>(hw: &Hw<R>, lli: &LliConfig, mode: InterruptMode) {
    if mode == InterruptMode::Legacy {
        return;
    }

    if lli.port != 0 {
        // Port field is in network order.
        hw.write(regs::imir(0), lli.port.to_be() as u32 | regs::IMIR_PORT_IM_EN);
        hw.write(regs::imirext(0), regs::IMIREXT_SIZE_BP | regs::IMIREXT_CTRL_BP);
    }

    if lli.push {
        hw.write(regs::imir(1), regs::IMIR_PORT_BP | regs::IMIR_PORT_IM_EN);
        hw.write(regs::imirext(1), regs::IMIREXT_SIZE_BP | regs::IMIREXT_CTRL_PSH);
    }

    if lli.size != 0 {
        hw.write(regs::imir(2), regs::IMIR_PORT_BP | regs::IMIR_PORT_IM_EN);
        hw.write(regs::imirext(2), lli.size as u32 | regs::IMIREXT_CTRL_BP);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENABLE / DISABLE
// ═══════════════════════════════════════════════════════════════════════════

/// Unmask queue and other causes.
pub fn irq_enable<R: RegisterAccess>(hw: &Hw<R>, counts: &QueueCounts, masks: &MsixMasks) {
    if counts.is_msix() {
        let mask = masks.eims_enable_mask;
        let mut ims = regs::IMS_LSC | regs::IMS_DOUTSYNC;
        hw.rmw(regs::EIAC, |v| v | mask);
        hw.rmw(regs::EIAM, |v| v | mask);
        hw.write(regs::EIMS, mask);
        if counts.vfs > 0 {
            hw.write(regs::MBVFIMR, 0xFF);
            ims |= regs::IMS_VMMB;
        }
        if hw.generation() == Generation::I82580 {
            ims |= regs::IMS_DRSTA;
        }
        hw.write(regs::IMS, ims);
    } else {
        hw.write(regs::IMS, regs::IMS_ENABLE_MASK | regs::IMS_DRSTA);
        hw.write(regs::IAM, regs::IMS_ENABLE_MASK | regs::IMS_DRSTA);
    }
}

/// Mask everything this driver enabled.
///
/// EIAC and EIAM are shared with VF drivers, so only the PF's bits are
/// cleared there.
pub fn irq_disable<R: RegisterAccess>(hw: &Hw<R>, counts: &QueueCounts, masks: &MsixMasks) {
    if counts.is_msix() {
        let mask = masks.eims_enable_mask;
        hw.rmw(regs::EIAM, |v| v & !mask);
        hw.write(regs::EIMC, mask);
        hw.rmw(regs::EIAC, |v| v & !mask);
    }
    hw.write(regs::IAM, 0);
    hw.write(regs::IMC, regs::INT_MASK_ALL);
    hw.flush();
}

// ═══════════════════════════════════════════════════════════════════════════
// HANDLERS
// ═══════════════════════════════════════════════════════════════════════════

bitflags! {
    /// Non-queue causes decoded from ICR.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OtherCause: u32 {
        /// Device reset asserted; schedule a reset.
        const RESET = 0x01;
        /// DMA out of sync.
        const DMA_OUT_OF_SYNC = 0x02;
        /// A VF mailbox needs service.
        const MAILBOX = 0x04;
        /// Link state may have changed; run the watchdog.
        const LINK = 0x08;
    }
}

fn decode_icr(icr: u32) -> OtherCause {
    let mut cause = OtherCause::empty();
    if icr & regs::IMS_DRSTA != 0 {
        cause |= OtherCause::RESET;
    }
    if icr & regs::IMS_DOUTSYNC != 0 {
        cause |= OtherCause::DMA_OUT_OF_SYNC;
    }
    if icr & regs::IMS_VMMB != 0 {
        cause |= OtherCause::MAILBOX;
    }
    if icr & (regs::IMS_LSC | regs::IMS_RXSEQ) != 0 {
        cause |= OtherCause::LINK;
    }
    cause
}

/// MSI-X other-cause vector: decode ICR and re-arm the vector.
pub fn msix_other<R: RegisterAccess>(hw: &Hw<R>, masks: &MsixMasks, vfs: u16) -> OtherCause {
    let cause = decode_icr(hw.read(regs::ICR));
    let mut ims = regs::IMS_LSC | regs::IMS_DOUTSYNC;
    if vfs > 0 {
        ims |= regs::IMS_VMMB;
    }
    hw.write(regs::IMS, ims);
    hw.write(regs::EIMS, masks.eims_other);
    cause
}

/// MSI-X queue vector: schedule its poll.
#[inline]
pub fn msix_ring(signal: &VectorSignal, v_idx: usize) {
    signal.raise(v_idx);
}

/// MSI or legacy interrupt: decode ICR and schedule vector 0.
///
/// Returns `None` when a shared legacy line fired for another device.
pub fn intr<R: RegisterAccess>(hw: &Hw<R>, signal: &VectorSignal, mode: InterruptMode) -> Option<OtherCause> {
    // Reading ICR masks further interrupts through IAM.
    let icr = hw.read(regs::ICR);
    if mode == InterruptMode::Legacy && icr & regs::ICR_INT_ASSERTED == 0 {
        return None;
    }
    signal.raise(0);
    Some(decode_icr(icr))
}

// ═══════════════════════════════════════════════════════════════════════════
// VECTOR SIGNAL
// ═══════════════════════════════════════════════════════════════════════════

/// Pending-poll bits shared between interrupt handlers and the poll loop.
#[derive(Debug, Default)]
pub struct VectorSignal {
    pending: AtomicU32,
}

impl VectorSignal {
    /// No vector pending.
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
        }
    }

    /// Mark vector `v_idx` runnable.
    #[inline]
    pub fn raise(&self, v_idx: usize) {
        self.pending.fetch_or(1 << (v_idx & 31), Ordering::AcqRel);
    }

    /// Mark every vector in `mask` runnable.
    #[inline]
    pub fn raise_mask(&self, mask: u32) {
        self.pending.fetch_or(mask, Ordering::AcqRel);
    }

    /// Vector `v_idx` is waiting for a poll.
    #[inline]
    pub fn is_pending(&self, v_idx: usize) -> bool {
        self.pending.load(Ordering::Acquire) & (1 << (v_idx & 31)) != 0
    }

    /// Take every pending bit.
    #[inline]
    pub fn take(&self) -> u32 {
        self.pending.swap(0, Ordering::AcqRel)
    }
}
