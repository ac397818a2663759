//! Adapter lifecycle.
//!
//! [`Adapter`] owns the register window, the DMA mapper, the vector and ring
//! arenas and the VF table. Rings and vectors refer to each other by arena
//! index only.
//!
//! # Lifecycle
//! ```text
//! new ──► open ──► up ◄──────────────┐
//!          │        │                │
//!          │        ▼                │
//!          │      down ──► reset ────┘  (reinit_locked, change_mtu)
//!          │        │
//!          └──────► close ──► rings freed
//! ```
//!
//! `DOWN` and `RESETTING` live in an atomic word so a second context can
//! observe them without holding the adapter.
//!
//! # Reference
//! Intel 82576 Datasheet, Section 4.6 (Initialization)

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use log::{debug, info, warn};
use smoltcp::wire::EthernetAddress;

use crate::config::{IgbConfig, InterruptMode};
use crate::dma::DmaMapper;
use crate::error::{IgbError, Result};
use crate::filter::{self, RxMode};
use crate::hw::{regs, Hw, LinkSpeed, RegisterAccess};
use crate::interrupt::{
    configure_lli, configure_single_vector, init_interrupt_scheme, intr, irq_disable, irq_enable,
    msix_other, InterruptPlatform, LliConfig, OtherCause, QueueCounts, VectorSignal,
};
use crate::itr::{set_itr, update_ring_itr, write_itr};
use crate::mailbox::transport::{MailboxTransport, PfMailbox};
use crate::mailbox::VfMailbox;
use crate::ring::configure::{
    configure_rx_ring, configure_tx_ring, disable_queue, set_rlpml, setup_rctl, setup_tctl,
};
use crate::ring::{ItrSample, RingFlags, RxBufferMode, RxRing, TxRing};
use crate::rx::{alloc_rx_buffers, clean_rx_irq, RxSink};
use crate::stats::AdapterStats;
use crate::time::{delay, Clock, TimeoutConfig};
use crate::tx::{clean_tx_irq, xmit_frame_ring, TxCleanContext, TxPacket, TxStatus};
use crate::vector::{configure_msix, MsixMasks, QueueVector};

// ═══════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════

/// Ethernet header.
const ETH_HLEN: u32 = 14;
/// Frame check sequence.
const ETH_FCS_LEN: u32 = 4;
/// One 802.1Q tag.
const VLAN_HLEN: u32 = 4;
/// Smallest MTU accepted.
pub const MIN_MTU: u32 = 68;
/// Largest frame the MAC can receive.
pub const MAX_JUMBO_FRAME_SIZE: u32 = 9728;

/// Attempts to take `RESETTING` before reporting busy, 1ms apart.
pub const RESET_ATTEMPTS: u32 = 100;

bitflags! {
    /// Adapter state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AdapterState: u32 {
        /// Interrupts and queues are disabled.
        const DOWN = 0x01;
        /// A reinit or MTU change owns the adapter.
        const RESETTING = 0x02;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ADAPTER
// ═══════════════════════════════════════════════════════════════════════════

/// One igb physical function.
pub struct Adapter<R, D, C> {
    pub(crate) hw: Hw<R>,
    pub(crate) dma: D,
    pub(crate) clock: C,
    config: IgbConfig,
    pub(crate) timeouts: TimeoutConfig,
    pub(crate) counts: QueueCounts,
    pub(crate) vectors: Vec<QueueVector>,
    pub(crate) tx: Vec<TxRing>,
    pub(crate) rx: Vec<RxRing>,
    pub(crate) masks: MsixMasks,
    state: AtomicU32,
    mac: EthernetAddress,
    rx_mode: RxMode,
    mc_list: Vec<EthernetAddress>,
    pub(crate) vf_mailbox: Option<VfMailbox>,
    /// Link is up as last seen by the watchdog.
    pub(crate) carrier_ok: bool,
    pub(crate) link_speed: LinkSpeed,
    /// Hang window multiplier; slow links drain a full ring slowly.
    pub(crate) tx_timeout_factor: u32,
    /// The watchdog asked for a reinit.
    pub(crate) reset_pending: bool,
    pub(crate) stats: AdapterStats,
    max_frame_size: u32,
    mtu: u32,
}

fn mode_name(mode: InterruptMode) -> &'static str {
    match mode {
        InterruptMode::MsiX => "MSI-X",
        InterruptMode::Msi => "MSI",
        InterruptMode::Legacy => "legacy",
    }
}

impl<R: RegisterAccess, D: DmaMapper, C: Clock> Adapter<R, D, C> {
    /// Negotiate interrupts and build the vector and ring arenas.
    ///
    /// Descriptor memory is not allocated until [`Adapter::open`]. The
    /// adapter starts `DOWN`.
    pub fn new<P: InterruptPlatform + ?Sized>(
        hw: Hw<R>,
        dma: D,
        clock: C,
        config: IgbConfig,
        timeouts: TimeoutConfig,
        mac: EthernetAddress,
        platform: &mut P,
    ) -> Result<Self> {
        let scheme = init_interrupt_scheme(platform, &config)?;
        let counts = scheme.counts;

        let vf_mailbox = if counts.vfs > 0 {
            Some(VfMailbox::new(
                counts.vfs,
                counts.vmdq_pools,
                config.mac_seed,
                timeouts.vf_nack_interval(),
            )?)
        } else {
            None
        };

        info!(
            "igb: Using {} interrupts. {} rx queue(s), {} tx queue(s)",
            mode_name(counts.mode),
            counts.num_rx_queues,
            counts.num_tx_queues
        );
        if counts.vfs > 0 {
            info!("igb: {} VFs allocated", counts.vfs);
        }

        let max_frame_size = config.max_frame_size;
        Ok(Self {
            hw,
            dma,
            clock,
            config,
            timeouts,
            counts,
            vectors: scheme.vectors,
            tx: scheme.tx,
            rx: scheme.rx,
            masks: MsixMasks::default(),
            state: AtomicU32::new(AdapterState::DOWN.bits()),
            mac,
            rx_mode: RxMode::default(),
            mc_list: Vec::new(),
            vf_mailbox,
            carrier_ok: false,
            link_speed: LinkSpeed::Unknown,
            tx_timeout_factor: 1,
            reset_pending: false,
            stats: AdapterStats::default(),
            max_frame_size,
            mtu: max_frame_size.saturating_sub(ETH_HLEN + ETH_FCS_LEN + VLAN_HLEN),
        })
    }

    // ───────────────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────────────

    /// Register window.
    #[inline]
    pub fn hw(&self) -> &Hw<R> {
        &self.hw
    }

    /// Validated configuration.
    #[inline]
    pub fn config(&self) -> &IgbConfig {
        &self.config
    }

    /// Negotiated queue and vector counts.
    #[inline]
    pub fn counts(&self) -> &QueueCounts {
        &self.counts
    }

    /// Current state bits.
    #[inline]
    pub fn state(&self) -> AdapterState {
        AdapterState::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_down(&self) -> bool {
        self.state().contains(AdapterState::DOWN)
    }

    /// Adapter-wide counters as of the last refresh.
    #[inline]
    pub fn stats(&self) -> &AdapterStats {
        &self.stats
    }

    #[inline]
    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    #[inline]
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// PF MAC address.
    #[inline]
    pub fn mac(&self) -> EthernetAddress {
        self.mac
    }

    /// Link is up.
    #[inline]
    pub fn carrier_ok(&self) -> bool {
        self.carrier_ok
    }

    #[inline]
    pub fn link_speed(&self) -> LinkSpeed {
        self.link_speed
    }

    pub fn tx_ring(&self, i: usize) -> Option<&TxRing> {
        self.tx.get(i)
    }

    pub fn rx_ring(&self, i: usize) -> Option<&RxRing> {
        self.rx.get(i)
    }

    pub fn vector(&self, i: usize) -> Option<&QueueVector> {
        self.vectors.get(i)
    }

    /// Number of queue vectors.
    #[inline]
    pub fn num_vectors(&self) -> usize {
        self.vectors.len()
    }

    /// VF table, when SR-IOV is active.
    pub fn vf_mailbox(&self) -> Option<&VfMailbox> {
        self.vf_mailbox.as_ref()
    }

    // ───────────────────────────────────────────────────────────────────────
    // State bits
    // ───────────────────────────────────────────────────────────────────────

    fn set_state(&self, bits: AdapterState) {
        self.state.fetch_or(bits.bits(), Ordering::AcqRel);
    }

    fn clear_state(&self, bits: AdapterState) {
        self.state.fetch_and(!bits.bits(), Ordering::AcqRel);
    }

    /// Take `RESETTING`. `false` if another context holds it.
    pub fn try_begin_reset(&self) -> bool {
        let bit = AdapterState::RESETTING.bits();
        self.state.fetch_or(bit, Ordering::AcqRel) & bit == 0
    }

    /// Release `RESETTING`.
    pub fn end_reset(&self) {
        self.clear_state(AdapterState::RESETTING);
    }

    /// Take `RESETTING`, backing off 1ms between attempts.
    fn lock_reset(&self) -> Result<()> {
        for _ in 0..RESET_ATTEMPTS {
            if self.try_begin_reset() {
                return Ok(());
            }
            delay(&self.clock, self.timeouts.ms_to_ticks(1));
        }
        Err(IgbError::Busy)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Resources
    // ───────────────────────────────────────────────────────────────────────

    fn setup_all_resources(&mut self) -> Result<()> {
        for tx in self.tx.iter_mut() {
            tx.ring.allocate(&self.dma)?;
        }
        for rx in self.rx.iter_mut() {
            rx.ring.allocate(&self.dma)?;
        }
        Ok(())
    }

    fn free_all_resources(&mut self) {
        for tx in self.tx.iter_mut() {
            tx.clean(&self.dma);
            tx.ring.free(&self.dma);
        }
        for rx in self.rx.iter_mut() {
            rx.clean(&self.dma);
            rx.ring.free(&self.dma);
        }
    }

    /// Allocate descriptor memory, reset the MAC state and bring the adapter up.
    ///
    /// Any allocation failure releases everything already allocated.
    pub fn open(&mut self) -> Result<()> {
        if !self.is_down() {
            return Err(IgbError::Busy);
        }
        if let Err(e) = self.setup_all_resources() {
            warn!("igb: Allocation of ring resources failed: {}", e);
            self.free_all_resources();
            return Err(e);
        }
        self.reset();
        self.up();
        Ok(())
    }

    /// Bring the adapter down and release descriptor memory.
    pub fn close(&mut self) {
        if !self.is_down() {
            self.down();
        }
        self.free_all_resources();
    }

    // ───────────────────────────────────────────────────────────────────────
    // Up / down
    // ───────────────────────────────────────────────────────────────────────

    /// Program filters, rings and the global RX/TX controls, then post RX buffers.
    fn configure(&mut self) {
        self.apply_rx_mode();

        let msix = self.counts.is_msix();
        for tx in self.tx.iter_mut() {
            configure_tx_ring(&self.hw, tx, msix);
        }
        setup_tctl(&self.hw);

        let vfs = self.counts.vfs;
        set_rlpml(&self.hw, self.max_frame_size, vfs);
        if vfs > 0 {
            filter::set_vmolr(&self.hw, vfs as u32, vfs, self.counts.rss_queues);
        }
        for rx in self.rx.iter_mut() {
            configure_rx_ring(&self.hw, rx, vfs);
        }
        setup_rctl(&self.hw, self.max_frame_size);

        for rx in self.rx.iter_mut() {
            let unused = rx.ring.unused();
            alloc_rx_buffers(&self.hw, rx, &self.dma, unused);
        }
    }

    /// Configure the hardware, route and enable interrupts, then tell the VFs.
    pub fn up(&mut self) {
        self.configure();
        self.clear_state(AdapterState::DOWN);

        if self.counts.is_msix() {
            self.masks = configure_msix(&self.hw, &mut self.vectors, &self.rx, &self.tx);
        } else {
            configure_single_vector(&self.hw);
            self.masks = MsixMasks::default();
        }
        configure_lli(&self.hw, &LliConfig::from(&self.config), self.counts.mode);

        // Clear any pending cause before unmasking.
        let _ = self.hw.read(regs::ICR);
        irq_enable(&self.hw, &self.counts, &self.masks);

        // Link comes back through the watchdog.
        self.carrier_ok = false;
        self.ping_vfs();
        debug!("igb: adapter up");
    }

    /// Stop traffic, quiesce every queue, mask interrupts, reset and clean
    /// the rings.
    pub fn down(&mut self) {
        self.set_state(AdapterState::DOWN);

        self.hw.rmw(regs::RCTL, |v| v & !regs::RCTL_EN);
        for rx in self.rx.iter_mut() {
            rx.ring.flags.insert(RingFlags::QUIESCED);
        }
        for tx in self.tx.iter_mut() {
            tx.stopped = true;
        }
        self.hw.rmw(regs::TCTL, |v| v & !regs::TCTL_EN);
        self.hw.flush();
        delay(&self.clock, self.timeouts.quiesce());

        for tx in self.tx.iter() {
            let reg_idx = tx.ring.reg_idx();
            if let Err(e) = disable_queue(&self.hw, regs::txdctl(reg_idx), reg_idx) {
                warn!("igb: {}", e);
            }
        }
        for rx in self.rx.iter() {
            let reg_idx = rx.ring.reg_idx();
            if let Err(e) = disable_queue(&self.hw, regs::rxdctl(reg_idx), reg_idx) {
                warn!("igb: {}", e);
            }
        }

        irq_disable(&self.hw, &self.counts, &self.masks);

        self.carrier_ok = false;
        self.link_speed = LinkSpeed::Unknown;
        self.update_stats();
        self.reset();

        for tx in self.tx.iter_mut() {
            tx.clean(&self.dma);
        }
        for rx in self.rx.iter_mut() {
            rx.clean(&self.dma);
        }
        debug!("igb: adapter down");
    }

    /// Return the MAC and VF state to defaults.
    ///
    /// VFs lose clear-to-send and must handshake again; their queues stay
    /// disabled until they do.
    pub fn reset(&mut self) {
        if let Some(vfs) = self.vf_mailbox.as_mut() {
            vfs.clear_all_cts();
            vfs.ping_all_vfs(&mut PfMailbox::new(&self.hw));
            self.hw.write(regs::VFRE, 0);
            self.hw.write(regs::VFTE, 0);
        }

        for i in 0..self.hw.generation().rar_entry_count() {
            self.hw.write(regs::ral(i), 0);
            self.hw.write(regs::rah(i), 0);
        }
        filter::clear_mta(&self.hw);
        self.hw.flush();

        self.stats.reset_count += 1;
    }

    /// `down` then `up` while holding `RESETTING`.
    pub fn reinit_locked(&mut self) -> Result<()> {
        self.lock_reset()?;
        self.down();
        self.up();
        self.end_reset();
        Ok(())
    }

    /// Change the MTU, re-sizing RX buffers and restarting a running adapter.
    pub fn change_mtu(&mut self, new_mtu: u32) -> Result<()> {
        let max_frame = new_mtu.saturating_add(ETH_HLEN + ETH_FCS_LEN + VLAN_HLEN);
        if new_mtu < MIN_MTU || max_frame > MAX_JUMBO_FRAME_SIZE {
            return Err(IgbError::InvalidMtu { mtu: new_mtu });
        }

        self.lock_reset()?;
        let running = !self.is_down();
        if running {
            self.down();
        }

        self.max_frame_size = max_frame;
        let mode = RxBufferMode::for_max_frame(max_frame);
        for rx in self.rx.iter_mut() {
            rx.buffer_mode = mode;
        }
        info!("igb: changing MTU from {} to {}", self.mtu, new_mtu);
        self.mtu = new_mtu;

        if running {
            self.up();
        }
        self.end_reset();
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Data path
    // ───────────────────────────────────────────────────────────────────────

    /// Queue one packet on TX ring `queue` (modulo the ring count).
    pub fn transmit(&mut self, queue: usize, packet: TxPacket) -> TxStatus {
        if self
            .state()
            .intersects(AdapterState::DOWN | AdapterState::RESETTING)
            || self.tx.is_empty()
        {
            return TxStatus::Busy;
        }
        let now = self.clock.ticks();
        let n = self.tx.len();
        let tx = &mut self.tx[queue % n];
        xmit_frame_ring(&self.hw, tx, &self.dma, packet, now)
    }

    /// Service vector `v_idx`: TX completion, then up to `budget` RX frames.
    ///
    /// Returns `budget` when more work remains; the vector stays masked
    /// and must be polled again. Otherwise the vector is re-armed. A down
    /// adapter reports no work and leaves the vector masked.
    pub fn poll<S: RxSink + ?Sized>(&mut self, v_idx: usize, budget: usize, sink: &mut S) -> Result<usize> {
        if v_idx >= self.vectors.len() {
            return Err(IgbError::InvalidIndex);
        }
        // A poll that raced with down() must not touch quiesced rings.
        if self.is_down() {
            return Ok(0);
        }

        let ctx = TxCleanContext {
            now: self.clock.ticks(),
            hang_window: self.timeouts.tx_hang(self.tx_timeout_factor),
            carrier_ok: self.carrier_ok,
            down: self.is_down(),
        };
        let q = self.vectors.get_mut(v_idx).ok_or(IgbError::InvalidIndex)?;
        write_itr(&self.hw, q);

        let mut tx_complete = true;
        if let Some(t) = q.tx_ring {
            tx_complete = clean_tx_irq(&self.hw, &mut self.tx[t], &self.dma, &ctx);
        }
        let mut work_done = 0;
        if let Some(r) = q.rx_ring {
            work_done = clean_rx_irq(&self.hw, &mut self.rx[r], &self.dma, sink, budget);
        }

        if !tx_complete {
            work_done = budget;
        }
        if work_done < budget {
            self.ring_irq_enable(v_idx);
        }
        Ok(work_done)
    }

    /// Poll every vector an interrupt handler marked.
    ///
    /// Vectors that used their whole budget are marked again.
    pub fn poll_signalled<S: RxSink + ?Sized>(
        &mut self,
        signal: &VectorSignal,
        budget: usize,
        sink: &mut S,
    ) -> Result<usize> {
        let pending = signal.take();
        let mut total = 0;
        for v_idx in 0..self.vectors.len().min(32) {
            if pending & (1 << v_idx) == 0 {
                continue;
            }
            let done = self.poll(v_idx, budget, sink)?;
            if done >= budget {
                signal.raise(v_idx);
            }
            total += done;
        }
        Ok(total)
    }

    /// Recompute the vector's throttle, then unmask it unless going down.
    fn ring_irq_enable(&mut self, v_idx: usize) {
        let setting = self.config.itr;
        let speed = self.link_speed;
        let msix = self.counts.is_msix();
        let Some(q) = self.vectors.get_mut(v_idx) else {
            return;
        };

        if setting.is_adaptive() {
            let rx = q.rx_ring.and_then(|r| self.rx.get_mut(r)).map(|r| &mut r.ring.itr);
            let tx = q.tx_ring.and_then(|t| self.tx.get_mut(t)).map(|t| &mut t.ring.itr);
            if msix {
                update_ring_itr(q, rx, tx, speed);
            } else {
                let mut idle_rx = ItrSample::default();
                let mut idle_tx = ItrSample::default();
                set_itr(
                    q,
                    rx.unwrap_or(&mut idle_rx),
                    tx.unwrap_or(&mut idle_tx),
                    speed,
                    setting,
                );
            }
        }

        if self.is_down() {
            return;
        }
        if msix {
            let eims = self.vectors[v_idx].eims_value;
            self.hw.write(regs::EIMS, eims);
        } else {
            irq_enable(&self.hw, &self.counts, &self.masks);
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Interrupt causes
    // ───────────────────────────────────────────────────────────────────────

    /// MSI-X other-cause vector fired.
    pub fn service_other(&mut self) -> OtherCause {
        let cause = msix_other(&self.hw, &self.masks, self.counts.vfs);
        self.handle_other(cause);
        cause
    }

    /// MSI or legacy interrupt fired. `false` if it was not ours.
    pub fn service_intr(&mut self, signal: &VectorSignal) -> bool {
        match intr(&self.hw, signal, self.counts.mode) {
            Some(cause) => {
                self.handle_other(cause);
                true
            }
            None => false,
        }
    }

    /// Act on decoded non-queue causes.
    pub fn handle_other(&mut self, cause: OtherCause) {
        if cause.contains(OtherCause::RESET) {
            self.reset_pending = true;
        }
        if cause.contains(OtherCause::DMA_OUT_OF_SYNC) {
            self.stats.doosync += 1;
        }
        if cause.contains(OtherCause::MAILBOX) {
            self.msg_task();
        }
        if cause.contains(OtherCause::LINK) && !self.is_down() {
            self.watchdog();
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Filters and VFs
    // ───────────────────────────────────────────────────────────────────────

    fn apply_rx_mode(&mut self) {
        filter::set_rx_mode(&self.hw, self.rx_mode, &self.mac, &self.mc_list, self.counts.vfs);
        if let Some(vfs) = self.vf_mailbox.as_ref() {
            vfs.restore_vf_multicasts(&self.hw);
        }
    }

    /// Replace the receive mode and PF multicast list.
    pub fn set_rx_mode(&mut self, mode: RxMode, mc_list: &[EthernetAddress]) -> Result<()> {
        let mut list = Vec::new();
        list.try_reserve_exact(mc_list.len())
            .map_err(|_| IgbError::OutOfMemory)?;
        list.extend_from_slice(mc_list);
        self.rx_mode = mode;
        self.mc_list = list;
        self.apply_rx_mode();
        Ok(())
    }

    /// Ping every VF through the register mailbox.
    pub(crate) fn ping_vfs(&self) {
        if let Some(vfs) = self.vf_mailbox.as_ref() {
            vfs.ping_all_vfs(&mut PfMailbox::new(&self.hw));
        }
    }

    /// Service VF mailbox events through the register mailbox.
    pub fn msg_task(&mut self) {
        let now = self.clock.ticks();
        let Some(vfs) = self.vf_mailbox.as_mut() else {
            return;
        };
        vfs.msg_task(&self.hw, &mut PfMailbox::new(&self.hw), now);
        if vfs.take_rx_mode_dirty() {
            self.apply_rx_mode();
        }
    }

    /// Service VF mailbox events through `mbx`.
    pub fn msg_task_with<T: MailboxTransport + ?Sized>(&mut self, mbx: &mut T) {
        let now = self.clock.ticks();
        let Some(vfs) = self.vf_mailbox.as_mut() else {
            return;
        };
        vfs.msg_task(&self.hw, mbx, now);
        if vfs.take_rx_mode_dirty() {
            self.apply_rx_mode();
        }
    }

    /// Sum ring counters into the adapter totals.
    pub fn update_stats(&mut self) {
        self.stats.refresh(
            self.tx.iter().map(|t| &t.stats),
            self.rx.iter().map(|r| &r.stats),
        );
    }
}
