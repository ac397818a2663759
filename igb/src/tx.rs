//! Transmit path.
//!
//! A packet becomes an optional context descriptor (TSO, checksum offload
//! or VLAN insertion) followed by one data descriptor per fragment. The
//! tail register moves only once every descriptor of the packet is
//! written, so hardware never sees a half-built packet.
//!
//! # Completion
//! `clean_tx_irq` walks from `next_to_clean` to each packet's last
//! descriptor once it reports done, releasing mappings and the packet.
//! When the watchdog arms `detect_tx_hung`, a descriptor still pending
//! past the hang window stops the queue.
//!
//! # Reference
//! Intel 82576 Datasheet, Section 7.2 (Transmit Functionality)

use alloc::vec::Vec;

use bitflags::bitflags;
use log::warn;
use smoltcp::wire::{EthernetFrame, EthernetProtocol, IpProtocol, Ipv4Packet, Ipv6Packet, TcpPacket};

use crate::dma::{DmaDirection, DmaMapper};
use crate::error::IgbError;
use crate::hw::{barriers, regs, Hw, RegisterAccess};
use crate::ring::desc::*;
use crate::ring::{BufferSlot, DescRing, RingFlags, TxBufferInfo, TxRing};
use crate::time::time_after;

// ═══════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════

/// Largest fragment count a packet may carry.
pub const MAX_SKB_FRAGS: u16 = 18;
/// Descriptors reserved per packet: fragments, head, context and a gap.
pub const DESC_NEEDED: u16 = MAX_SKB_FRAGS + 4;
/// Free descriptors needed before a stopped queue is woken.
pub const TX_WAKE_THRESHOLD: u16 = 32;
/// Bytes a single data descriptor may carry (exclusive).
pub const MAX_DATA_PER_TXD: usize = 1 << 16;

const ETH_HLEN: usize = 14;
const ETH_P_8021Q: u16 = 0x8100;
const IPV6_HEADER_LEN: usize = 40;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPPROTO_SCTP: u8 = 132;

bitflags! {
    /// Per-packet offload flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxFlags: u32 {
        /// L4 checksum offload.
        const CSUM = 0x0000_0001;
        /// Hardware VLAN tag insertion.
        const VLAN = 0x0000_0002;
        /// TCP segmentation offload.
        const TSO = 0x0000_0004;
        /// IPv4 packet.
        const IPV4 = 0x0000_0008;
        /// Hardware timestamp requested.
        const TSTAMP = 0x0000_0010;
    }
}

/// Result of handing a packet to a TX ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Packet consumed (sent, or dropped and counted).
    Accepted,
    /// No room; the caller keeps the packet and retries.
    Busy,
}

// ═══════════════════════════════════════════════════════════════════════════
// PACKET
// ═══════════════════════════════════════════════════════════════════════════

/// Outgoing packet: linear head plus page fragments and offload requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxPacket {
    /// Linear part; holds at least the protocol headers when offloads are
    /// requested.
    pub data: Vec<u8>,
    /// Additional fragments.
    pub frags: Vec<Vec<u8>>,
    /// Tag to insert in hardware.
    pub vlan_tag: Option<u16>,
    /// L4 checksum is left for hardware to fill.
    pub csum_partial: bool,
    /// TSO segment size; zero disables segmentation.
    pub gso_size: u16,
    /// Hardware timestamp requested.
    pub timestamp: bool,
}

impl TxPacket {
    /// Single-fragment packet.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    /// Append a fragment.
    pub fn with_frag(mut self, frag: Vec<u8>) -> Self {
        self.frags.push(frag);
        self
    }

    /// Request VLAN tag insertion.
    pub fn with_vlan(mut self, tag: u16) -> Self {
        self.vlan_tag = Some(tag);
        self
    }

    /// Request checksum offload.
    pub fn with_checksum(mut self) -> Self {
        self.csum_partial = true;
        self
    }

    /// Request TCP segmentation with segment size `mss`.
    pub fn with_tso(mut self, mss: u16) -> Self {
        self.gso_size = mss;
        self.csum_partial = true;
        self
    }

    /// Total length.
    pub fn len(&self) -> usize {
        self.data.len() + self.frags.iter().map(Vec::len).sum::<usize>()
    }

    /// No bytes at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fragments beyond the head.
    pub fn nr_frags(&self) -> u16 {
        self.frags.len().min(u16::MAX as usize) as u16
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HEADER PARSING
// ═══════════════════════════════════════════════════════════════════════════

/// Header layout of an outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Headers {
    /// Offset of the IP header.
    pub network_offset: usize,
    /// IP header length.
    pub network_len: usize,
    /// IPv4 rather than IPv6.
    pub ipv4: bool,
    /// L4 protocol.
    pub protocol: IpProtocol,
}

impl Headers {
    /// Offset of the L4 header.
    #[inline]
    pub fn transport_offset(&self) -> usize {
        self.network_offset + self.network_len
    }
}

/// Locate the IP header of an Ethernet frame, skipping one in-band VLAN tag.
pub(crate) fn parse_headers(frame: &[u8]) -> Option<Headers> {
    let eth = EthernetFrame::new_checked(frame).ok()?;
    let mut offset = ETH_HLEN;
    let mut ethertype = eth.ethertype();
    if ethertype == EthernetProtocol::Unknown(ETH_P_8021Q) {
        let inner = frame.get(offset + 2..offset + 4)?;
        ethertype = EthernetProtocol::from(u16::from_be_bytes([inner[0], inner[1]]));
        offset += 4;
    }

    let l3 = frame.get(offset..)?;
    match ethertype {
        EthernetProtocol::Ipv4 => {
            if l3.len() < IPV4_MIN_HEADER_LEN {
                return None;
            }
            let ip = Ipv4Packet::new_unchecked(l3);
            let len = ip.header_len() as usize;
            if len < IPV4_MIN_HEADER_LEN || l3.len() < len {
                return None;
            }
            Some(Headers {
                network_offset: offset,
                network_len: len,
                ipv4: true,
                protocol: ip.next_header(),
            })
        }
        EthernetProtocol::Ipv6 => {
            if l3.len() < IPV6_HEADER_LEN {
                return None;
            }
            let ip = Ipv6Packet::new_unchecked(l3);
            Some(Headers {
                network_offset: offset,
                network_len: IPV6_HEADER_LEN,
                ipv4: false,
                protocol: ip.next_header(),
            })
        }
        _ => None,
    }
}

/// Fold a ones-complement sum over big-endian 16-bit words.
fn csum_fold(mut sum: u32, bytes: &[u8]) -> u32 {
    for pair in bytes.chunks(2) {
        let hi = pair[0] as u32;
        let lo = pair.get(1).copied().unwrap_or(0) as u32;
        sum += (hi << 8) | lo;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum
}

/// Prepare headers for segmentation: zero the IP length fields and seed the
/// TCP checksum with the length-less pseudo-header sum.
fn seed_tso_headers(data: &mut [u8], h: &Headers) -> Option<usize> {
    let l4 = h.transport_offset();
    let tcp_len = TcpPacket::new_checked(data.get(l4..)?).ok()?.header_len() as usize;

    let mut sum = 0u32;
    if h.ipv4 {
        let mut ip = Ipv4Packet::new_unchecked(&mut data[h.network_offset..]);
        ip.set_total_len(0);
        ip.set_checksum(0);
        sum = csum_fold(sum, ip.src_addr().as_bytes());
        sum = csum_fold(sum, ip.dst_addr().as_bytes());
    } else {
        let mut ip = Ipv6Packet::new_unchecked(&mut data[h.network_offset..]);
        ip.set_payload_len(0);
        sum = csum_fold(sum, ip.src_addr().as_bytes());
        sum = csum_fold(sum, ip.dst_addr().as_bytes());
    }
    sum = csum_fold(sum, &[0, u8::from(IpProtocol::Tcp)]);

    TcpPacket::new_unchecked(&mut data[l4..]).set_checksum(sum as u16);
    Some(tcp_len)
}

// ═══════════════════════════════════════════════════════════════════════════
// DESCRIPTOR BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Claim the next slot for a context descriptor.
fn post_context(ring: &mut DescRing<TxBufferInfo>, ctx: TxContextDesc, now: u64) {
    let i = ring.next_to_use;
    ring.write_desc(i, ctx.into());
    let info = &mut ring.buffer_info[i as usize];
    info.time_stamp = Some(now);
    info.next_to_watch = Some(i);
    info.dma = None;
    ring.next_to_use = ring.next_index(i);
}

/// Context index bits for rings that need them.
#[inline]
fn ctx_idx(ring: &DescRing<TxBufferInfo>) -> u32 {
    if ring.flags.contains(RingFlags::TX_CTX_IDX) {
        (ring.reg_idx as u32) << 4
    } else {
        0
    }
}

/// Emit the TSO context descriptor.
///
/// Returns the header length replicated in every segment, or `None` when
/// the packet is not a TCP segment the hardware can split.
pub fn tso_adv(
    ring: &mut DescRing<TxBufferInfo>,
    packet: &mut TxPacket,
    headers: Option<Headers>,
    now: u64,
) -> Option<u32> {
    let h = headers?;
    if h.protocol != IpProtocol::Tcp {
        return None;
    }
    let l4len = seed_tso_headers(&mut packet.data, &h)? as u32;

    let mut info = 0u32;
    if let Some(tag) = packet.vlan_tag {
        info |= (tag as u32) << 16;
    }
    info |= (h.network_offset as u32) << ADVTXD_MACLEN_SHIFT;
    info |= h.network_len as u32;
    let hdr_len = h.network_offset as u32 + h.network_len as u32 + l4len;

    let mut tu_cmd = ADVTXD_DCMD_DEXT | ADVTXD_DTYP_CTXT | ADVTXD_TUCMD_L4T_TCP;
    if h.ipv4 {
        tu_cmd |= ADVTXD_TUCMD_IPV4;
    }

    let mss_l4len_idx = ((packet.gso_size as u32) << ADVTXD_MSS_SHIFT)
        | (l4len << ADVTXD_L4LEN_SHIFT)
        | ctx_idx(ring);

    post_context(
        ring,
        TxContextDesc {
            vlan_macip_lens: info,
            seqnum_seed: 0,
            type_tucmd_mlhl: tu_cmd,
            mss_l4len_idx,
        },
        now,
    );
    Some(hdr_len)
}

/// Emit a checksum/VLAN context descriptor when one is needed.
pub fn tx_csum_adv(
    ring: &mut DescRing<TxBufferInfo>,
    packet: &TxPacket,
    headers: Option<Headers>,
    now: u64,
) -> bool {
    if !packet.csum_partial && packet.vlan_tag.is_none() {
        return false;
    }

    let mut info = 0u32;
    if let Some(tag) = packet.vlan_tag {
        info |= (tag as u32) << 16;
    }
    let network_offset = headers.map(|h| h.network_offset).unwrap_or(ETH_HLEN);
    info |= (network_offset as u32) << ADVTXD_MACLEN_SHIFT;

    let mut tu_cmd = ADVTXD_DCMD_DEXT | ADVTXD_DTYP_CTXT;
    if packet.csum_partial {
        match headers {
            Some(h) => {
                info |= h.network_len as u32;
                if h.ipv4 {
                    tu_cmd |= ADVTXD_TUCMD_IPV4;
                }
                match h.protocol {
                    IpProtocol::Tcp => tu_cmd |= ADVTXD_TUCMD_L4T_TCP,
                    p if u8::from(p) == IPPROTO_SCTP => tu_cmd |= ADVTXD_TUCMD_L4T_SCTP,
                    _ => {}
                }
            }
            None => warn!("igb: partial checksum but proto unknown"),
        }
    }

    let mss_l4len_idx = ctx_idx(ring);
    post_context(
        ring,
        TxContextDesc {
            vlan_macip_lens: info,
            seqnum_seed: 0,
            type_tucmd_mlhl: tu_cmd,
            mss_l4len_idx,
        },
        now,
    );
    true
}

/// Map the head and every fragment onto consecutive slots starting at
/// `next_to_use`.
///
/// Returns the number of data descriptors. On a mapping failure every
/// slot this call touched is released and the packet is handed back.
pub fn tx_map_adv<D: DmaMapper + ?Sized>(
    ring: &mut DescRing<TxBufferInfo>,
    dma: &D,
    packet: TxPacket,
    first: u16,
    hdr_len: u32,
    now: u64,
) -> Result<u16, (IgbError, TxPacket)> {
    let start = ring.next_to_use;
    let mut i = start;
    let mut count: u16 = 0;

    let fragments = core::iter::once(packet.data.as_slice())
        .chain(packet.frags.iter().map(Vec::as_slice))
        .filter(|f| !f.is_empty());

    let mut failure = None;
    for frag in fragments {
        if frag.len() >= MAX_DATA_PER_TXD {
            debug_assert!(frag.len() < MAX_DATA_PER_TXD, "tx fragment too large");
            failure = Some(IgbError::FragmentTooLarge { len: frag.len() });
            break;
        }
        if count > 0 {
            i = ring.next_index(i);
        }
        match dma.map(frag, DmaDirection::ToDevice) {
            Ok(handle) => {
                let info = &mut ring.buffer_info[i as usize];
                info.length = frag.len() as u16;
                info.time_stamp = Some(now);
                info.next_to_watch = Some(i);
                info.dma = Some(handle);
                count += 1;
            }
            Err(e) => {
                warn!("igb: TX DMA map failed");
                failure = Some(e.into());
                break;
            }
        }
    }

    if let Some(e) = failure {
        unwind(ring, dma, start, count);
        return Err((e, packet));
    }
    if count == 0 {
        return Err((IgbError::DmaMapping, packet));
    }

    let segs = if packet.gso_size > 0 {
        let payload = (packet.len() as u32).saturating_sub(hdr_len);
        payload.div_ceil(packet.gso_size as u32).max(1)
    } else {
        1
    };
    let bytecount = (segs - 1) * packet.data.len() as u32 + packet.len() as u32;

    let last = &mut ring.buffer_info[i as usize];
    last.gso_segs = segs.min(u16::MAX as u32) as u16;
    last.bytecount = bytecount;
    last.packet = Some(packet);
    ring.buffer_info[first as usize].next_to_watch = Some(i);
    Ok(count)
}

/// Release `count` slots starting at `start`.
fn unwind<D: DmaMapper + ?Sized>(ring: &mut DescRing<TxBufferInfo>, dma: &D, start: u16, count: u16) {
    let mut i = start;
    for _ in 0..count {
        ring.buffer_info[i as usize].release(dma);
        i = ring.next_index(i);
    }
}

/// Write `count` data descriptors from `next_to_use`, mark the last one,
/// then publish them through the tail register.
pub fn tx_queue_adv<R: RegisterAccess>(
    hw: &Hw<R>,
    ring: &mut DescRing<TxBufferInfo>,
    flags: TxFlags,
    count: u16,
    paylen: u32,
    hdr_len: u32,
) {
    let mut cmd_type_len = ADVTXD_DTYP_DATA | ADVTXD_DCMD_IFCS | ADVTXD_DCMD_DEXT;
    if flags.contains(TxFlags::VLAN) {
        cmd_type_len |= ADVTXD_DCMD_VLE;
    }
    if flags.contains(TxFlags::TSTAMP) {
        cmd_type_len |= ADVTXD_MAC_TSTAMP;
    }

    let mut olinfo_status = 0u32;
    if flags.contains(TxFlags::TSO) {
        cmd_type_len |= ADVTXD_DCMD_TSE;
        olinfo_status |= TXD_POPTS_TXSM << 8;
        if flags.contains(TxFlags::IPV4) {
            olinfo_status |= TXD_POPTS_IXSM << 8;
        }
    } else if flags.contains(TxFlags::CSUM) {
        olinfo_status |= TXD_POPTS_TXSM << 8;
    }
    if flags.intersects(TxFlags::CSUM | TxFlags::TSO | TxFlags::VLAN) {
        olinfo_status |= ctx_idx(ring);
    }
    olinfo_status |= (paylen - hdr_len) << ADVTXD_PAYLEN_SHIFT;

    let mut i = ring.next_to_use;
    let mut last = i;
    for _ in 0..count {
        let (addr, len) = {
            let info = &ring.buffer_info[i as usize];
            (info.dma.as_ref().map(|h| h.bus).unwrap_or(0), info.length as u32)
        };
        ring.write_desc(
            i,
            TxDataDesc {
                buffer_addr: addr,
                cmd_type_len: cmd_type_len | len,
                olinfo_status,
            }
            .into(),
        );
        last = i;
        i = ring.next_index(i);
    }
    ring.update_desc(last, |raw| {
        let mut d = TxDataDesc::from(*raw);
        d.cmd_type_len |= ADVTXD_DCMD_LAST;
        *raw = d.into();
    });

    // Descriptors must be visible before the tail moves.
    barriers::wmb();

    ring.next_to_use = i;
    hw.write(regs::tdt(ring.reg_idx), i as u32);
}

/// Stop the queue unless `size` descriptors are free.
///
/// Returns `true` when the queue stays stopped.
pub fn maybe_stop_tx(tx: &mut TxRing, size: u16) -> bool {
    if tx.ring.unused() >= size {
        return false;
    }
    tx.stopped = true;
    // Completion may have freed space between the check and the stop.
    barriers::mb();
    if tx.ring.unused() < size {
        return true;
    }
    tx.stopped = false;
    tx.stats.restart_queue += 1;
    false
}

/// Post one packet.
///
/// A mapping failure drops and counts the packet; only lack of space
/// reports [`TxStatus::Busy`].
pub fn xmit_frame_ring<R: RegisterAccess, D: DmaMapper + ?Sized>(
    hw: &Hw<R>,
    tx: &mut TxRing,
    dma: &D,
    mut packet: TxPacket,
    now: u64,
) -> TxStatus {
    if packet.is_empty() {
        return TxStatus::Accepted;
    }

    if tx.stopped || maybe_stop_tx(tx, packet.nr_frags() + 4) {
        tx.stats.tx_busy += 1;
        return TxStatus::Busy;
    }

    let headers = parse_headers(&packet.data);
    let mut flags = TxFlags::empty();
    if packet.vlan_tag.is_some() {
        flags |= TxFlags::VLAN;
    }
    if packet.timestamp {
        flags |= TxFlags::TSTAMP;
    }
    if headers.map_or(false, |h| h.ipv4) {
        flags |= TxFlags::IPV4;
    }

    let first = tx.ring.next_to_use;
    let mut hdr_len = 0;
    if packet.gso_size > 0 {
        match tso_adv(&mut tx.ring, &mut packet, headers, now) {
            Some(len) => {
                hdr_len = len;
                flags |= TxFlags::TSO;
            }
            None => {
                warn!("igb: dropping TSO packet without a TCP header");
                return TxStatus::Accepted;
            }
        }
    } else if tx_csum_adv(&mut tx.ring, &packet, headers, now) && packet.csum_partial {
        flags |= TxFlags::CSUM;
    }

    let paylen = packet.len() as u32;
    match tx_map_adv(&mut tx.ring, dma, packet, first, hdr_len, now) {
        Ok(count) => {
            tx_queue_adv(hw, &mut tx.ring, flags, count, paylen, hdr_len);
            maybe_stop_tx(tx, DESC_NEEDED);
        }
        Err((_, packet)) => {
            if first != tx.ring.next_to_use {
                tx.ring.buffer_info[first as usize].release(dma);
            }
            tx.ring.next_to_use = first;
            tx.stats.tx_dma_failed += 1;
            drop(packet);
        }
    }
    TxStatus::Accepted
}

// ═══════════════════════════════════════════════════════════════════════════
// COMPLETION
// ═══════════════════════════════════════════════════════════════════════════

/// Inputs to TX completion that live outside the ring.
#[derive(Debug, Clone, Copy)]
pub struct TxCleanContext {
    /// Current tick.
    pub now: u64,
    /// Hang window in ticks (already scaled by the link's timeout factor).
    pub hang_window: u64,
    /// Link is up.
    pub carrier_ok: bool,
    /// Adapter is going down; never wake the queue.
    pub down: bool,
}

/// Reclaim completed descriptors.
///
/// Returns `true` when cleaning finished before a full ring's worth of
/// descriptors was processed.
pub fn clean_tx_irq<R: RegisterAccess, D: DmaMapper + ?Sized>(
    hw: &Hw<R>,
    tx: &mut TxRing,
    dma: &D,
    ctx: &TxCleanContext,
) -> bool {
    if !tx.ring.is_allocated() {
        return true;
    }
    let ring = &mut tx.ring;
    let mut i = ring.next_to_clean;
    let mut count: u16 = 0;
    let mut total_bytes: u32 = 0;
    let mut total_packets: u32 = 0;

    while let Some(eop) = ring.buffer_info[i as usize].next_to_watch {
        if count >= ring.count() || tx_wb_status(&ring.read_desc(eop)) & TXD_STAT_DD == 0 {
            break;
        }
        // Descriptor fields are read only after DD.
        barriers::rmb();

        let mut cleaned = false;
        while !cleaned {
            cleaned = i == eop;
            let info = &mut ring.buffer_info[i as usize];
            if info.packet.is_some() {
                total_packets += info.gso_segs as u32;
                total_bytes += info.bytecount;
            }
            info.release(dma);
            ring.update_desc(i, clear_tx_wb_status);
            i = ring.next_index(i);
            count += 1;
        }
    }
    ring.next_to_clean = i;

    if count > 0 && ctx.carrier_ok && ring.unused() >= TX_WAKE_THRESHOLD {
        barriers::mb();
        if tx.stopped && !tx.hung && !ctx.down {
            tx.stopped = false;
            tx.stats.restart_queue += 1;
        }
    }

    if tx.detect_tx_hung {
        tx.detect_tx_hung = false;
        let ring = &tx.ring;
        let pending = ring.buffer_info[i as usize].time_stamp;
        if let Some(stamp) = pending {
            let xoff = hw.read(regs::STATUS) & regs::STATUS_TXOFF != 0;
            if time_after(ctx.now, stamp, ctx.hang_window) && !xoff {
                warn!(
                    "igb: Detected Tx Unit Hang\n  Tx Queue <{}>\n  TDH <{:x}>\n  TDT <{:x}>\n  \
                     next_to_use <{:x}>\n  next_to_clean <{:x}>\n  time_stamp <{:x}>\n  now <{:x}>",
                    ring.queue_index(),
                    hw.read(regs::tdh(ring.reg_idx())),
                    hw.read(regs::tdt(ring.reg_idx())),
                    ring.next_to_use(),
                    ring.next_to_clean(),
                    stamp,
                    ctx.now
                );
                tx.stopped = true;
                tx.hung = true;
                tx.stats.tx_hang += 1;
            }
        }
    }

    tx.ring.itr.add(total_bytes, total_packets);
    tx.stats.ring.bytes += total_bytes as u64;
    tx.stats.ring.packets += total_packets as u64;

    count < tx.ring.count()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dma::IdentityDma;
    use crate::hw::Generation;
    use crate::testutil::{FaultyDma, MockRegisters};
    use alloc::vec;

    /// Ethernet + IPv4 + TCP headers (54 bytes) followed by `payload` bytes.
    pub(crate) fn tcp_frame(payload: usize) -> Vec<u8> {
        let mut f = vec![0u8; 54 + payload];
        f[12] = 0x08;
        f[13] = 0x00;
        f[14] = 0x45;
        let total = (40 + payload) as u16;
        f[16..18].copy_from_slice(&total.to_be_bytes());
        f[23] = 6;
        f[26..30].copy_from_slice(&[192, 168, 0, 1]);
        f[30..34].copy_from_slice(&[192, 168, 0, 2]);
        f[46] = 0x50;
        f
    }

    fn ring(dma: &dyn DmaMapper, count: u16) -> TxRing {
        let mut tx = TxRing::new(0, count);
        tx.ring.allocate(dma).unwrap();
        tx
    }

    fn hw() -> Hw<MockRegisters> {
        Hw::new(MockRegisters::new(), Generation::I82576)
    }

    /// Mark descriptors `0..n` done as hardware would.
    pub(crate) fn complete(tx: &mut TxRing, n: u16) {
        for i in 0..n {
            tx.ring.update_desc(i, |raw| raw.hi |= (TXD_STAT_DD as u64) << 32);
        }
    }

    fn ctx(now: u64) -> TxCleanContext {
        TxCleanContext {
            now,
            hang_window: 1_000,
            carrier_ok: true,
            down: false,
        }
    }

    #[test]
    fn test_plain_packet_uses_one_descriptor_and_bumps_tail() {
        let dma = IdentityDma::new();
        let hw = hw();
        let mut tx = ring(&dma, 256);
        let status = xmit_frame_ring(&hw, &mut tx, &dma, TxPacket::new(vec![1u8; 60]), 0);
        assert_eq!(status, TxStatus::Accepted);
        assert_eq!(tx.ring.next_to_use(), 1);
        assert_eq!(hw.read(regs::tdt(0)), 1);
        let d = TxDataDesc::from(tx.ring.read_desc(0));
        assert_eq!(d.cmd_type_len & 0xFFFF, 60);
        assert_ne!(d.cmd_type_len & ADVTXD_DCMD_EOP, 0);
        assert_eq!(d.olinfo_status >> ADVTXD_PAYLEN_SHIFT, 60);
        tx.ring.free(&dma);
    }

    #[test]
    fn test_checksum_offload_emits_context_first() {
        let dma = IdentityDma::new();
        let hw = hw();
        let mut tx = ring(&dma, 256);
        let pkt = TxPacket::new(tcp_frame(100)).with_checksum().with_vlan(10);
        xmit_frame_ring(&hw, &mut tx, &dma, pkt, 0);
        assert_eq!(tx.ring.next_to_use(), 2);

        let ctx = TxContextDesc::from(tx.ring.read_desc(0));
        assert_eq!(ctx.vlan_macip_lens >> 16, 10);
        assert_eq!((ctx.vlan_macip_lens >> ADVTXD_MACLEN_SHIFT) & 0x7F, 14);
        assert_eq!(ctx.vlan_macip_lens & 0x1FF, 20);
        assert_ne!(ctx.type_tucmd_mlhl & ADVTXD_TUCMD_L4T_TCP, 0);
        assert_ne!(ctx.type_tucmd_mlhl & ADVTXD_TUCMD_IPV4, 0);

        let data = TxDataDesc::from(tx.ring.read_desc(1));
        assert_ne!(data.cmd_type_len & ADVTXD_DCMD_VLE, 0);
        assert_ne!(data.olinfo_status & (TXD_POPTS_TXSM << 8), 0);
        assert_eq!(tx.ring.buffer_info[0].next_to_watch, Some(1));
        tx.ring.free(&dma);
    }

    #[test]
    fn test_tso_context_and_pseudo_header_seed() {
        let dma = IdentityDma::new();
        let hw = hw();
        let mut tx = ring(&dma, 256);
        let pkt = TxPacket::new(tcp_frame(0)).with_frag(vec![0u8; 4000]).with_tso(1448);
        xmit_frame_ring(&hw, &mut tx, &dma, pkt, 0);
        assert_eq!(tx.ring.next_to_use(), 3);

        let ctx = TxContextDesc::from(tx.ring.read_desc(0));
        assert_eq!(ctx.mss_l4len_idx >> ADVTXD_MSS_SHIFT, 1448);
        assert_eq!((ctx.mss_l4len_idx >> ADVTXD_L4LEN_SHIFT) & 0xFF, 20);

        let d = TxDataDesc::from(tx.ring.read_desc(1));
        assert_ne!(d.cmd_type_len & ADVTXD_DCMD_TSE, 0);
        assert_eq!(d.olinfo_status >> ADVTXD_PAYLEN_SHIFT, 4000);

        let last = &tx.ring.buffer_info[2];
        assert_eq!(last.gso_segs, 3);
        assert_eq!(last.bytecount, 2 * 54 + 4054);
        let head = &last.packet.as_ref().unwrap().data;
        assert_eq!(&head[16..18], &[0, 0]);
        // 0xC0A8 + 0x0001 + 0xC0A8 + 0x0002 + 0x0006 = 0x18159, folded
        assert_eq!(u16::from_be_bytes([head[50], head[51]]), 0x815A);
        tx.ring.free(&dma);
    }

    #[test]
    fn test_map_failure_on_second_of_three_fragments_unwinds() {
        let dma = FaultyDma::failing_map(3);
        let hw = hw();
        let mut tx = ring(&dma, 256);
        xmit_frame_ring(&hw, &mut tx, &dma, TxPacket::new(vec![1u8; 60]), 0);
        let before = tx.ring.next_to_use();

        let pkt = TxPacket::new(vec![2u8; 100])
            .with_frag(vec![3u8; 100])
            .with_frag(vec![4u8; 100])
            .with_vlan(5);
        assert_eq!(xmit_frame_ring(&hw, &mut tx, &dma, pkt, 0), TxStatus::Accepted);

        assert_eq!(tx.ring.next_to_use(), before);
        assert_eq!(tx.ring.owned_entries(), 1);
        assert_eq!(tx.stats.tx_dma_failed, 1);
        assert_eq!(dma.mapped_outstanding(), 1);
        assert_eq!(hw.read(regs::tdt(0)), before as u32);
        tx.ring.free(&dma);
    }

    #[test]
    fn test_clean_reclaims_completed_packets_only() {
        let dma = IdentityDma::new();
        let hw = hw();
        let mut tx = ring(&dma, 256);
        for _ in 0..10 {
            xmit_frame_ring(&hw, &mut tx, &dma, TxPacket::new(vec![0u8; 100]), 0);
        }
        complete(&mut tx, 6);
        assert!(clean_tx_irq(&hw, &mut tx, &dma, &ctx(1)));
        assert_eq!(tx.ring.next_to_clean(), 6);
        assert_eq!(tx.stats.ring.packets, 6);
        assert_eq!(tx.stats.ring.bytes, 600);
        assert_eq!(tx.ring.itr, crate::ring::ItrSample { bytes: 600, packets: 6 });
        assert_eq!(tx.ring.owned_entries(), 4);
        tx.ring.free(&dma);
    }

    #[test]
    fn test_full_ring_reports_busy_and_counts() {
        let dma = IdentityDma::new();
        let hw = hw();
        let mut tx = ring(&dma, 80);
        let mut accepted = 0;
        while xmit_frame_ring(&hw, &mut tx, &dma, TxPacket::new(vec![0u8; 64]), 0)
            == TxStatus::Accepted
        {
            accepted += 1;
        }
        assert_eq!(accepted, 80 - 1 - DESC_NEEDED + 1);
        assert!(tx.is_stopped());
        assert_eq!(tx.stats.tx_busy, 1);
        tx.ring.free(&dma);
    }

    #[test]
    fn test_clean_wakes_stopped_queue() {
        let dma = IdentityDma::new();
        let hw = hw();
        let mut tx = ring(&dma, 80);
        while xmit_frame_ring(&hw, &mut tx, &dma, TxPacket::new(vec![0u8; 64]), 0)
            == TxStatus::Accepted
        {}
        let posted = tx.ring.next_to_use();
        complete(&mut tx, posted);
        clean_tx_irq(&hw, &mut tx, &dma, &ctx(1));
        assert!(!tx.is_stopped());
        assert_eq!(tx.stats.restart_queue, 1);
        tx.ring.free(&dma);
    }

    #[test]
    fn test_hang_detected_after_window() {
        let dma = IdentityDma::new();
        let hw = hw();
        let mut tx = ring(&dma, 256);
        xmit_frame_ring(&hw, &mut tx, &dma, TxPacket::new(vec![0u8; 64]), 100);

        tx.detect_tx_hung = true;
        clean_tx_irq(&hw, &mut tx, &dma, &ctx(600));
        assert!(!tx.hung);

        tx.detect_tx_hung = true;
        clean_tx_irq(&hw, &mut tx, &dma, &ctx(1_101));
        assert!(tx.hung && tx.is_stopped());
        assert_eq!(tx.stats.tx_hang, 1);
        tx.ring.free(&dma);
    }

    #[test]
    fn test_xoff_suppresses_hang() {
        let dma = IdentityDma::new();
        let hw = hw();
        hw.write(regs::STATUS, regs::STATUS_TXOFF);
        let mut tx = ring(&dma, 256);
        xmit_frame_ring(&hw, &mut tx, &dma, TxPacket::new(vec![0u8; 64]), 0);
        tx.detect_tx_hung = true;
        clean_tx_irq(&hw, &mut tx, &dma, &ctx(10_000));
        assert!(!tx.hung);
        tx.ring.free(&dma);
    }

    #[test]
    fn test_parse_headers_skips_inband_vlan() {
        let mut f = tcp_frame(0);
        for (k, b) in [0x81u8, 0x00, 0x00, 0x0A].into_iter().enumerate() {
            f.insert(12 + k, b);
        }
        let h = parse_headers(&f).unwrap();
        assert_eq!(h.network_offset, 18);
        assert_eq!(h.transport_offset(), 38);
        assert_eq!(h.protocol, IpProtocol::Tcp);
    }
}
