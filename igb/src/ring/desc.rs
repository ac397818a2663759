//! Advanced descriptor layouts.
//!
//! Every descriptor is 16 bytes. The same slot is read by hardware in
//! one format and written back in another, so each format here is a
//! view over a [`RawDesc`].
//!
//! # Reference
//! Intel 82576 Datasheet, Sections 7.1.5 (RX) and 7.2.3 (TX)

use bit_field::BitField;

/// Size of a single descriptor in bytes.
pub const DESC_SIZE: usize = 16;

// ═══════════════════════════════════════════════════════════════════════════
// TX BITS
// ═══════════════════════════════════════════════════════════════════════════

/// Context descriptor type.
pub const ADVTXD_DTYP_CTXT: u32 = 0x0020_0000;
/// Data descriptor type.
pub const ADVTXD_DTYP_DATA: u32 = 0x0030_0000;
/// End of packet.
pub const ADVTXD_DCMD_EOP: u32 = 0x0100_0000;
/// Insert FCS.
pub const ADVTXD_DCMD_IFCS: u32 = 0x0200_0000;
/// Report status.
pub const ADVTXD_DCMD_RS: u32 = 0x0800_0000;
/// Extended descriptor.
pub const ADVTXD_DCMD_DEXT: u32 = 0x2000_0000;
/// Insert VLAN tag.
pub const ADVTXD_DCMD_VLE: u32 = 0x4000_0000;
/// TCP segmentation enable.
pub const ADVTXD_DCMD_TSE: u32 = 0x8000_0000;
/// Bits set on the last data descriptor of a packet.
pub const ADVTXD_DCMD_LAST: u32 = ADVTXD_DCMD_EOP | ADVTXD_DCMD_RS;
/// Request a transmit timestamp.
pub const ADVTXD_MAC_TSTAMP: u32 = 0x0008_0000;

/// olinfo: payload length shift.
pub const ADVTXD_PAYLEN_SHIFT: u32 = 14;
/// Context: MAC header length shift.
pub const ADVTXD_MACLEN_SHIFT: u32 = 9;
/// Context: MSS shift.
pub const ADVTXD_MSS_SHIFT: u32 = 16;
/// Context: L4 header length shift.
pub const ADVTXD_L4LEN_SHIFT: u32 = 8;
/// Context: IPv4 packet.
pub const ADVTXD_TUCMD_IPV4: u32 = 0x0000_0400;
/// Context: L4 is TCP.
pub const ADVTXD_TUCMD_L4T_TCP: u32 = 0x0000_0800;
/// Context: L4 is SCTP.
pub const ADVTXD_TUCMD_L4T_SCTP: u32 = 0x0000_1000;

/// POPTS: insert IP checksum.
pub const TXD_POPTS_IXSM: u32 = 0x01;
/// POPTS: insert TCP/UDP checksum.
pub const TXD_POPTS_TXSM: u32 = 0x02;
/// Write-back: descriptor done.
pub const TXD_STAT_DD: u32 = 0x0000_0001;

// ═══════════════════════════════════════════════════════════════════════════
// RX BITS
// ═══════════════════════════════════════════════════════════════════════════

/// Descriptor done.
pub const RXD_STAT_DD: u32 = 0x01;
/// End of packet.
pub const RXD_STAT_EOP: u32 = 0x02;
/// Ignore checksum indication.
pub const RXD_STAT_IXSM: u32 = 0x04;
/// VLAN tag stripped into the descriptor.
pub const RXD_STAT_VP: u32 = 0x08;
/// UDP checksum calculated.
pub const RXD_STAT_UDPCS: u32 = 0x10;
/// TCP checksum calculated.
pub const RXD_STAT_TCPCS: u32 = 0x20;

/// CRC error.
pub const RXDEXT_STATERR_CE: u32 = 0x0100_0000;
/// Symbol error.
pub const RXDEXT_STATERR_SE: u32 = 0x0200_0000;
/// Sequence error.
pub const RXDEXT_STATERR_SEQ: u32 = 0x0400_0000;
/// Carrier extension error.
pub const RXDEXT_STATERR_CXE: u32 = 0x1000_0000;
/// L4 (TCP/UDP/SCTP) checksum error.
pub const RXDEXT_STATERR_TCPE: u32 = 0x2000_0000;
/// IP checksum error.
pub const RXDEXT_STATERR_IPE: u32 = 0x4000_0000;
/// RX data error.
pub const RXDEXT_STATERR_RXE: u32 = 0x8000_0000;
/// Errors that invalidate the frame.
pub const RXDEXT_ERR_FRAME_ERR_MASK: u32 = RXDEXT_STATERR_CE
    | RXDEXT_STATERR_SE
    | RXDEXT_STATERR_SEQ
    | RXDEXT_STATERR_CXE
    | RXDEXT_STATERR_RXE;

// ═══════════════════════════════════════════════════════════════════════════
// RAW
// ═══════════════════════════════════════════════════════════════════════════

/// One 16-byte descriptor slot as two little-endian quadwords.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawDesc {
    /// Bytes 0..8.
    pub lo: u64,
    /// Bytes 8..16.
    pub hi: u64,
}

impl RawDesc {
    #[inline]
    fn dword(&self, n: usize) -> u32 {
        let q = if n < 2 { self.lo } else { self.hi };
        let shift = (n % 2) * 32;
        q.get_bits(shift..shift + 32) as u32
    }

    #[inline]
    fn set_dword(&mut self, n: usize, value: u32) {
        let q = if n < 2 { &mut self.lo } else { &mut self.hi };
        let shift = (n % 2) * 32;
        q.set_bits(shift..shift + 32, value as u64);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TX FORMATS
// ═══════════════════════════════════════════════════════════════════════════

/// Advanced TX data descriptor (read format).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxDataDesc {
    /// Buffer bus address.
    pub buffer_addr: u64,
    /// DTYP, DCMD and buffer length.
    pub cmd_type_len: u32,
    /// POPTS, context index and payload length.
    pub olinfo_status: u32,
}

impl From<TxDataDesc> for RawDesc {
    fn from(d: TxDataDesc) -> Self {
        let mut raw = RawDesc {
            lo: d.buffer_addr,
            hi: 0,
        };
        raw.set_dword(2, d.cmd_type_len);
        raw.set_dword(3, d.olinfo_status);
        raw
    }
}

impl From<RawDesc> for TxDataDesc {
    fn from(raw: RawDesc) -> Self {
        Self {
            buffer_addr: raw.lo,
            cmd_type_len: raw.dword(2),
            olinfo_status: raw.dword(3),
        }
    }
}

/// Advanced TX context descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxContextDesc {
    /// VLAN tag, MAC header length, IP header length.
    pub vlan_macip_lens: u32,
    /// Unused by this driver; always zero.
    pub seqnum_seed: u32,
    /// DTYP, DEXT and TUCMD.
    pub type_tucmd_mlhl: u32,
    /// MSS, L4 header length, context index.
    pub mss_l4len_idx: u32,
}

impl From<TxContextDesc> for RawDesc {
    fn from(d: TxContextDesc) -> Self {
        let mut raw = RawDesc::default();
        raw.set_dword(0, d.vlan_macip_lens);
        raw.set_dword(1, d.seqnum_seed);
        raw.set_dword(2, d.type_tucmd_mlhl);
        raw.set_dword(3, d.mss_l4len_idx);
        raw
    }
}

impl From<RawDesc> for TxContextDesc {
    fn from(raw: RawDesc) -> Self {
        Self {
            vlan_macip_lens: raw.dword(0),
            seqnum_seed: raw.dword(1),
            type_tucmd_mlhl: raw.dword(2),
            mss_l4len_idx: raw.dword(3),
        }
    }
}

/// TX write-back status (dword 3).
#[inline]
pub fn tx_wb_status(raw: &RawDesc) -> u32 {
    raw.dword(3)
}

/// Clear TX write-back status.
#[inline]
pub fn clear_tx_wb_status(raw: &mut RawDesc) {
    raw.set_dword(3, 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// RX FORMATS
// ═══════════════════════════════════════════════════════════════════════════

/// Advanced RX descriptor (read format).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxReadDesc {
    /// Packet buffer bus address.
    pub pkt_addr: u64,
    /// Header buffer bus address (zero in one-buffer mode).
    pub hdr_addr: u64,
}

impl From<RxReadDesc> for RawDesc {
    fn from(d: RxReadDesc) -> Self {
        RawDesc {
            lo: d.pkt_addr,
            hi: d.hdr_addr,
        }
    }
}

/// Advanced RX descriptor (write-back format, upper quadword).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxWriteback {
    /// Extended status and error bits.
    pub status_error: u32,
    /// Bytes written to the buffer.
    pub length: u16,
    /// Stripped VLAN tag when `RXD_STAT_VP` is set.
    pub vlan: u16,
}

impl From<RawDesc> for RxWriteback {
    fn from(raw: RawDesc) -> Self {
        Self {
            status_error: raw.hi.get_bits(0..32) as u32,
            length: raw.hi.get_bits(32..48) as u16,
            vlan: raw.hi.get_bits(48..64) as u16,
        }
    }
}

impl From<RxWriteback> for RawDesc {
    fn from(wb: RxWriteback) -> Self {
        let mut hi = 0u64;
        hi.set_bits(0..32, wb.status_error as u64);
        hi.set_bits(32..48, wb.length as u64);
        hi.set_bits(48..64, wb.vlan as u64);
        RawDesc { lo: 0, hi }
    }
}

/// Clear RX write-back status so a stale DD is never seen again.
#[inline]
pub fn clear_rx_wb_status(raw: &mut RawDesc) {
    raw.hi.set_bits(0..32, 0);
}
