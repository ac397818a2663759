//! Intel 82575/82576/82580 register definitions.
//!
//! Register offsets and the bit definitions the driver core relies on.
//! Queue and vector tables are arrays; use the helper functions for the
//! per-index offset.
//!
//! # Reference
//! Intel 82576 Datasheet, Section 8 (Programming Interface)

// ═══════════════════════════════════════════════════════════════════════════
// DEVICE CONTROL & STATUS
// ═══════════════════════════════════════════════════════════════════════════

/// Device Control Register.
pub const CTRL: u32 = 0x0000;
/// Device Status Register (RO).
pub const STATUS: u32 = 0x0008;
/// Extended Device Control Register.
pub const CTRL_EXT: u32 = 0x0018;

/// STATUS: full duplex.
pub const STATUS_FD: u32 = 1 << 0;
/// STATUS: link up.
pub const STATUS_LU: u32 = 1 << 1;
/// STATUS: transmission paused (XOFF received).
pub const STATUS_TXOFF: u32 = 1 << 4;
/// STATUS: 100 Mbps.
pub const STATUS_SPEED_100: u32 = 1 << 6;
/// STATUS: 1000 Mbps.
pub const STATUS_SPEED_1000: u32 = 1 << 7;

/// CTRL_EXT: clear PBA on read (82575).
pub const CTRL_EXT_PBA_CLR: u32 = 0x8000_0000;
/// CTRL_EXT: extended interrupt auto-mask enable (82575).
pub const CTRL_EXT_EIAME: u32 = 0x0100_0000;
/// CTRL_EXT: interrupt cause auto-clear (82575).
pub const CTRL_EXT_IRCA: u32 = 0x0000_0001;

// ═══════════════════════════════════════════════════════════════════════════
// INTERRUPT REGISTERS
// ═══════════════════════════════════════════════════════════════════════════

/// Interrupt Cause Read (RC).
pub const ICR: u32 = 0x1500;
/// Interrupt Cause Set (WO).
pub const ICS: u32 = 0x1504;
/// Interrupt Mask Set/Read.
pub const IMS: u32 = 0x1508;
/// Interrupt Mask Clear (WO).
pub const IMC: u32 = 0x150C;
/// Interrupt Acknowledge Auto Mask.
pub const IAM: u32 = 0x1510;
/// General Purpose Interrupt Enable.
pub const GPIE: u32 = 0x1514;
/// Extended Interrupt Cause Set.
pub const EICS: u32 = 0x1520;
/// Extended Interrupt Mask Set.
pub const EIMS: u32 = 0x1524;
/// Extended Interrupt Mask Clear.
pub const EIMC: u32 = 0x1528;
/// Extended Interrupt Auto Clear.
pub const EIAC: u32 = 0x152C;
/// Extended Interrupt Auto Mask.
pub const EIAM: u32 = 0x1530;
/// Extended Interrupt Cause Read.
pub const EICR: u32 = 0x1580;
/// MSI-X bitmap table base (82575).
pub const MSIXBM0: u32 = 0x1600;
/// Extended Interrupt Throttle table base.
pub const EITR0: u32 = 0x1680;
/// Interrupt Vector Allocation table base (82576 and newer).
pub const IVAR0: u32 = 0x1700;
/// IVAR for "other" causes.
pub const IVAR_MISC: u32 = 0x1740;
/// Mailbox VF interrupt mask.
pub const MBVFIMR: u32 = 0x0C10;

/// Mask used to clear every legacy interrupt.
pub const INT_MASK_ALL: u32 = 0xFFFF_FFFF;
/// IMS: link status change.
pub const IMS_LSC: u32 = 0x0000_0004;
/// IMS: RX sequence error.
pub const IMS_RXSEQ: u32 = 0x0000_0008;
/// IMS: RX descriptor minimum threshold.
pub const IMS_RXDMT0: u32 = 0x0000_0010;
/// IMS: RX timer.
pub const IMS_RXT0: u32 = 0x0000_0080;
/// IMS: VF mailbox.
pub const IMS_VMMB: u32 = 0x0000_0100;
/// IMS: DMA out of sync.
pub const IMS_DOUTSYNC: u32 = 0x1000_0000;
/// IMS: device reset asserted (82580).
pub const IMS_DRSTA: u32 = 0x4000_0000;
/// Legacy/MSI enable mask.
pub const IMS_ENABLE_MASK: u32 = IMS_RXT0 | IMS_LSC | IMS_RXSEQ | IMS_RXDMT0 | IMS_DOUTSYNC;

/// ICR: interrupt asserted by this device (legacy).
pub const ICR_INT_ASSERTED: u32 = 0x8000_0000;

/// EICR: first RX queue cause bit (82575).
pub const EICR_RX_QUEUE0: u32 = 0x0000_0001;
/// EICR: first TX queue cause bit (82575).
pub const EICR_TX_QUEUE0: u32 = 0x0000_0100;
/// EIMS: "other" cause bit (82575).
pub const EIMS_OTHER: u32 = 0x8000_0000;

/// GPIE: non-selective interrupt clear on read.
pub const GPIE_NSICR: u32 = 0x0000_0001;
/// GPIE: multiple-vector MSI-X mode.
pub const GPIE_MSIX_MODE: u32 = 0x0000_0010;
/// GPIE: extended interrupt auto-mask enable.
pub const GPIE_EIAME: u32 = 0x4000_0000;
/// GPIE: PBA support.
pub const GPIE_PBA: u32 = 0x8000_0000;

/// IVAR byte valid bit.
pub const IVAR_VALID: u32 = 0x80;

/// EITR: counter ignore (82576 and newer).
pub const EITR_CNT_IGNR: u32 = 0x8000_0000;
/// EITR interval field mask.
pub const EITR_INTERVAL_MASK: u32 = 0x7FFC;

// ═══════════════════════════════════════════════════════════════════════════
// RECEIVE / TRANSMIT CONTROL
// ═══════════════════════════════════════════════════════════════════════════

/// Receive Control Register.
pub const RCTL: u32 = 0x0100;
/// Transmit Control Register.
pub const TCTL: u32 = 0x0400;
/// Receive Long Packet Maximum Length.
pub const RLPML: u32 = 0x5004;

/// RCTL: receiver enable.
pub const RCTL_EN: u32 = 1 << 1;
/// RCTL: unicast promiscuous.
pub const RCTL_UPE: u32 = 1 << 3;
/// RCTL: multicast promiscuous.
pub const RCTL_MPE: u32 = 1 << 4;
/// RCTL: long packet enable.
pub const RCTL_LPE: u32 = 1 << 5;
/// RCTL: broadcast accept.
pub const RCTL_BAM: u32 = 1 << 15;
/// RCTL: strip CRC.
pub const RCTL_SECRC: u32 = 1 << 26;

/// TCTL: transmitter enable.
pub const TCTL_EN: u32 = 1 << 1;
/// TCTL: pad short packets.
pub const TCTL_PSP: u32 = 1 << 3;

// ═══════════════════════════════════════════════════════════════════════════
// PER-QUEUE REGISTERS
// ═══════════════════════════════════════════════════════════════════════════

/// RX descriptor base address low, queue `n`.
#[inline]
pub const fn rdbal(n: u16) -> u32 {
    if n < 4 {
        0x02800 + (n as u32) * 0x100
    } else {
        0x0C000 + (n as u32) * 0x40
    }
}

/// RX descriptor base address high, queue `n`.
#[inline]
pub const fn rdbah(n: u16) -> u32 {
    rdbal(n) + 0x04
}

/// RX descriptor ring length in bytes, queue `n`.
#[inline]
pub const fn rdlen(n: u16) -> u32 {
    rdbal(n) + 0x08
}

/// Split and replication receive control, queue `n`.
#[inline]
pub const fn srrctl(n: u16) -> u32 {
    rdbal(n) + 0x0C
}

/// RX descriptor head, queue `n`.
#[inline]
pub const fn rdh(n: u16) -> u32 {
    rdbal(n) + 0x10
}

/// RX descriptor tail, queue `n`.
#[inline]
pub const fn rdt(n: u16) -> u32 {
    rdbal(n) + 0x18
}

/// RX descriptor control, queue `n`.
#[inline]
pub const fn rxdctl(n: u16) -> u32 {
    rdbal(n) + 0x28
}

/// TX descriptor base address low, queue `n`.
#[inline]
pub const fn tdbal(n: u16) -> u32 {
    if n < 4 {
        0x03800 + (n as u32) * 0x100
    } else {
        0x0E000 + (n as u32) * 0x40
    }
}

/// TX descriptor base address high, queue `n`.
#[inline]
pub const fn tdbah(n: u16) -> u32 {
    tdbal(n) + 0x04
}

/// TX descriptor ring length in bytes, queue `n`.
#[inline]
pub const fn tdlen(n: u16) -> u32 {
    tdbal(n) + 0x08
}

/// TX descriptor head, queue `n`.
#[inline]
pub const fn tdh(n: u16) -> u32 {
    tdbal(n) + 0x10
}

/// TX descriptor tail, queue `n`.
#[inline]
pub const fn tdt(n: u16) -> u32 {
    tdbal(n) + 0x18
}

/// TX descriptor control, queue `n`.
#[inline]
pub const fn txdctl(n: u16) -> u32 {
    tdbal(n) + 0x28
}

/// RXDCTL/TXDCTL: queue enable.
pub const XDCTL_QUEUE_ENABLE: u32 = 0x0200_0000;

/// SRRCTL: packet buffer size shift (1 KB units).
pub const SRRCTL_BSIZEPKT_SHIFT: u32 = 10;
/// SRRCTL: advanced one-buffer descriptors.
pub const SRRCTL_DESCTYPE_ADV_ONEBUF: u32 = 0x0200_0000;
/// SRRCTL: drop packets when no descriptors are available.
pub const SRRCTL_DROP_EN: u32 = 0x8000_0000;

// ═══════════════════════════════════════════════════════════════════════════
// FILTER TABLES
// ═══════════════════════════════════════════════════════════════════════════

/// Multicast Table Array base.
pub const MTA: u32 = 0x5200;
/// Multicast table register count.
pub const MTA_REG_COUNT: u32 = 128;
/// VLAN Filter Table Array base.
pub const VFTA: u32 = 0x5600;
/// VLAN filter table register count.
pub const VFTA_REG_COUNT: u32 = 128;

/// Receive Address Low, entry `n`.
#[inline]
pub const fn ral(n: u32) -> u32 {
    0x5400 + n * 8
}

/// Receive Address High, entry `n`.
#[inline]
pub const fn rah(n: u32) -> u32 {
    0x5404 + n * 8
}

/// RAH: address valid.
pub const RAH_AV: u32 = 0x8000_0000;
/// RAH: pool select, first pool.
pub const RAH_POOL_1: u32 = 0x0004_0000;

/// VLAN VM Filter base.
pub const VLVF: u32 = 0x5D00;
/// VLVF entry count.
pub const VLVF_ARRAY_SIZE: u32 = 32;
/// VLVF: VLAN id field.
pub const VLVF_VLANID_MASK: u32 = 0x0000_0FFF;
/// VLVF: pool select shift.
pub const VLVF_POOLSEL_SHIFT: u32 = 12;
/// VLVF: pool select field.
pub const VLVF_POOLSEL_MASK: u32 = 0xFF << VLVF_POOLSEL_SHIFT;
/// VLVF: entry enabled.
pub const VLVF_VLANID_ENABLE: u32 = 0x8000_0000;

/// VM Offload Register, pool `n`.
#[inline]
pub const fn vmolr(n: u32) -> u32 {
    0x5AD0 + n * 4
}

/// VMOLR: long packet maximum length.
pub const VMOLR_RLPML_MASK: u32 = 0x3FFF;
/// VMOLR: long packet enable.
pub const VMOLR_LPE: u32 = 0x0001_0000;
/// VMOLR: RSS enable.
pub const VMOLR_RSSE: u32 = 0x0002_0000;
/// VMOLR: accept untagged packets.
pub const VMOLR_AUPE: u32 = 0x0100_0000;
/// VMOLR: accept MTA-matched multicast.
pub const VMOLR_ROMPE: u32 = 0x0200_0000;
/// VMOLR: accept UTA-matched unicast.
pub const VMOLR_ROPE: u32 = 0x0400_0000;
/// VMOLR: accept broadcast.
pub const VMOLR_BAM: u32 = 0x0800_0000;
/// VMOLR: multicast promiscuous.
pub const VMOLR_MPME: u32 = 0x1000_0000;
/// VMOLR: strip VLAN tags.
pub const VMOLR_STRVLAN: u32 = 0x4000_0000;

// ═══════════════════════════════════════════════════════════════════════════
// VIRTUALIZATION
// ═══════════════════════════════════════════════════════════════════════════

/// VF receive enables.
pub const VFRE: u32 = 0x0C8C;
/// VF transmit enables.
pub const VFTE: u32 = 0x0C90;
/// VF function level reset events.
pub const VFLRE: u32 = 0x0C88;
/// Mailbox VF interrupt cause.
pub const MBVFICR: u32 = 0x0C80;
/// MBVFICR: request from VF 0.
pub const MBVFICR_VFREQ_VF1: u32 = 0x0000_0001;
/// MBVFICR: ack from VF 0.
pub const MBVFICR_VFACK_VF1: u32 = 0x0001_0000;

/// PF-to-VF mailbox control, VF `n`.
#[inline]
pub const fn p2vmailbox(n: u32) -> u32 {
    0x0C00 + n * 4
}

/// VF mailbox memory base, VF `n`.
#[inline]
pub const fn vmbmem(n: u32) -> u32 {
    0x0800 + n * 64
}

/// P2VMAILBOX: send message to VF.
pub const P2VMAILBOX_STS: u32 = 0x0000_0001;
/// P2VMAILBOX: acknowledge VF message.
pub const P2VMAILBOX_ACK: u32 = 0x0000_0002;
/// P2VMAILBOX: VF owns the buffer.
pub const P2VMAILBOX_VFU: u32 = 0x0000_0004;
/// P2VMAILBOX: PF owns the buffer.
pub const P2VMAILBOX_PFU: u32 = 0x0000_0008;

// ═══════════════════════════════════════════════════════════════════════════
// LOW LATENCY INTERRUPTS
// ═══════════════════════════════════════════════════════════════════════════

/// Immediate Interrupt RX, filter `n`.
#[inline]
pub const fn imir(n: u32) -> u32 {
    0x5A80 + n * 4
}

/// Immediate Interrupt RX extended, filter `n`.
#[inline]
pub const fn imirext(n: u32) -> u32 {
    0x5AA0 + n * 4
}

/// IMIR: port match enable.
pub const IMIR_PORT_IM_EN: u32 = 0x0001_0000;
/// IMIR: bypass port match.
pub const IMIR_PORT_BP: u32 = 0x0002_0000;
/// IMIREXT: bypass size match.
pub const IMIREXT_SIZE_BP: u32 = 0x0000_1000;
/// IMIREXT: match TCP PSH.
pub const IMIREXT_CTRL_PSH: u32 = 0x0000_8000;
/// IMIREXT: bypass control bits.
pub const IMIREXT_CTRL_BP: u32 = 0x0008_0000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_banks_split_at_four() {
        assert_eq!(rdbal(0), 0x2800);
        assert_eq!(rdbal(3), 0x2B00);
        assert_eq!(rdbal(4), 0xC100);
        assert_eq!(tdt(1), 0x3918);
        assert_eq!(txdctl(5), 0xE168);
    }

    #[test]
    fn test_filter_offsets() {
        assert_eq!(rah(23), 0x5404 + 23 * 8);
        assert_eq!(vmolr(7), 0x5AEC);
        assert_eq!(vmbmem(1), 0x0840);
    }
}
