//! Receive address, multicast and VLAN filter tables.
//!
//! # Tables
//! ```text
//! RAR[0]                    PF MAC, pool = vfs
//! RAR[count - (vf + 1)]     VF MAC, pool = vf
//! MTA[hash >> 5] bit hash & 31
//! VFTA[vid >> 5] bit vid & 31
//! VLVF[i]                   vid | pool bits | enable   (82576+)
//! ```
//!
//! # Reference
//! Intel 82576 Datasheet, Section 7.1.1 (Receive Filtering)

use smoltcp::wire::EthernetAddress;

use crate::hw::{regs, Generation, Hw, RegisterAccess};

/// Receive mode requested by the stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxMode {
    /// Accept every frame.
    pub promisc: bool,
    /// Accept every multicast frame.
    pub allmulti: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// RECEIVE ADDRESSES
// ═══════════════════════════════════════════════════════════════════════════

/// Write `addr` into RAR entry `index`, steering matches to pool `qsel`.
pub fn rar_set_qsel<R: RegisterAccess>(hw: &Hw<R>, addr: &[u8; 6], index: u32, qsel: u32) {
    let rar_low = u32::from_le_bytes([addr[0], addr[1], addr[2], addr[3]]);
    let mut rar_high = u32::from(addr[4]) | (u32::from(addr[5]) << 8);

    rar_high |= regs::RAH_AV;
    if hw.generation() == Generation::I82575 {
        rar_high |= regs::RAH_POOL_1 * qsel;
    } else {
        rar_high |= regs::RAH_POOL_1 << qsel;
    }

    hw.write(regs::ral(index), rar_low);
    hw.flush();
    hw.write(regs::rah(index), rar_high);
    hw.flush();
}

/// RAR entry used by VF `vf`; VFs fill the table from the top down.
#[inline]
pub fn vf_rar_entry(generation: Generation, vf: u32) -> u32 {
    generation.rar_entry_count() - (vf + 1)
}

// ═══════════════════════════════════════════════════════════════════════════
// MULTICAST TABLE
// ═══════════════════════════════════════════════════════════════════════════

/// 12-bit MTA hash of a multicast address (filter type 0).
pub fn hash_mc_addr(addr: &EthernetAddress) -> u16 {
    let b = addr.as_bytes();
    (((b[4] as u16) >> 4) | ((b[5] as u16) << 4)) & 0x0FFF
}

/// Set the MTA bit for `hash`.
pub fn mta_set<R: RegisterAccess>(hw: &Hw<R>, hash: u16) {
    let hash_reg = ((hash as u32) >> 5) & (regs::MTA_REG_COUNT - 1);
    let hash_bit = (hash as u32) & 0x1F;
    hw.rmw_array(regs::MTA, hash_reg, |mta| mta | (1 << hash_bit));
    hw.flush();
}

/// Zero the whole MTA.
pub fn clear_mta<R: RegisterAccess>(hw: &Hw<R>) {
    for i in 0..regs::MTA_REG_COUNT {
        hw.write_array(regs::MTA, i, 0);
    }
    hw.flush();
}

/// Replace the MTA contents with `list`.
pub fn update_mc_addr_list<R: RegisterAccess>(hw: &Hw<R>, list: &[EthernetAddress]) {
    clear_mta(hw);
    for addr in list {
        mta_set(hw, hash_mc_addr(addr));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// VLAN FILTER TABLE
// ═══════════════════════════════════════════════════════════════════════════

/// Set or clear the VFTA bit for `vid`.
///
/// Returns `false` when the bit already had the requested value.
pub fn vfta_set<R: RegisterAccess>(hw: &Hw<R>, vid: u16, add: bool) -> bool {
    let index = ((vid as u32) >> 5) & 0x7F;
    let mask = 1 << ((vid as u32) & 0x1F);
    let mut changed = false;
    hw.rmw_array(regs::VFTA, index, |vfta| {
        changed = (vfta & mask != 0) != add;
        if add {
            vfta | mask
        } else {
            vfta & !mask
        }
    });
    changed
}

/// VFTA bit for `vid`.
pub fn vfta_test<R: RegisterAccess>(hw: &Hw<R>, vid: u16) -> bool {
    let index = ((vid as u32) >> 5) & 0x7F;
    hw.read_array(regs::VFTA, index) & (1 << ((vid as u32) & 0x1F)) != 0
}

/// Clear every VFTA and VLVF entry.
pub fn clear_vlan_filters<R: RegisterAccess>(hw: &Hw<R>) {
    for i in 0..regs::VFTA_REG_COUNT {
        hw.write_array(regs::VFTA, i, 0);
    }
    if hw.generation() >= Generation::I82576 {
        for i in 0..regs::VLVF_ARRAY_SIZE {
            hw.write_array(regs::VLVF, i, 0);
        }
    }
    hw.flush();
}

// ═══════════════════════════════════════════════════════════════════════════
// POOL OFFLOADS
// ═══════════════════════════════════════════════════════════════════════════

/// Default offloads for pool `vfn` (82576 and newer).
///
/// VF pools and the PF pool accept broadcast; only the PF pool hashes
/// across RSS queues.
pub fn set_vmolr<R: RegisterAccess>(hw: &Hw<R>, vfn: u32, vfs: u16, rss_queues: u16) {
    if hw.generation() < Generation::I82576 {
        return;
    }
    hw.rmw(regs::vmolr(vfn), |mut vmolr| {
        vmolr |= regs::VMOLR_AUPE | regs::VMOLR_STRVLAN;
        vmolr &= !(regs::VMOLR_BAM | regs::VMOLR_RSSE);
        if rss_queues > 1 && vfn == vfs as u32 {
            vmolr |= regs::VMOLR_RSSE;
        }
        if vfn <= vfs as u32 {
            vmolr |= regs::VMOLR_BAM;
        }
        vmolr
    });
}

// ═══════════════════════════════════════════════════════════════════════════
// RX MODE
// ═══════════════════════════════════════════════════════════════════════════

/// Program promiscuous bits, the PF address and the PF multicast list.
///
/// VF multicast hashes are restored separately by the mailbox.
pub fn set_rx_mode<R: RegisterAccess>(
    hw: &Hw<R>,
    mode: RxMode,
    mac: &EthernetAddress,
    mc_list: &[EthernetAddress],
    vfs: u16,
) {
    let mut rctl = hw.read(regs::RCTL) & !(regs::RCTL_UPE | regs::RCTL_MPE);
    let mut vmolr = 0;

    if mode.promisc {
        rctl |= regs::RCTL_UPE | regs::RCTL_MPE;
        vmolr |= regs::VMOLR_ROPE | regs::VMOLR_MPME;
    } else if mode.allmulti {
        rctl |= regs::RCTL_MPE;
        vmolr |= regs::VMOLR_MPME;
    }

    if !mode.promisc && !mode.allmulti {
        update_mc_addr_list(hw, mc_list);
        if !mc_list.is_empty() {
            vmolr |= regs::VMOLR_ROMPE;
        }
    }
    rar_set_qsel(hw, &mac.0, 0, vfs as u32);
    hw.write(regs::RCTL, rctl);

    if hw.generation() < Generation::I82576 {
        return;
    }
    hw.rmw(regs::vmolr(vfs as u32), |v| {
        vmolr | (v & !(regs::VMOLR_ROPE | regs::VMOLR_MPME | regs::VMOLR_ROMPE))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockRegisters;

    const MAC: [u8; 6] = [0x00, 0x1B, 0x21, 0xAA, 0xBB, 0xCC];

    #[test]
    fn test_rar_pool_select_per_generation() {
        let hw = Hw::new(MockRegisters::new(), Generation::I82576);
        rar_set_qsel(&hw, &MAC, 23, 2);
        assert_eq!(hw.read(regs::ral(23)), 0xAA21_1B00);
        assert_eq!(
            hw.read(regs::rah(23)),
            0xCCBB | regs::RAH_AV | (regs::RAH_POOL_1 << 2)
        );

        let hw = Hw::new(MockRegisters::new(), Generation::I82575);
        rar_set_qsel(&hw, &MAC, 15, 2);
        assert_eq!(
            hw.read(regs::rah(15)),
            0xCCBB | regs::RAH_AV | (regs::RAH_POOL_1 * 2)
        );
    }

    #[test]
    fn test_vf_entries_count_down_from_top() {
        assert_eq!(vf_rar_entry(Generation::I82576, 0), 23);
        assert_eq!(vf_rar_entry(Generation::I82576, 6), 17);
        assert_eq!(vf_rar_entry(Generation::I82575, 0), 15);
    }

    #[test]
    fn test_mta_hash_and_bit() {
        let addr = EthernetAddress([0x01, 0x00, 0x5E, 0x00, 0x00, 0xFB]);
        let hash = hash_mc_addr(&addr);
        assert_eq!(hash, 0xFB0);
        let hw = Hw::new(MockRegisters::new(), Generation::I82576);
        mta_set(&hw, hash);
        assert_eq!(hw.read_array(regs::MTA, 0x7D), 1 << 0x10);
        clear_mta(&hw);
        assert_eq!(hw.read_array(regs::MTA, 0x7D), 0);
    }

    #[test]
    fn test_vfta_set_reports_changes() {
        let hw = Hw::new(MockRegisters::new(), Generation::I82576);
        assert!(vfta_set(&hw, 100, true));
        assert!(!vfta_set(&hw, 100, true));
        assert_eq!(hw.read_array(regs::VFTA, 3), 1 << 4);
        assert!(vfta_test(&hw, 100));
        assert!(vfta_set(&hw, 100, false));
        assert!(!vfta_test(&hw, 100));
    }

    #[test]
    fn test_vmolr_defaults_per_pool() {
        let hw = Hw::new(MockRegisters::new(), Generation::I82576);
        hw.write(regs::vmolr(0), regs::VMOLR_RSSE);
        set_vmolr(&hw, 0, 2, 4);
        set_vmolr(&hw, 2, 2, 4);
        set_vmolr(&hw, 3, 2, 4);
        let vf = hw.read(regs::vmolr(0));
        assert_eq!(vf & regs::VMOLR_RSSE, 0);
        assert_ne!(vf & regs::VMOLR_BAM, 0);
        assert_ne!(vf & regs::VMOLR_STRVLAN, 0);
        assert_ne!(hw.read(regs::vmolr(2)) & regs::VMOLR_RSSE, 0);
        assert_eq!(hw.read(regs::vmolr(3)) & regs::VMOLR_BAM, 0);

        let old = Hw::new(MockRegisters::new(), Generation::I82575);
        set_vmolr(&old, 0, 0, 1);
        assert!(old.regs().writes_to(regs::vmolr(0)).is_empty());
    }

    #[test]
    fn test_promisc_sets_rctl_and_pf_vmolr() {
        let hw = Hw::new(MockRegisters::new(), Generation::I82576);
        let mac = EthernetAddress(MAC);
        set_rx_mode(
            &hw,
            RxMode {
                promisc: true,
                allmulti: false,
            },
            &mac,
            &[],
            2,
        );
        let rctl = hw.read(regs::RCTL);
        assert_ne!(rctl & regs::RCTL_UPE, 0);
        assert_ne!(rctl & regs::RCTL_MPE, 0);
        assert_ne!(hw.read(regs::vmolr(2)) & regs::VMOLR_ROPE, 0);
        assert_ne!(hw.read(regs::rah(0)) & (regs::RAH_POOL_1 << 2), 0);
    }

    #[test]
    fn test_multicast_list_enables_rompe() {
        let hw = Hw::new(MockRegisters::new(), Generation::I82580);
        let mac = EthernetAddress(MAC);
        hw.write(regs::vmolr(0), regs::VMOLR_MPME | regs::VMOLR_BAM);
        let list = [EthernetAddress([0x01, 0x00, 0x5E, 0x00, 0x00, 0x01])];
        set_rx_mode(&hw, RxMode::default(), &mac, &list, 0);
        let vmolr = hw.read(regs::vmolr(0));
        assert_eq!(vmolr & regs::VMOLR_MPME, 0);
        assert_ne!(vmolr & regs::VMOLR_ROMPE, 0);
        assert_ne!(vmolr & regs::VMOLR_BAM, 0);
        assert_eq!(hw.read(regs::RCTL) & regs::RCTL_MPE, 0);
    }
}
