//! SR-IOV PF/VF mailbox control plane.
//!
//! Each VF talks to the PF through a 16-word mailbox. The PF keeps one
//! [`VfRecord`] per VF and answers every request with ACK or NACK.
//!
//! # VF States
//! ```text
//!            reset line / VF_RESET msg
//!   RESET ─────────────────────────────► CTS
//!     ▲      (ACK + assigned MAC)          │
//!     └─────────── function reset ─────────┘
//! ```
//! Requests other than `VF_RESET` from a VF in RESET get a NACK, at most one
//! per NACK interval.
//!
//! # Word 0
//! ```text
//!  31   30   29   28..24   23..16   15..0
//! ACK  NACK CTS   ----     info     msg type
//! ```
//!
//! # Reference
//! Intel 82576 Datasheet, Section 7.8.2.9 (PF/VF Mailbox)

pub mod transport;

use alloc::vec::Vec;

use bitflags::bitflags;
use log::{debug, info, warn};
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use smoltcp::wire::EthernetAddress;

use crate::error::{IgbError, Result};
use crate::filter;
use crate::hw::{regs, Generation, Hw, RegisterAccess};
use crate::time::time_after;

pub use transport::{MailboxTransport, PfMailbox};

// ═══════════════════════════════════════════════════════════════════════════
// WIRE FORMAT
// ═══════════════════════════════════════════════════════════════════════════

/// Mailbox size in 32-bit words.
pub const VFMAILBOX_SIZE: usize = 16;

/// Message processed successfully.
pub const VT_MSGTYPE_ACK: u32 = 0x8000_0000;
/// Message rejected.
pub const VT_MSGTYPE_NACK: u32 = 0x4000_0000;
/// PF is clear to send.
pub const VT_MSGTYPE_CTS: u32 = 0x2000_0000;
/// Info field shift.
pub const VT_MSGINFO_SHIFT: u32 = 16;
/// Info field.
pub const VT_MSGINFO_MASK: u32 = 0xFF << VT_MSGINFO_SHIFT;

/// VF requests a reset handshake.
pub const VF_RESET: u32 = 0x01;
/// VF sets its MAC address.
pub const VF_SET_MAC_ADDR: u32 = 0x02;
/// VF sets its multicast hash list.
pub const VF_SET_MULTICAST: u32 = 0x03;
/// VF adds or removes a VLAN.
pub const VF_SET_VLAN: u32 = 0x04;
/// VF sets its maximum frame size.
pub const VF_SET_LPE: u32 = 0x05;
/// VF sets promiscuous modes.
pub const VF_SET_PROMISC: u32 = 0x06;

/// SET_PROMISC info: unicast promiscuous.
pub const VF_SET_PROMISC_UNICAST: u32 = 0x01 << VT_MSGINFO_SHIFT;
/// SET_PROMISC info: multicast promiscuous.
pub const VF_SET_PROMISC_MULTICAST: u32 = 0x02 << VT_MSGINFO_SHIFT;

/// PF-initiated control message (ping).
pub const PF_CONTROL_MSG: u32 = 0x0100;

/// Multicast hashes a VF may register before falling back to match-all.
pub const MAX_VF_MC_HASHES: usize = 30;

/// VLAN tag length added to a VF's frame limit while it has VLANs.
const VLAN_TAG_SIZE: u32 = 4;

/// Message type of word 0.
#[inline]
pub fn msg_type(word: u32) -> u32 {
    word & 0xFFFF
}

/// Info field of word 0.
#[inline]
pub fn msg_info(word: u32) -> u32 {
    (word & VT_MSGINFO_MASK) >> VT_MSGINFO_SHIFT
}

/// Pack a MAC into payload words, low byte first.
pub fn mac_to_words(mac: &EthernetAddress) -> [u32; 2] {
    let b = mac.as_bytes();
    [
        u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        u32::from_le_bytes([b[4], b[5], 0, 0]),
    ]
}

/// Unpack a MAC from payload words.
pub fn mac_from_words(w1: u32, w2: u32) -> EthernetAddress {
    let lo = w1.to_le_bytes();
    let hi = w2.to_le_bytes();
    EthernetAddress([lo[0], lo[1], lo[2], lo[3], hi[0], hi[1]])
}

// ═══════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════

/// Mailbox errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    /// PF could not take ownership of the mailbox memory.
    LockFailed,
    /// Message longer than the mailbox.
    TooLong {
        /// Words requested.
        words: usize,
    },
    /// VF index out of range.
    InvalidVf {
        /// Requested VF.
        vf: u32,
    },
    /// MAC is multicast or all zero.
    InvalidMac,
    /// MAC was set by the PF administrator.
    MacLocked,
    /// VLAN pool table missing (82575) or VMDq disabled.
    VlanUnsupported,
    /// No free VLVF entry.
    VlanTableFull,
    /// Remove of a VLAN no entry holds.
    VlanNotFound,
    /// Request carried flags the PF does not support.
    UnsupportedFlags {
        /// Remaining info bits.
        info: u32,
    },
    /// Unknown message type.
    UnknownMessage {
        /// Word 0 as received.
        msg: u32,
    },
}

impl core::fmt::Display for MailboxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::LockFailed => write!(f, "Mailbox lock not obtained"),
            Self::TooLong { words } => write!(f, "Message of {} words too long", words),
            Self::InvalidVf { vf } => write!(f, "Invalid VF {}", vf),
            Self::InvalidMac => write!(f, "Invalid MAC address"),
            Self::MacLocked => write!(f, "MAC address set by PF"),
            Self::VlanUnsupported => write!(f, "VLAN pool filtering unavailable"),
            Self::VlanTableFull => write!(f, "VLAN filter table full"),
            Self::VlanNotFound => write!(f, "VLAN not in filter table"),
            Self::UnsupportedFlags { info } => write!(f, "Unsupported flags {:#x}", info),
            Self::UnknownMessage { msg } => write!(f, "Unhandled Msg {:08x}", msg),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// VF RECORD
// ═══════════════════════════════════════════════════════════════════════════

bitflags! {
    /// Per-VF state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VfFlags: u32 {
        /// Reset handshake done; configuration requests accepted.
        const CTS = 0x0000_0001;
        /// Unicast promiscuous.
        const UNI_PROMISC = 0x0000_0002;
        /// Multicast promiscuous.
        const MULTI_PROMISC = 0x0000_0004;
        /// MAC assigned by the PF; the VF may not change it.
        const PF_SET_MAC = 0x0000_0008;
    }
}

/// PF-side state of one VF.
#[derive(Debug, Clone)]
pub struct VfRecord {
    /// Assigned MAC.
    pub mac: EthernetAddress,
    /// Stored multicast hashes.
    pub mc_hashes: [u16; MAX_VF_MC_HASHES],
    /// Hash count as requested; above 30 means match-all.
    pub num_mc_hashes: u16,
    /// VLANs this VF belongs to.
    pub vlans_enabled: u16,
    /// State flags.
    pub flags: VfFlags,
    /// Last NACK sent; `None` until the first.
    pub last_nack: Option<u64>,
}

impl VfRecord {
    fn new(mac: EthernetAddress) -> Self {
        Self {
            mac,
            mc_hashes: [0; MAX_VF_MC_HASHES],
            num_mc_hashes: 0,
            vlans_enabled: 0,
            flags: VfFlags::empty(),
            last_nack: None,
        }
    }

    /// Reset handshake completed.
    #[inline]
    pub fn is_cts(&self) -> bool {
        self.flags.contains(VfFlags::CTS)
    }

    /// Hashes actually stored.
    #[inline]
    pub fn stored_hashes(&self) -> &[u16] {
        let n = (self.num_mc_hashes as usize).min(MAX_VF_MC_HASHES);
        &self.mc_hashes[..n]
    }

    fn match_all_multicast(&self) -> bool {
        self.num_mc_hashes as usize > MAX_VF_MC_HASHES
            || self.flags.contains(VfFlags::MULTI_PROMISC)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// VF MAILBOX
// ═══════════════════════════════════════════════════════════════════════════

/// VF table plus the handlers behind every mailbox message.
pub struct VfMailbox {
    vfs: Vec<VfRecord>,
    rng: ChaCha20Rng,
    nack_interval: u64,
    vmdq_pools: u16,
    /// VF multicast state changed; the MTA must be rebuilt.
    rx_mode_dirty: bool,
}

impl VfMailbox {
    /// Create `num_vfs` records with random placeholder MACs.
    pub fn new(num_vfs: u16, vmdq_pools: u16, seed: u64, nack_interval: u64) -> Result<Self> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut vfs = Vec::new();
        vfs.try_reserve_exact(num_vfs as usize)
            .map_err(|_| IgbError::OutOfMemory)?;
        for _ in 0..num_vfs {
            vfs.push(VfRecord::new(random_ether_addr(&mut rng)));
        }
        Ok(Self {
            vfs,
            rng,
            nack_interval,
            vmdq_pools,
            rx_mode_dirty: false,
        })
    }

    /// Number of VFs.
    #[inline]
    pub fn num_vfs(&self) -> u16 {
        self.vfs.len() as u16
    }

    /// Record of VF `vf`.
    pub fn vf(&self, vf: u32) -> Option<&VfRecord> {
        self.vfs.get(vf as usize)
    }

    /// Take and clear the MTA-rebuild request.
    pub fn take_rx_mode_dirty(&mut self) -> bool {
        core::mem::take(&mut self.rx_mode_dirty)
    }

    fn record(&mut self, vf: u32) -> core::result::Result<&mut VfRecord, MailboxError> {
        self.vfs
            .get_mut(vf as usize)
            .ok_or(MailboxError::InvalidVf { vf })
    }

    fn nack_due(&self, vf: u32, now: u64) -> bool {
        match self.vfs.get(vf as usize).and_then(|r| r.last_nack) {
            Some(last) => time_after(now, last, self.nack_interval),
            None => true,
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Reset
    // ───────────────────────────────────────────────────────────────────────

    /// Clear everything a function-level reset clears.
    fn vf_reset<R: RegisterAccess>(&mut self, hw: &Hw<R>, vf: u32, now: u64) {
        let Some(rec) = self.vfs.get_mut(vf as usize) else {
            return;
        };
        rec.flags &= VfFlags::PF_SET_MAC;
        rec.last_nack = Some(now);
        rec.num_mc_hashes = 0;

        filter::set_vmolr(hw, vf, self.num_vfs(), 1);
        self.clear_vf_vfta(hw, vf);
        self.rx_mode_dirty = true;
    }

    /// Reset line raised (function-level reset or hot-plug).
    pub fn reset_event<R: RegisterAccess>(&mut self, hw: &Hw<R>, vf: u32, now: u64) {
        if let Some(rec) = self.vfs.get_mut(vf as usize) {
            if !rec.flags.contains(VfFlags::PF_SET_MAC) {
                rec.mac = random_ether_addr(&mut self.rng);
            }
        }
        self.vf_reset(hw, vf, now);
    }

    /// `VF_RESET` message: reset, enable the VF's queues and hand out its MAC.
    pub fn reset_msg<R, T>(&mut self, hw: &Hw<R>, mbx: &mut T, vf: u32, now: u64) -> Result<()>
    where
        R: RegisterAccess,
        T: MailboxTransport + ?Sized,
    {
        self.record(vf)?;
        self.vf_reset(hw, vf, now);

        let mac = self.record(vf)?.mac;
        filter::rar_set_qsel(hw, &mac.0, filter::vf_rar_entry(hw.generation(), vf), vf);

        hw.rmw(regs::VFTE, |v| v | (1 << vf));
        hw.rmw(regs::VFRE, |v| v | (1 << vf));

        let rec = self.record(vf)?;
        rec.flags = VfFlags::CTS | (rec.flags & VfFlags::PF_SET_MAC);

        let words = mac_to_words(&mac);
        mbx.write(&[VF_RESET | VT_MSGTYPE_ACK, words[0], words[1]], vf)?;
        info!("igb: VF {} reset, MAC {}", vf, mac);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Configuration requests
    // ───────────────────────────────────────────────────────────────────────

    /// Assign `mac` to VF `vf` and program its receive address entry.
    pub fn set_vf_mac<R: RegisterAccess>(
        &mut self,
        hw: &Hw<R>,
        vf: u32,
        mac: EthernetAddress,
    ) -> core::result::Result<(), MailboxError> {
        self.record(vf)?.mac = mac;
        filter::rar_set_qsel(hw, &mac.0, filter::vf_rar_entry(hw.generation(), vf), vf);
        Ok(())
    }

    /// Administrative MAC assignment; the VF can no longer change it.
    pub fn set_vf_mac_admin<R: RegisterAccess>(
        &mut self,
        hw: &Hw<R>,
        vf: u32,
        mac: EthernetAddress,
    ) -> core::result::Result<(), MailboxError> {
        if !is_valid_ether_addr(&mac) {
            return Err(MailboxError::InvalidMac);
        }
        self.set_vf_mac(hw, vf, mac)?;
        self.record(vf)?.flags |= VfFlags::PF_SET_MAC;
        info!("igb: setting MAC {} on VF {}", mac, vf);
        Ok(())
    }

    fn set_vf_mac_addr<R: RegisterAccess>(
        &mut self,
        hw: &Hw<R>,
        msg: &[u32],
        vf: u32,
    ) -> core::result::Result<(), MailboxError> {
        let mac = mac_from_words(msg[1], msg[2]);
        if self.record(vf)?.flags.contains(VfFlags::PF_SET_MAC) {
            warn!(
                "igb: VF {} attempted to override administratively set MAC address",
                vf
            );
            return Err(MailboxError::MacLocked);
        }
        if !is_valid_ether_addr(&mac) {
            return Err(MailboxError::InvalidMac);
        }
        self.set_vf_mac(hw, vf, mac)
    }

    /// Store a VF's multicast hash list.
    pub fn set_vf_multicasts(&mut self, msg: &[u32], vf: u32) -> core::result::Result<(), MailboxError> {
        let n = msg_info(msg[0]) as usize;
        let rec = self.record(vf)?;
        rec.num_mc_hashes = n as u16;

        let stored = n.min(MAX_VF_MC_HASHES).min((msg.len() - 1) * 2);
        for i in 0..stored {
            let word = msg[1 + i / 2];
            rec.mc_hashes[i] = (word >> (16 * (i % 2))) as u16;
        }
        self.rx_mode_dirty = true;
        Ok(())
    }

    /// Re-apply every VF's multicast state after the MTA was rebuilt.
    pub fn restore_vf_multicasts<R: RegisterAccess>(&self, hw: &Hw<R>) {
        for (vf, rec) in self.vfs.iter().enumerate() {
            let mut vmolr = hw.read(regs::vmolr(vf as u32));
            vmolr &= !(regs::VMOLR_ROMPE | regs::VMOLR_MPME);
            if rec.match_all_multicast() {
                vmolr |= regs::VMOLR_MPME;
            } else if rec.num_mc_hashes > 0 {
                vmolr |= regs::VMOLR_ROMPE;
                for hash in rec.stored_hashes() {
                    filter::mta_set(hw, *hash);
                }
            }
            hw.write(regs::vmolr(vf as u32), vmolr);
        }
    }

    /// Set promiscuous modes; leftover info bits are NACKed.
    pub fn set_vf_promisc<R: RegisterAccess>(
        &mut self,
        hw: &Hw<R>,
        msg: &[u32],
        vf: u32,
    ) -> core::result::Result<(), MailboxError> {
        let rec = self.record(vf)?;
        let mut vmolr = hw.read(regs::vmolr(vf));
        let mut info = msg[0] & VT_MSGINFO_MASK;

        rec.flags.remove(VfFlags::UNI_PROMISC | VfFlags::MULTI_PROMISC);
        vmolr &= !(regs::VMOLR_ROPE | regs::VMOLR_ROMPE | regs::VMOLR_MPME);

        if info & VF_SET_PROMISC_UNICAST != 0 {
            vmolr |= regs::VMOLR_ROPE;
            rec.flags |= VfFlags::UNI_PROMISC;
            info &= !VF_SET_PROMISC_UNICAST;
        }

        if info & VF_SET_PROMISC_MULTICAST != 0 {
            vmolr |= regs::VMOLR_MPME;
            rec.flags |= VfFlags::MULTI_PROMISC;
            info &= !VF_SET_PROMISC_MULTICAST;
        } else if rec.num_mc_hashes as usize > MAX_VF_MC_HASHES {
            vmolr |= regs::VMOLR_MPME;
        } else if rec.num_mc_hashes > 0 {
            // Hashes were skipped while multicast promiscuous was on.
            vmolr |= regs::VMOLR_ROMPE;
            for hash in rec.stored_hashes() {
                filter::mta_set(hw, *hash);
            }
        }

        hw.write(regs::vmolr(vf), vmolr);

        if info != 0 {
            return Err(MailboxError::UnsupportedFlags {
                info: info >> VT_MSGINFO_SHIFT,
            });
        }
        Ok(())
    }

    /// Set a VF's frame limit, plus a tag while it has VLANs.
    pub fn set_vf_rlpml<R: RegisterAccess>(
        &self,
        hw: &Hw<R>,
        size: u32,
        vf: u32,
    ) -> core::result::Result<(), MailboxError> {
        let mut size = size;
        if let Some(rec) = self.vfs.get(vf as usize) {
            if rec.vlans_enabled > 0 {
                size += VLAN_TAG_SIZE;
            }
        }
        hw.rmw(regs::vmolr(vf), |mut vmolr| {
            vmolr &= !regs::VMOLR_RLPML_MASK;
            vmolr |= (size & regs::VMOLR_RLPML_MASK) | regs::VMOLR_LPE;
            vmolr
        });
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // VLAN pool table
    // ───────────────────────────────────────────────────────────────────────

    fn adjust_rlpml<R: RegisterAccess>(hw: &Hw<R>, vf: u32, grow: bool) {
        hw.rmw(regs::vmolr(vf), |vmolr| {
            let size = vmolr & regs::VMOLR_RLPML_MASK;
            let size = if grow {
                size + VLAN_TAG_SIZE
            } else {
                size.saturating_sub(VLAN_TAG_SIZE)
            };
            (vmolr & !regs::VMOLR_RLPML_MASK) | (size & regs::VMOLR_RLPML_MASK)
        });
    }

    /// Add or remove pool `vf` from the VLVF entry of `vid`.
    ///
    /// The VFTA bit for `vid` is set while any pool holds it. Pools at or
    /// above the VF count belong to the PF and leave frame limits alone.
    pub fn vlvf_set<R: RegisterAccess>(
        &mut self,
        hw: &Hw<R>,
        vid: u16,
        add: bool,
        vf: u32,
    ) -> core::result::Result<(), MailboxError> {
        if hw.generation() < Generation::I82576 || self.vmdq_pools == 0 {
            return Err(MailboxError::VlanUnsupported);
        }
        let vid = vid as u32 & regs::VLVF_VLANID_MASK;
        let pool_bit = 1 << (regs::VLVF_POOLSEL_SHIFT + vf);

        let found = (0..regs::VLVF_ARRAY_SIZE).find(|&i| {
            let reg = hw.read_array(regs::VLVF, i);
            reg & regs::VLVF_VLANID_ENABLE != 0 && reg & regs::VLVF_VLANID_MASK == vid
        });
        let is_vf = (vf as usize) < self.vfs.len();

        if add {
            let slot = found.or_else(|| {
                (0..regs::VLVF_ARRAY_SIZE)
                    .find(|&i| hw.read_array(regs::VLVF, i) & regs::VLVF_VLANID_ENABLE == 0)
            });
            let Some(i) = slot else {
                return Err(MailboxError::VlanTableFull);
            };
            let mut reg = if found.is_some() {
                hw.read_array(regs::VLVF, i)
            } else {
                0
            };
            let already = reg & pool_bit != 0;
            reg |= pool_bit;
            if reg & regs::VLVF_VLANID_ENABLE == 0 {
                filter::vfta_set(hw, vid as u16, true);
                reg |= regs::VLVF_VLANID_ENABLE;
            }
            reg = (reg & !regs::VLVF_VLANID_MASK) | vid;
            hw.write_array(regs::VLVF, i, reg);

            if is_vf && !already {
                let rec = &mut self.vfs[vf as usize];
                if rec.vlans_enabled == 0 {
                    Self::adjust_rlpml(hw, vf, true);
                }
                rec.vlans_enabled += 1;
            }
            Ok(())
        } else {
            let Some(i) = found else {
                return Err(MailboxError::VlanNotFound);
            };
            let mut reg = hw.read_array(regs::VLVF, i);
            let had = reg & pool_bit != 0;
            reg &= !pool_bit;
            if reg & regs::VLVF_POOLSEL_MASK == 0 {
                reg = 0;
                filter::vfta_set(hw, vid as u16, false);
            }
            hw.write_array(regs::VLVF, i, reg);

            if is_vf && had {
                let rec = &mut self.vfs[vf as usize];
                rec.vlans_enabled = rec.vlans_enabled.saturating_sub(1);
                if rec.vlans_enabled == 0 {
                    Self::adjust_rlpml(hw, vf, false);
                }
            }
            Ok(())
        }
    }

    /// Pools holding `vid`; zero when no enabled entry exists.
    pub fn vlan_refcount<R: RegisterAccess>(hw: &Hw<R>, vid: u16) -> u32 {
        let vid = vid as u32 & regs::VLVF_VLANID_MASK;
        (0..regs::VLVF_ARRAY_SIZE)
            .map(|i| hw.read_array(regs::VLVF, i))
            .find(|reg| {
                reg & regs::VLVF_VLANID_ENABLE != 0 && reg & regs::VLVF_VLANID_MASK == vid
            })
            .map(|reg| (reg & regs::VLVF_POOLSEL_MASK).count_ones())
            .unwrap_or(0)
    }

    /// Drop pool `vf` from every VLAN.
    fn clear_vf_vfta<R: RegisterAccess>(&mut self, hw: &Hw<R>, vf: u32) {
        if hw.generation() < Generation::I82576 {
            return;
        }
        let pool_bit = 1 << (regs::VLVF_POOLSEL_SHIFT + vf);
        for i in 0..regs::VLVF_ARRAY_SIZE {
            let mut reg = hw.read_array(regs::VLVF, i);
            if reg & pool_bit == 0 {
                continue;
            }
            reg &= !pool_bit;
            if reg & regs::VLVF_POOLSEL_MASK == 0 && reg & regs::VLVF_VLANID_ENABLE != 0 {
                filter::vfta_set(hw, (reg & regs::VLVF_VLANID_MASK) as u16, false);
                reg = 0;
            }
            hw.write_array(regs::VLVF, i, reg);
        }
        if let Some(rec) = self.vfs.get_mut(vf as usize) {
            if rec.vlans_enabled > 0 {
                Self::adjust_rlpml(hw, vf, false);
            }
            rec.vlans_enabled = 0;
        }
    }

    fn set_vf_vlan<R: RegisterAccess>(
        &mut self,
        hw: &Hw<R>,
        msg: &[u32],
        vf: u32,
    ) -> core::result::Result<(), MailboxError> {
        let add = msg_info(msg[0]) != 0;
        let vid = (msg[1] & regs::VLVF_VLANID_MASK) as u16;
        self.vlvf_set(hw, vid, add, vf)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Dispatch
    // ───────────────────────────────────────────────────────────────────────

    /// Read and answer one pending message from VF `vf`.
    pub fn rcv_msg<R, T>(&mut self, hw: &Hw<R>, mbx: &mut T, vf: u32, now: u64) -> Result<()>
    where
        R: RegisterAccess,
        T: MailboxTransport + ?Sized,
    {
        self.record(vf)?;
        let mut msg = [0u32; VFMAILBOX_SIZE];
        if let Err(e) = mbx.read(&mut msg, vf) {
            warn!("igb: Error receiving message from VF {}: {}", vf, e);
            return Err(e.into());
        }

        // Already processed.
        if msg[0] & (VT_MSGTYPE_ACK | VT_MSGTYPE_NACK) != 0 {
            return Ok(());
        }

        if msg[0] == VF_RESET {
            return self.reset_msg(hw, mbx, vf, now);
        }

        if !self.record(vf)?.is_cts() {
            if self.nack_due(vf, now) {
                mbx.write(&[VT_MSGTYPE_NACK], vf)?;
                self.record(vf)?.last_nack = Some(now);
            }
            return Ok(());
        }

        let result = match msg_type(msg[0]) {
            VF_SET_MAC_ADDR => self.set_vf_mac_addr(hw, &msg, vf),
            VF_SET_PROMISC => self.set_vf_promisc(hw, &msg, vf),
            VF_SET_MULTICAST => self.set_vf_multicasts(&msg, vf),
            VF_SET_LPE => self.set_vf_rlpml(hw, msg[1], vf),
            VF_SET_VLAN => self.set_vf_vlan(hw, &msg, vf),
            _ => {
                warn!("igb: Unhandled Msg {:08x} from VF {}", msg[0], vf);
                Err(MailboxError::UnknownMessage { msg: msg[0] })
            }
        };

        if let Err(e) = result {
            debug!("igb: VF {} request {:08x} rejected: {}", vf, msg[0], e);
            msg[0] |= VT_MSGTYPE_NACK;
        } else {
            msg[0] |= VT_MSGTYPE_ACK;
        }
        msg[0] |= VT_MSGTYPE_CTS;
        mbx.write(&msg[..1], vf)?;
        Ok(())
    }

    /// VF acknowledged a PF message; NACK it if it has not reset yet.
    pub fn rcv_ack<T>(&mut self, mbx: &mut T, vf: u32, now: u64) -> Result<()>
    where
        T: MailboxTransport + ?Sized,
    {
        if !self.record(vf)?.is_cts() && self.nack_due(vf, now) {
            mbx.write(&[VT_MSGTYPE_NACK], vf)?;
            self.record(vf)?.last_nack = Some(now);
        }
        Ok(())
    }

    /// Service reset requests, messages and acks of every VF.
    pub fn msg_task<R, T>(&mut self, hw: &Hw<R>, mbx: &mut T, now: u64)
    where
        R: RegisterAccess,
        T: MailboxTransport + ?Sized,
    {
        for vf in 0..self.num_vfs() as u32 {
            if mbx.check_for_rst(vf) {
                self.reset_event(hw, vf, now);
            }
            if mbx.check_for_msg(vf) {
                if let Err(e) = self.rcv_msg(hw, mbx, vf, now) {
                    warn!("igb: VF {} message: {}", vf, e);
                }
            }
            if mbx.check_for_ack(vf) {
                if let Err(e) = self.rcv_ack(mbx, vf, now) {
                    warn!("igb: VF {} ack: {}", vf, e);
                }
            }
        }
    }

    /// Send a control message to every VF, with CTS for those past reset.
    pub fn ping_all_vfs<T: MailboxTransport + ?Sized>(&self, mbx: &mut T) {
        for (vf, rec) in self.vfs.iter().enumerate() {
            let mut ping = PF_CONTROL_MSG;
            if rec.is_cts() {
                ping |= VT_MSGTYPE_CTS;
            }
            if let Err(e) = mbx.write(&[ping], vf as u32) {
                debug!("igb: ping to VF {} failed: {}", vf, e);
            }
        }
    }

    /// Drop every VF back to RESET; they must handshake again.
    pub fn clear_all_cts(&mut self) {
        for rec in self.vfs.iter_mut() {
            rec.flags.remove(VfFlags::CTS);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MAC HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Unicast and non-zero.
pub fn is_valid_ether_addr(mac: &EthernetAddress) -> bool {
    mac.is_unicast() && mac.as_bytes().iter().any(|b| *b != 0)
}

/// Random locally administered unicast address.
pub fn random_ether_addr(rng: &mut ChaCha20Rng) -> EthernetAddress {
    let mut b = [0u8; 6];
    rng.fill_bytes(&mut b);
    b[0] &= 0xFE;
    b[0] |= 0x02;
    EthernetAddress(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockRegisters, RecordingMailbox};

    const NACK_INTERVAL: u64 = 2_000;

    fn setup(vfs: u16) -> (Hw<MockRegisters>, VfMailbox, RecordingMailbox) {
        let hw = Hw::new(MockRegisters::new(), Generation::I82576);
        let mbx = VfMailbox::new(vfs, 1, 7, NACK_INTERVAL).unwrap();
        (hw, mbx, RecordingMailbox::new())
    }

    /// Run the reset handshake for `vf` and drop the reply.
    fn handshake(hw: &Hw<MockRegisters>, mbx: &mut VfMailbox, t: &mut RecordingMailbox, vf: u32) {
        t.push_msg(vf, &[VF_RESET]);
        mbx.msg_task(hw, t, 0);
        t.take_sent();
    }

    #[test]
    fn test_placeholder_macs_are_local_unicast() {
        let (_, mbx, _) = setup(7);
        for vf in 0..7 {
            let mac = mbx.vf(vf).unwrap().mac;
            assert!(is_valid_ether_addr(&mac));
            assert_eq!(mac.as_bytes()[0] & 0x03, 0x02);
        }
    }

    #[test]
    fn test_reset_msg_acks_with_mac_and_enables_queues() {
        let (hw, mut mbx, mut t) = setup(2);
        t.push_msg(1, &[VF_RESET]);
        mbx.msg_task(&hw, &mut t, 10);

        let mac = mbx.vf(1).unwrap().mac;
        let words = mac_to_words(&mac);
        assert_eq!(t.sent_to(1), [vec![VF_RESET | VT_MSGTYPE_ACK, words[0], words[1]]]);
        assert!(mbx.vf(1).unwrap().is_cts());
        assert_eq!(hw.read(regs::VFTE), 0b10);
        assert_eq!(hw.read(regs::VFRE), 0b10);
        assert_eq!(hw.read(regs::ral(22)), words[0]);
    }

    #[test]
    fn test_requests_before_reset_get_one_nack_per_window() {
        let (hw, mut mbx, mut t) = setup(1);
        let set_mac = [VF_SET_MAC_ADDR, 0x0000_0002, 0];
        t.push_msg(0, &set_mac);
        mbx.msg_task(&hw, &mut t, 100);
        t.push_msg(0, &set_mac);
        mbx.msg_task(&hw, &mut t, 100 + NACK_INTERVAL / 2);
        assert_eq!(t.sent_to(0), [vec![VT_MSGTYPE_NACK]]);

        t.push_msg(0, &set_mac);
        mbx.msg_task(&hw, &mut t, 100 + NACK_INTERVAL + 1);
        assert_eq!(t.sent_to(0).len(), 2);
    }

    #[test]
    fn test_reset_event_suppresses_immediate_nack() {
        let (hw, mut mbx, mut t) = setup(1);
        t.request_reset(0);
        mbx.msg_task(&hw, &mut t, 50);
        t.push_ack(0);
        mbx.msg_task(&hw, &mut t, 60);
        assert!(t.sent_to(0).is_empty());
        t.push_ack(0);
        mbx.msg_task(&hw, &mut t, 50 + NACK_INTERVAL + 1);
        assert_eq!(t.sent_to(0), [vec![VT_MSGTYPE_NACK]]);
    }

    #[test]
    fn test_set_mac_after_reset() {
        let (hw, mut mbx, mut t) = setup(1);
        handshake(&hw, &mut mbx, &mut t, 0);
        let mac = EthernetAddress([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let w = mac_to_words(&mac);
        t.push_msg(0, &[VF_SET_MAC_ADDR, w[0], w[1]]);
        mbx.msg_task(&hw, &mut t, 1);
        assert_eq!(
            t.sent_to(0),
            [vec![VF_SET_MAC_ADDR | VT_MSGTYPE_ACK | VT_MSGTYPE_CTS]]
        );
        assert_eq!(mbx.vf(0).unwrap().mac, mac);
        assert_eq!(hw.read(regs::ral(23)), w[0]);
    }

    #[test]
    fn test_multicast_mac_is_nacked() {
        let (hw, mut mbx, mut t) = setup(1);
        handshake(&hw, &mut mbx, &mut t, 0);
        let w = mac_to_words(&EthernetAddress([0x01, 0, 0x5E, 0, 0, 1]));
        t.push_msg(0, &[VF_SET_MAC_ADDR, w[0], w[1]]);
        mbx.msg_task(&hw, &mut t, 1);
        assert_eq!(
            t.sent_to(0),
            [vec![VF_SET_MAC_ADDR | VT_MSGTYPE_NACK | VT_MSGTYPE_CTS]]
        );
    }

    #[test]
    fn test_admin_mac_cannot_be_overridden_or_randomized() {
        let (hw, mut mbx, mut t) = setup(1);
        let admin = EthernetAddress([0x02, 0, 0, 0, 0, 9]);
        mbx.set_vf_mac_admin(&hw, 0, admin).unwrap();
        t.request_reset(0);
        mbx.msg_task(&hw, &mut t, 0);
        assert_eq!(mbx.vf(0).unwrap().mac, admin);

        handshake(&hw, &mut mbx, &mut t, 0);
        let w = mac_to_words(&EthernetAddress([0x02, 1, 1, 1, 1, 1]));
        t.push_msg(0, &[VF_SET_MAC_ADDR, w[0], w[1]]);
        mbx.msg_task(&hw, &mut t, 1);
        assert_ne!(t.sent_to(0)[0][0] & VT_MSGTYPE_NACK, 0);
        assert_eq!(mbx.vf(0).unwrap().mac, admin);
    }

    #[test]
    fn test_vlan_add_remove_restores_refcount() {
        let (hw, mut mbx, mut t) = setup(2);
        handshake(&hw, &mut mbx, &mut t, 0);
        handshake(&hw, &mut mbx, &mut t, 1);
        assert_eq!(VfMailbox::vlan_refcount(&hw, 10), 0);

        t.push_msg(0, &[VF_SET_VLAN | (1 << VT_MSGINFO_SHIFT), 10]);
        mbx.msg_task(&hw, &mut t, 1);
        assert_eq!(VfMailbox::vlan_refcount(&hw, 10), 1);
        assert!(filter::vfta_test(&hw, 10));
        assert_eq!(mbx.vf(0).unwrap().vlans_enabled, 1);

        t.push_msg(0, &[VF_SET_VLAN, 10]);
        mbx.msg_task(&hw, &mut t, 2);
        assert_eq!(VfMailbox::vlan_refcount(&hw, 10), 0);
        assert!(!filter::vfta_test(&hw, 10));
        assert_eq!(mbx.vf(0).unwrap().vlans_enabled, 0);
        assert!(t
            .sent_to(0)
            .iter()
            .all(|m| m[0] & VT_MSGTYPE_ACK != 0));
    }

    #[test]
    fn test_shared_vlan_stays_while_another_pool_holds_it() {
        let (hw, mut mbx, _) = setup(2);
        mbx.vlvf_set(&hw, 10, true, 1).unwrap();
        let before = VfMailbox::vlan_refcount(&hw, 10);
        mbx.vlvf_set(&hw, 10, true, 0).unwrap();
        assert_eq!(VfMailbox::vlan_refcount(&hw, 10), before + 1);
        mbx.vlvf_set(&hw, 10, false, 0).unwrap();
        assert_eq!(VfMailbox::vlan_refcount(&hw, 10), before);
        assert!(filter::vfta_test(&hw, 10));
    }

    #[test]
    fn test_vlan_grows_frame_limit_once() {
        let (hw, mut mbx, _) = setup(1);
        hw.write(regs::vmolr(0), 1518);
        mbx.vlvf_set(&hw, 10, true, 0).unwrap();
        mbx.vlvf_set(&hw, 20, true, 0).unwrap();
        assert_eq!(hw.read(regs::vmolr(0)) & regs::VMOLR_RLPML_MASK, 1522);
        mbx.vlvf_set(&hw, 10, false, 0).unwrap();
        mbx.vlvf_set(&hw, 20, false, 0).unwrap();
        assert_eq!(hw.read(regs::vmolr(0)) & regs::VMOLR_RLPML_MASK, 1518);
    }

    #[test]
    fn test_vlan_unsupported_on_82575() {
        let hw = Hw::new(MockRegisters::new(), Generation::I82575);
        let mut mbx = VfMailbox::new(1, 1, 0, NACK_INTERVAL).unwrap();
        assert_eq!(
            mbx.vlvf_set(&hw, 10, true, 0),
            Err(MailboxError::VlanUnsupported)
        );
    }

    #[test]
    fn test_reset_clears_vlans() {
        let (hw, mut mbx, mut t) = setup(1);
        mbx.vlvf_set(&hw, 42, true, 0).unwrap();
        t.request_reset(0);
        mbx.msg_task(&hw, &mut t, 0);
        assert_eq!(VfMailbox::vlan_refcount(&hw, 42), 0);
        assert!(!filter::vfta_test(&hw, 42));
    }

    #[test]
    fn test_multicast_overflow_falls_back_to_match_all() {
        let (hw, mut mbx, mut t) = setup(1);
        handshake(&hw, &mut mbx, &mut t, 0);
        let mut msg = vec![VF_SET_MULTICAST | (3 << VT_MSGINFO_SHIFT)];
        msg.push(0x0020_0010);
        msg.push(0x0000_0030);
        t.push_msg(0, &msg);
        mbx.msg_task(&hw, &mut t, 1);
        assert_eq!(mbx.vf(0).unwrap().stored_hashes(), &[0x10, 0x20, 0x30]);
        assert!(mbx.take_rx_mode_dirty());

        mbx.restore_vf_multicasts(&hw);
        assert_ne!(hw.read(regs::vmolr(0)) & regs::VMOLR_ROMPE, 0);
        assert_eq!(hw.read_array(regs::MTA, 0), 1 << 0x10);

        t.push_msg(0, &[VF_SET_MULTICAST | (31 << VT_MSGINFO_SHIFT)]);
        mbx.msg_task(&hw, &mut t, 2);
        mbx.restore_vf_multicasts(&hw);
        let vmolr = hw.read(regs::vmolr(0));
        assert_ne!(vmolr & regs::VMOLR_MPME, 0);
        assert_eq!(vmolr & regs::VMOLR_ROMPE, 0);
    }

    #[test]
    fn test_promisc_flags() {
        let (hw, mut mbx, mut t) = setup(1);
        handshake(&hw, &mut mbx, &mut t, 0);
        t.push_msg(0, &[VF_SET_PROMISC | VF_SET_PROMISC_UNICAST | VF_SET_PROMISC_MULTICAST]);
        mbx.msg_task(&hw, &mut t, 1);
        let vmolr = hw.read(regs::vmolr(0));
        assert_ne!(vmolr & regs::VMOLR_ROPE, 0);
        assert_ne!(vmolr & regs::VMOLR_MPME, 0);
        assert!(mbx
            .vf(0)
            .unwrap()
            .flags
            .contains(VfFlags::UNI_PROMISC | VfFlags::MULTI_PROMISC));

        t.push_msg(0, &[VF_SET_PROMISC]);
        mbx.msg_task(&hw, &mut t, 2);
        assert_eq!(hw.read(regs::vmolr(0)) & (regs::VMOLR_ROPE | regs::VMOLR_MPME), 0);
        assert!(!mbx.vf(0).unwrap().flags.intersects(VfFlags::UNI_PROMISC | VfFlags::MULTI_PROMISC));

        t.take_sent();
        t.push_msg(0, &[VF_SET_PROMISC | (0x80 << VT_MSGINFO_SHIFT)]);
        mbx.msg_task(&hw, &mut t, 3);
        assert_ne!(t.sent_to(0)[0][0] & VT_MSGTYPE_NACK, 0);
    }

    #[test]
    fn test_lpe_adds_tag_with_vlans() {
        let (hw, mut mbx, mut t) = setup(1);
        handshake(&hw, &mut mbx, &mut t, 0);
        mbx.vlvf_set(&hw, 5, true, 0).unwrap();
        t.push_msg(0, &[VF_SET_LPE, 9018]);
        mbx.msg_task(&hw, &mut t, 1);
        let vmolr = hw.read(regs::vmolr(0));
        assert_eq!(vmolr & regs::VMOLR_RLPML_MASK, 9022);
        assert_ne!(vmolr & regs::VMOLR_LPE, 0);
    }

    #[test]
    fn test_unknown_message_is_nacked() {
        let (hw, mut mbx, mut t) = setup(1);
        handshake(&hw, &mut mbx, &mut t, 0);
        t.push_msg(0, &[0x77]);
        mbx.msg_task(&hw, &mut t, 1);
        assert_eq!(t.sent_to(0), [vec![0x77 | VT_MSGTYPE_NACK | VT_MSGTYPE_CTS]]);
    }

    #[test]
    fn test_transport_error_does_not_stall_other_vfs() {
        let (hw, mut mbx, mut t) = setup(2);
        handshake(&hw, &mut mbx, &mut t, 0);
        handshake(&hw, &mut mbx, &mut t, 1);
        t.push_msg(0, &[0u32; VFMAILBOX_SIZE + 4]);
        t.push_msg(1, &[0x77]);
        mbx.msg_task(&hw, &mut t, 1);
        assert!(t.sent_to(0).is_empty());
        assert_eq!(t.sent_to(1), [vec![0x77 | VT_MSGTYPE_NACK | VT_MSGTYPE_CTS]]);
        assert!(mbx.vf(0).unwrap().is_cts());
    }

    #[test]
    fn test_ping_carries_cts_only_after_reset() {
        let (hw, mut mbx, mut t) = setup(2);
        handshake(&hw, &mut mbx, &mut t, 1);
        mbx.ping_all_vfs(&mut t);
        assert_eq!(t.sent_to(0), [vec![PF_CONTROL_MSG]]);
        assert_eq!(t.sent_to(1), [vec![PF_CONTROL_MSG | VT_MSGTYPE_CTS]]);

        t.take_sent();
        mbx.clear_all_cts();
        mbx.ping_all_vfs(&mut t);
        assert_eq!(t.sent_to(1), [vec![PF_CONTROL_MSG]]);
    }

    #[test]
    fn test_mac_word_packing() {
        let mac = EthernetAddress([1, 2, 3, 4, 5, 6]);
        let w = mac_to_words(&mac);
        assert_eq!(w, [0x0403_0201, 0x0000_0605]);
        assert_eq!(mac_from_words(w[0], w[1]), mac);
    }
}
