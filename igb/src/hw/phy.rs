//! Link state decoding.
//!
//! The MAC mirrors the negotiated PHY state in STATUS; the driver core
//! only needs speed and duplex from there.
//!
//! # Reference
//! Intel 82576 Datasheet, Section 8.2.2 (Device Status)

use super::regs;

// ═══════════════════════════════════════════════════════════════════════════
// LINK STATUS
// ═══════════════════════════════════════════════════════════════════════════

/// Link speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    /// 10 Mbps.
    Speed10,
    /// 100 Mbps.
    Speed100,
    /// 1000 Mbps (1 Gbps).
    Speed1000,
    /// Unknown speed.
    Unknown,
}

impl LinkSpeed {
    /// Get speed in Mbps.
    pub fn mbps(&self) -> u32 {
        match self {
            LinkSpeed::Speed10 => 10,
            LinkSpeed::Speed100 => 100,
            LinkSpeed::Speed1000 => 1000,
            LinkSpeed::Unknown => 0,
        }
    }

    /// Nominal (gigabit) speed; adaptive ITR only tunes at this speed.
    #[inline]
    pub fn is_nominal(&self) -> bool {
        matches!(self, LinkSpeed::Speed1000)
    }
}

/// Link status information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    /// Link is up.
    pub link_up: bool,
    /// Full duplex mode.
    pub full_duplex: bool,
    /// Link speed.
    pub speed: LinkSpeed,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            link_up: false,
            full_duplex: false,
            speed: LinkSpeed::Unknown,
        }
    }
}

impl LinkStatus {
    /// Decode a STATUS register value.
    pub fn from_status(status: u32) -> Self {
        if status & regs::STATUS_LU == 0 {
            return Self::default();
        }

        let speed = if status & regs::STATUS_SPEED_1000 != 0 {
            LinkSpeed::Speed1000
        } else if status & regs::STATUS_SPEED_100 != 0 {
            LinkSpeed::Speed100
        } else {
            LinkSpeed::Speed10
        };

        Self {
            link_up: true,
            full_duplex: status & regs::STATUS_FD != 0,
            speed,
        }
    }
}
