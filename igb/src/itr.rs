//! Adaptive interrupt throttling.
//!
//! Two algorithms feed a vector's EITR interval:
//!
//! - packet-size, per vector with MSI-X: the average wire size of the last
//!   poll's frames becomes the interval directly;
//! - latency-bucket, single vector: each direction moves between
//!   [`LatencyRange`] classes and the slower class picks a fixed interval.
//!
//! Neither writes hardware. The result sits in the vector with `set_itr`
//! raised and [`write_itr`] programs it when the vector's next interrupt is
//! serviced; an earlier write would restart the device's interval timer.
//!
//! # Reference
//! Intel 82576 Datasheet, Section 7.3.2 (Interrupt Moderation)

use crate::config::ItrSetting;
use crate::hw::{regs, Generation, Hw, LinkSpeed, RegisterAccess};
use crate::ring::ItrSample;
use crate::vector::{LatencyRange, QueueVector};

/// Interval at less than gigabit in the packet-size algorithm.
pub const ITR_NON_GIGABIT_RING: u32 = 976;
/// Interval at less than gigabit in the latency-bucket algorithm.
pub const ITR_NON_GIGABIT: u32 = 4000;
/// Preamble, FCS and inter-frame gap added to the average frame.
pub const WIRE_OVERHEAD: u32 = 24;
/// Largest average wire size considered.
pub const MAX_WIRE_SIZE: u32 = 3000;

/// Interval for [`LatencyRange::Lowest`] (~70000 ints/s).
pub const ITR_LOWEST_LATENCY: u32 = 56;
/// Interval for [`LatencyRange::Low`] (~20000 ints/s).
pub const ITR_LOW_LATENCY: u32 = 196;
/// Interval for [`LatencyRange::Bulk`] (~4000 ints/s).
pub const ITR_BULK_LATENCY: u32 = 980;

#[inline]
fn is_conservative(setting: ItrSetting) -> bool {
    setting == ItrSetting::Conservative
}

// ═══════════════════════════════════════════════════════════════════════════
// PACKET-SIZE ALGORITHM
// ═══════════════════════════════════════════════════════════════════════════

/// Recompute a vector's interval from its rings' last-poll traffic.
///
/// Counters are cleared whether or not the interval changes.
pub fn update_ring_itr(
    q_vector: &mut QueueVector,
    rx: Option<&mut ItrSample>,
    tx: Option<&mut ItrSample>,
    speed: LinkSpeed,
) {
    let new_val = if !speed.is_nominal() {
        Some(ITR_NON_GIGABIT_RING)
    } else {
        let mut avg_wire_size = 0;
        if let Some(s) = rx.as_deref() {
            if s.packets != 0 {
                avg_wire_size = s.bytes / s.packets;
            }
        }
        if let Some(s) = tx.as_deref() {
            if s.packets != 0 {
                avg_wire_size = avg_wire_size.max(s.bytes / s.packets);
            }
        }

        if avg_wire_size == 0 {
            // No work since the last computation.
            None
        } else {
            let size = (avg_wire_size + WIRE_OVERHEAD).min(MAX_WIRE_SIZE);
            // Mid-size frames get a shorter interval.
            Some(if size > 300 && size < 1200 {
                size / 3
            } else {
                size / 2
            })
        }
    };

    if let Some(val) = new_val {
        if val != q_vector.itr_val {
            q_vector.itr_val = val;
            q_vector.set_itr = true;
        }
    }

    if let Some(s) = rx {
        s.clear();
    }
    if let Some(s) = tx {
        s.clear();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LATENCY-BUCKET ALGORITHM
// ═══════════════════════════════════════════════════════════════════════════

/// Next latency class for one direction.
pub fn update_itr(current: LatencyRange, packets: u32, bytes: u32) -> LatencyRange {
    if packets == 0 {
        return current;
    }
    let per_packet = bytes / packets;

    match current {
        LatencyRange::Lowest => {
            // TSO and jumbo frames
            if per_packet > 8000 {
                LatencyRange::Bulk
            } else if packets < 5 && bytes > 512 {
                LatencyRange::Low
            } else {
                current
            }
        }
        LatencyRange::Low => {
            if bytes > 10000 {
                if per_packet > 8000 || packets < 10 || per_packet > 1200 {
                    LatencyRange::Bulk
                } else if packets > 35 {
                    LatencyRange::Lowest
                } else {
                    current
                }
            } else if per_packet > 2000 {
                LatencyRange::Bulk
            } else if packets <= 2 && bytes < 512 {
                LatencyRange::Lowest
            } else {
                current
            }
        }
        LatencyRange::Bulk => {
            if bytes > 25000 {
                if packets > 35 {
                    LatencyRange::Low
                } else {
                    current
                }
            } else if bytes < 1500 {
                LatencyRange::Low
            } else {
                current
            }
        }
    }
}

/// Recompute the single vector's interval from both directions' classes.
///
/// Rising rates approach the new value in steps instead of jumping to it.
pub fn set_itr(
    q_vector: &mut QueueVector,
    rx: &mut ItrSample,
    tx: &mut ItrSample,
    speed: LinkSpeed,
    setting: ItrSetting,
) {
    let new_itr = if !speed.is_nominal() {
        ITR_NON_GIGABIT
    } else {
        q_vector.rx_itr = update_itr(q_vector.rx_itr, rx.packets, rx.bytes);
        q_vector.tx_itr = update_itr(q_vector.tx_itr, tx.packets, tx.bytes);
        let mut current = q_vector.rx_itr.max(q_vector.tx_itr);

        // Conservative mode never runs at the lowest latency.
        if is_conservative(setting) && current == LatencyRange::Lowest {
            current = LatencyRange::Low;
        }

        match current {
            LatencyRange::Lowest => ITR_LOWEST_LATENCY,
            LatencyRange::Low => ITR_LOW_LATENCY,
            LatencyRange::Bulk => ITR_BULK_LATENCY,
        }
    };

    rx.clear();
    tx.clear();

    let cur = q_vector.itr_val;
    if new_itr != cur {
        let new_itr = if new_itr > cur {
            ((new_itr * cur) / (new_itr + (cur >> 2))).max(new_itr)
        } else {
            new_itr
        };
        q_vector.itr_val = new_itr;
        q_vector.set_itr = true;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// REGISTER WRITE
// ═══════════════════════════════════════════════════════════════════════════

/// EITR register value for an interval.
pub fn eitr_value(generation: Generation, itr_val: u32) -> u32 {
    let mut val = itr_val & regs::EITR_INTERVAL_MASK;
    if val == 0 {
        val = 0x4;
    }
    if generation == Generation::I82575 {
        val | (val << 16)
    } else {
        val | regs::EITR_CNT_IGNR
    }
}

/// Program a pending interval; no-op when nothing changed.
pub fn write_itr<R: RegisterAccess>(hw: &Hw<R>, q_vector: &mut QueueVector) {
    if !q_vector.set_itr {
        return;
    }
    hw.write(q_vector.itr_register, eitr_value(hw.generation(), q_vector.itr_val));
    q_vector.set_itr = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockRegisters;

    fn sample(bytes: u32, packets: u32) -> ItrSample {
        ItrSample { bytes, packets }
    }

    fn vector(itr_val: u32) -> QueueVector {
        let mut q = QueueVector::new(0);
        q.itr_val = itr_val;
        q
    }

    #[test]
    fn test_mid_size_frames_get_a_third() {
        let mut q = vector(648);
        let mut rx = sample(1200, 2);
        update_ring_itr(&mut q, Some(&mut rx), None, LinkSpeed::Speed1000);
        assert_eq!(q.itr_val, 624 / 3);
        assert!(q.set_itr);
        assert_eq!(rx, ItrSample::default());
    }

    #[test]
    fn test_non_gigabit_forces_constant() {
        let mut q = vector(648);
        let mut rx = sample(100, 1);
        update_ring_itr(&mut q, Some(&mut rx), None, LinkSpeed::Speed100);
        assert_eq!(q.itr_val, ITR_NON_GIGABIT_RING);
        assert_eq!(rx.packets, 0);
    }

    #[test]
    fn test_jumbo_frames_are_capped() {
        let mut q = vector(648);
        let mut tx = sample(90_000, 10);
        update_ring_itr(&mut q, None, Some(&mut tx), LinkSpeed::Speed1000);
        assert_eq!(q.itr_val, MAX_WIRE_SIZE / 2);
    }

    #[test]
    fn test_larger_direction_wins() {
        let mut q = vector(648);
        let mut rx = sample(64, 1);
        let mut tx = sample(1500, 1);
        update_ring_itr(&mut q, Some(&mut rx), Some(&mut tx), LinkSpeed::Speed1000);
        assert_eq!(q.itr_val, 1524 / 2);
        assert_eq!(tx, ItrSample::default());
    }

    #[test]
    fn test_idle_vector_keeps_value() {
        let mut q = vector(648);
        let mut rx = sample(0, 0);
        update_ring_itr(&mut q, Some(&mut rx), None, LinkSpeed::Speed1000);
        assert_eq!(q.itr_val, 648);
        assert!(!q.set_itr);
    }

    #[test]
    fn test_small_frames_have_no_floor() {
        let mut q = vector(648);
        let mut rx = sample(64, 1);
        update_ring_itr(&mut q, Some(&mut rx), None, LinkSpeed::Speed1000);
        // (64 + 24) / 2
        assert_eq!(q.itr_val, 44);
        assert!(q.set_itr);
    }

    #[test]
    fn test_latency_transitions() {
        assert_eq!(update_itr(LatencyRange::Lowest, 1, 9000), LatencyRange::Bulk);
        assert_eq!(update_itr(LatencyRange::Lowest, 4, 1000), LatencyRange::Low);
        assert_eq!(update_itr(LatencyRange::Low, 40, 20000), LatencyRange::Lowest);
        assert_eq!(update_itr(LatencyRange::Low, 5, 20000), LatencyRange::Bulk);
        assert_eq!(update_itr(LatencyRange::Low, 2, 300), LatencyRange::Lowest);
        assert_eq!(update_itr(LatencyRange::Low, 2, 5000), LatencyRange::Bulk);
        assert_eq!(update_itr(LatencyRange::Bulk, 40, 30000), LatencyRange::Low);
        assert_eq!(update_itr(LatencyRange::Bulk, 1, 1000), LatencyRange::Low);
        assert_eq!(update_itr(LatencyRange::Bulk, 10, 5000), LatencyRange::Bulk);
        assert_eq!(update_itr(LatencyRange::Low, 0, 0), LatencyRange::Low);
    }

    #[test]
    fn test_set_itr_takes_slower_direction() {
        let mut q = vector(ITR_LOW_LATENCY);
        let mut rx = sample(300, 2);
        let mut tx = sample(9000, 1);
        set_itr(&mut q, &mut rx, &mut tx, LinkSpeed::Speed1000, ItrSetting::Dynamic);
        assert_eq!(q.rx_itr, LatencyRange::Lowest);
        assert_eq!(q.tx_itr, LatencyRange::Bulk);
        assert_eq!(q.itr_val, ITR_BULK_LATENCY);
        assert_eq!(rx, ItrSample::default());
    }

    #[test]
    fn test_conservative_mode_skips_lowest() {
        let mut q = vector(ITR_BULK_LATENCY);
        q.tx_itr = LatencyRange::Lowest;
        let mut rx = sample(300, 2);
        let mut tx = sample(0, 0);
        set_itr(&mut q, &mut rx, &mut tx, LinkSpeed::Speed1000, ItrSetting::Conservative);
        assert_eq!(q.rx_itr, LatencyRange::Lowest);
        assert_eq!(q.itr_val, ITR_LOW_LATENCY);
    }

    #[test]
    fn test_set_itr_non_gigabit() {
        let mut q = vector(ITR_LOW_LATENCY);
        set_itr(
            &mut q,
            &mut sample(300, 2),
            &mut sample(0, 0),
            LinkSpeed::Speed10,
            ItrSetting::Dynamic,
        );
        assert_eq!(q.itr_val, ITR_NON_GIGABIT);
    }

    #[test]
    fn test_write_is_lazy_and_once() {
        let hw = Hw::new(MockRegisters::new(), Generation::I82576);
        let mut q = vector(196);
        q.itr_register = regs::EITR0 + 4;
        write_itr(&hw, &mut q);
        assert!(hw.regs().writes_to(regs::EITR0 + 4).is_empty());

        q.set_itr = true;
        write_itr(&hw, &mut q);
        write_itr(&hw, &mut q);
        assert_eq!(
            hw.regs().writes_to(regs::EITR0 + 4),
            [196 | regs::EITR_CNT_IGNR]
        );
    }

    #[test]
    fn test_eitr_encoding() {
        assert_eq!(eitr_value(Generation::I82575, 196), 196 | (196 << 16));
        assert_eq!(eitr_value(Generation::I82580, 0), 4 | regs::EITR_CNT_IGNR);
        assert_eq!(eitr_value(Generation::I82576, 0x7FFF), 0x7FFC | regs::EITR_CNT_IGNR);
    }
}
