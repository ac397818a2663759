//! Periodic link and transmit-health check.
//!
//! The platform calls [`Adapter::watchdog`] every
//! [`TimeoutConfig::watchdog_period`](crate::time::TimeoutConfig::watchdog_period)
//! ticks and [`Adapter::reset_task`] from a context that may sleep.
//!
//! ```text
//! STATUS ─► link transition? ─► log, timeout factor, ping VFs
//!        ─► refresh stats
//!        ─► link down + TX pending ─► schedule reset
//!        ─► ring hung             ─► schedule reset
//!        ─► arm hang detection, kick every vector (EICS / ICS)
//! ```

use log::{info, warn};

use crate::adapter::Adapter;
use crate::dma::DmaMapper;
use crate::error::Result;
use crate::hw::{regs, LinkSpeed, RegisterAccess};
use crate::time::Clock;

/// Hang window multiplier at 10 Mbps.
const TX_TIMEOUT_FACTOR_10: u32 = 14;

impl<R: RegisterAccess, D: DmaMapper, C: Clock> Adapter<R, D, C> {
    /// Run one watchdog pass.
    pub fn watchdog(&mut self) {
        if self.is_down() {
            return;
        }

        let link = self.hw.link_status();
        if link.link_up && !self.carrier_ok {
            info!(
                "igb: NIC Link is Up {} Mbps {}",
                link.speed.mbps(),
                if link.full_duplex {
                    "Full Duplex"
                } else {
                    "Half Duplex"
                }
            );
            self.tx_timeout_factor = match link.speed {
                LinkSpeed::Speed10 => TX_TIMEOUT_FACTOR_10,
                _ => 1,
            };
            self.carrier_ok = true;
            self.link_speed = link.speed;
            self.ping_vfs();
        } else if !link.link_up && self.carrier_ok {
            info!("igb: NIC Link is Down");
            self.carrier_ok = false;
            self.link_speed = LinkSpeed::Unknown;
            self.ping_vfs();
        }

        self.update_stats();

        if !self.carrier_ok {
            // Nothing will drain these rings until the link returns.
            let pending = self
                .tx
                .iter()
                .any(|tx| tx.ring.unused() + 1 < tx.ring.count());
            if pending {
                self.stats.tx_timeout_count += 1;
                warn!("igb: Tx pending with link down, scheduling reset");
                self.reset_pending = true;
                return;
            }
        }

        if let Some(tx) = self.tx.iter().find(|tx| tx.hung) {
            self.stats.tx_timeout_count += 1;
            warn!(
                "igb: Tx timeout on queue {}, scheduling reset",
                tx.ring.queue_index()
            );
            self.reset_pending = true;
            return;
        }

        // Have every vector clean its rings even without traffic.
        if self.counts.is_msix() {
            let eics = self
                .vectors
                .iter()
                .fold(0, |acc, q| acc | q.eims_value);
            self.hw.write(regs::EICS, eics);
        } else {
            self.hw.write(regs::ICS, regs::IMS_RXDMT0);
        }

        for tx in self.tx.iter_mut() {
            tx.detect_tx_hung = true;
        }
    }

    /// Reset scheduled by the watchdog or an interrupt cause is waiting.
    #[inline]
    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }

    /// Perform a scheduled reset.
    ///
    /// A reset that finds the adapter busy stays scheduled.
    pub fn reset_task(&mut self) -> Result<()> {
        if !self.reset_pending {
            return Ok(());
        }
        if self.is_down() {
            self.reset_pending = false;
            return Ok(());
        }
        self.reinit_locked()?;
        self.reset_pending = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::adapter::tests::{adapter, adapter_with, Platform};
    use crate::config::IgbConfig;
    use crate::error::IgbError;
    use crate::hw::{regs, Generation, LinkSpeed};
    use crate::rx::RxPacket;
    use crate::testutil::FaultyDma;
    use crate::tx::{TxPacket, TxStatus};
    use alloc::vec;

    const LINK_1000_FD: u32 = regs::STATUS_LU | regs::STATUS_FD | regs::STATUS_SPEED_1000;

    #[test]
    fn test_link_up_sets_carrier_and_factor() {
        let mut a = adapter();
        a.open().unwrap();
        a.hw().regs().poke(regs::STATUS, regs::STATUS_LU | regs::STATUS_FD);
        a.watchdog();
        assert!(a.carrier_ok());
        assert_eq!(a.link_speed(), LinkSpeed::Speed10);
        assert_eq!(a.tx_timeout_factor, 14);

        a.hw().regs().poke(regs::STATUS, 0);
        a.watchdog();
        assert!(!a.carrier_ok());

        a.hw().regs().poke(regs::STATUS, LINK_1000_FD);
        a.watchdog();
        assert_eq!(a.link_speed(), LinkSpeed::Speed1000);
        assert_eq!(a.tx_timeout_factor, 1);
        a.close();
    }

    #[test]
    fn test_watchdog_kicks_vectors_and_arms_hang_check() {
        let mut a = adapter();
        a.open().unwrap();
        a.hw().regs().poke(regs::STATUS, LINK_1000_FD);
        a.watchdog();
        let expected = a.vectors.iter().fold(0, |acc, q| acc | q.eims_value);
        assert_eq!(a.hw().regs().writes_to(regs::EICS), [expected]);
        assert!(a.tx[0].detect_tx_hung);
        a.close();
    }

    #[test]
    fn test_legacy_watchdog_uses_ics() {
        let mut a = adapter_with(
            IgbConfig::defaults(Generation::I82576),
            FaultyDma::new(),
            &mut Platform { msix: false, msi: false },
        );
        a.open().unwrap();
        a.watchdog();
        assert_eq!(a.hw().regs().writes_to(regs::ICS), [regs::IMS_RXDMT0]);
        a.close();
    }

    #[test]
    fn test_pending_tx_with_link_down_schedules_reset() {
        let mut a = adapter();
        a.open().unwrap();
        assert_eq!(a.transmit(0, TxPacket::new(vec![0u8; 60])), TxStatus::Accepted);
        a.watchdog();
        assert_eq!(a.stats().tx_timeout_count, 1);
        assert!(a.reset_pending());
        // Hang detection is not armed on the early return.
        assert!(!a.tx[0].detect_tx_hung);

        let resets = a.stats().reset_count;
        a.reset_task().unwrap();
        assert!(!a.reset_pending());
        assert_eq!(a.stats().reset_count, resets + 1);
        assert_eq!(a.tx[0].ring.unused(), 255);
        a.close();
    }

    #[test]
    fn test_hung_queue_detected_then_reset() {
        let mut a = adapter();
        a.open().unwrap();
        a.hw().regs().poke(regs::STATUS, LINK_1000_FD);
        a.watchdog();
        assert_eq!(a.transmit(0, TxPacket::new(vec![0u8; 60])), TxStatus::Accepted);
        a.watchdog();

        // Well past the one-second window at 1000 ticks/ms.
        a.clock.advance(5_000_000);
        let mut sink = |_p: RxPacket| {};
        a.poll(0, 64, &mut sink).unwrap();
        assert!(a.tx[0].is_stopped());
        assert_eq!(a.tx[0].stats.tx_hang, 1);

        a.watchdog();
        assert!(a.reset_pending());
        assert_eq!(a.stats().tx_hang_count, 1);
        assert_eq!(a.stats().tx_timeout_count, 1);

        a.reset_task().unwrap();
        assert!(!a.tx[0].is_stopped());
        assert_eq!(a.transmit(0, TxPacket::new(vec![0u8; 60])), TxStatus::Accepted);
        a.close();
    }

    #[test]
    fn test_xoff_suppresses_hang() {
        let mut a = adapter();
        a.open().unwrap();
        a.hw().regs().poke(regs::STATUS, LINK_1000_FD | regs::STATUS_TXOFF);
        a.watchdog();
        assert_eq!(a.transmit(0, TxPacket::new(vec![0u8; 60])), TxStatus::Accepted);
        a.watchdog();
        a.clock.advance(5_000_000);
        let mut sink = |_p: RxPacket| {};
        a.poll(0, 64, &mut sink).unwrap();
        assert!(!a.tx[0].is_stopped());
        a.close();
    }

    #[test]
    fn test_reset_task_busy_keeps_request() {
        let mut a = adapter();
        a.open().unwrap();
        a.reset_pending = true;
        assert!(a.try_begin_reset());
        assert_eq!(a.reset_task(), Err(IgbError::Busy));
        assert!(a.reset_pending());
        a.end_reset();
        a.reset_task().unwrap();
        assert!(!a.reset_pending());
        a.close();
    }

    #[test]
    fn test_reset_task_dropped_while_down() {
        let mut a = adapter();
        a.reset_pending = true;
        a.reset_task().unwrap();
        assert!(!a.reset_pending());
        assert_eq!(a.stats().reset_count, 0);
    }

    #[test]
    fn test_link_interrupt_runs_watchdog() {
        let mut a = adapter();
        a.open().unwrap();
        a.hw().regs().poke(regs::STATUS, LINK_1000_FD);
        a.hw().regs().poke(regs::ICR, regs::IMS_LSC);
        let cause = a.service_other();
        assert!(cause.contains(crate::interrupt::OtherCause::LINK));
        assert!(a.carrier_ok());
        a.close();
    }
}
