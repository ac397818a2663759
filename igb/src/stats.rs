//! Driver statistics.
//!
//! Ring counters are updated only by the ring's poll task; the watchdog
//! folds them into [`AdapterStats`].

/// Counters shared by both ring directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Packets completed.
    pub packets: u64,
    /// Bytes completed.
    pub bytes: u64,
}

/// Per-TX-ring counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxRingStats {
    /// Packets and bytes.
    pub ring: RingStats,
    /// Queue woken after being stopped for space.
    pub restart_queue: u64,
    /// Transmit refused for lack of descriptors.
    pub tx_busy: u64,
    /// Packets dropped because a fragment could not be mapped.
    pub tx_dma_failed: u64,
    /// Unit hangs detected on this ring.
    pub tx_hang: u64,
}

/// Per-RX-ring counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxRingStats {
    /// Packets and bytes.
    pub ring: RingStats,
    /// Hardware reported an L3/L4 checksum error.
    pub csum_err: u64,
    /// Replacement buffer allocation or mapping failed.
    pub alloc_failed: u64,
    /// SCTP checksum errors on 60-byte frames, ignored as false positives.
    pub sctp_false_positive: u64,
    /// Frames dropped for hardware-reported frame errors.
    pub frame_errors: u64,
}

/// Adapter-wide totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterStats {
    /// Packets received.
    pub rx_packets: u64,
    /// Bytes received.
    pub rx_bytes: u64,
    /// Packets transmitted.
    pub tx_packets: u64,
    /// Bytes transmitted.
    pub tx_bytes: u64,
    /// RX checksum errors.
    pub hw_csum_err: u64,
    /// RX buffer allocation failures.
    pub alloc_rx_buff_failed: u64,
    /// RX frame errors.
    pub rx_frame_errors: u64,
    /// TX queue restarts.
    pub restart_queue: u64,
    /// TX busy returns.
    pub tx_busy: u64,
    /// TX mapping failures.
    pub tx_dma_failed: u64,
    /// TX unit hangs detected.
    pub tx_hang_count: u64,
    /// Resets scheduled for a stuck transmitter.
    pub tx_timeout_count: u64,
    /// Completed adapter resets.
    pub reset_count: u64,
    /// DMA out-of-sync events reported by hardware.
    pub doosync: u64,
}

impl AdapterStats {
    /// Recompute ring-derived totals; adapter-level event counters are kept.
    pub fn refresh<'a>(
        &mut self,
        tx: impl IntoIterator<Item = &'a TxRingStats>,
        rx: impl IntoIterator<Item = &'a RxRingStats>,
    ) {
        self.tx_packets = 0;
        self.tx_bytes = 0;
        self.restart_queue = 0;
        self.tx_busy = 0;
        self.tx_dma_failed = 0;
        self.tx_hang_count = 0;
        for t in tx {
            self.tx_packets += t.ring.packets;
            self.tx_bytes += t.ring.bytes;
            self.restart_queue += t.restart_queue;
            self.tx_busy += t.tx_busy;
            self.tx_dma_failed += t.tx_dma_failed;
            self.tx_hang_count += t.tx_hang;
        }

        self.rx_packets = 0;
        self.rx_bytes = 0;
        self.hw_csum_err = 0;
        self.alloc_rx_buff_failed = 0;
        self.rx_frame_errors = 0;
        for r in rx {
            self.rx_packets += r.ring.packets;
            self.rx_bytes += r.ring.bytes;
            self.hw_csum_err += r.csum_err;
            self.alloc_rx_buff_failed += r.alloc_failed;
            self.rx_frame_errors += r.frame_errors;
        }
    }
}
