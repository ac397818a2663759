//! Time and timing module.
//!
//! The driver never reads a clock itself. Callers pass `now` as a tick
//! count from a monotonic source, and [`TimeoutConfig`] turns the named
//! driver intervals into ticks.

/// Timeout configuration derived from the tick frequency.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    ticks_per_ms: u64,
}

impl TimeoutConfig {
    /// Create from tick frequency (ticks per second).
    pub fn new(tick_freq: u64) -> Self {
        Self {
            ticks_per_ms: (tick_freq / 1_000).max(1),
        }
    }

    /// Minimum spacing between NACKs to a VF that is not clear to send (2 seconds)
    #[inline]
    pub fn vf_nack_interval(&self) -> u64 {
        2_000 * self.ticks_per_ms
    }

    /// Watchdog period (2 seconds)
    #[inline]
    pub fn watchdog_period(&self) -> u64 {
        2_000 * self.ticks_per_ms
    }

    /// Base TX hang window (1 second), scaled by the link's timeout factor
    #[inline]
    pub fn tx_hang(&self, factor: u32) -> u64 {
        1_000 * self.ticks_per_ms * factor as u64
    }

    /// Settle time after disabling RX/TX before reset (10ms)
    #[inline]
    pub fn quiesce(&self) -> u64 {
        10 * self.ticks_per_ms
    }

    /// Convert milliseconds to ticks
    #[inline]
    pub fn ms_to_ticks(&self, ms: u64) -> u64 {
        ms * self.ticks_per_ms
    }

    /// Convert ticks to milliseconds
    #[inline]
    pub fn ticks_to_ms(&self, ticks: u64) -> u64 {
        ticks / self.ticks_per_ms
    }
}

/// `true` once `now` is strictly past `since + window`.
#[inline]
pub fn time_after(now: u64, since: u64, window: u64) -> bool {
    now > since.saturating_add(window)
}

/// Monotonic tick source supplied by the platform (TSC or similar).
pub trait Clock {
    /// Current tick count.
    fn ticks(&self) -> u64;
}

impl<F: Fn() -> u64> Clock for F {
    fn ticks(&self) -> u64 {
        self()
    }
}

/// Busy-wait for `ticks`.
pub fn delay<C: Clock + ?Sized>(clock: &C, ticks: u64) {
    let start = clock.ticks();
    while clock.ticks().wrapping_sub(start) < ticks {
        core::hint::spin_loop();
    }
}
