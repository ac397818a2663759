//! Driver configuration.
//!
//! [`IgbParams`] carries the raw per-board parameters as the platform
//! loaded them (`None` means "not given"). [`IgbParams::validate`]
//! range-checks every value against the chip generation and produces an
//! immutable [`IgbConfig`]. Invalid values never fail initialization:
//! they are replaced by the default and logged.

use log::info;

use crate::hw::Generation;

// ═══════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════

/// Default descriptors per ring.
pub const DEFAULT_RING_COUNT: u16 = 256;
/// Minimum descriptors per ring.
pub const MIN_RING_COUNT: u16 = 80;
/// Maximum descriptors per ring.
pub const MAX_RING_COUNT: u16 = 4096;
/// Ring counts are rounded up to this multiple.
pub const RING_COUNT_MULTIPLE: u16 = 8;

/// Default interrupt throttle setting (adaptive, conservative).
pub const DEFAULT_ITR: u32 = 3;
/// Lowest accepted interrupts/s value.
pub const MIN_ITR: u32 = 120;
/// Highest accepted interrupts/s value.
pub const MAX_ITR: u32 = 100_000;

/// Maximum VFs the PF will expose.
pub const MAX_VFS: u16 = 7;
/// Default max frame: 1500 MTU + Ethernet header + VLAN tag + FCS.
pub const DEFAULT_MAX_FRAME: u32 = 1522;

// ═══════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════

/// Parameter conversion errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Value outside the parameter's range.
    OutOfRange {
        /// Parameter name.
        param: &'static str,
        /// Rejected value.
        value: u32,
    },
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfRange { param, value } => write!(f, "{} out of range: {}", param, value),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TYPED SETTINGS
// ═══════════════════════════════════════════════════════════════════════════

/// Requested interrupt mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterruptMode {
    /// Shared INTx line.
    Legacy,
    /// Single message-signaled interrupt.
    Msi,
    /// One vector per queue group plus one for other causes.
    MsiX,
}

impl TryFrom<u32> for InterruptMode {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Legacy),
            1 => Ok(Self::Msi),
            2 => Ok(Self::MsiX),
            _ => Err(ConfigError::OutOfRange {
                param: "Interrupt Mode",
                value,
            }),
        }
    }
}

/// Interrupt throttle setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItrSetting {
    /// No throttling.
    Off,
    /// Adaptive.
    Dynamic,
    /// Adaptive without the lowest-latency state.
    Conservative,
    /// Fixed EITR interval value.
    Fixed(u32),
}

impl ItrSetting {
    /// Raw setting as the hardware tuning code sees it.
    pub fn raw(&self) -> u32 {
        match self {
            ItrSetting::Off => 0,
            ItrSetting::Dynamic => 1,
            ItrSetting::Conservative => 3,
            ItrSetting::Fixed(v) => *v,
        }
    }

    /// Adaptive modes recompute the interval after every poll.
    #[inline]
    pub fn is_adaptive(&self) -> bool {
        self.raw() & 3 != 0
    }
}

impl TryFrom<u32> for ItrSetting {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::Dynamic),
            3 => Ok(Self::Conservative),
            MIN_ITR..=MAX_ITR => Ok(Self::Fixed((1_000_000_000 / (value * 256)) & !3)),
            _ => Err(ConfigError::OutOfRange {
                param: "Interrupt Throttling Rate (ints/sec)",
                value,
            }),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RAW PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════

/// Raw per-board parameters.
#[derive(Debug, Clone, Default)]
pub struct IgbParams {
    /// Interrupts per second per vector, or 0/1/3 for off/dynamic/conservative.
    pub interrupt_throttle_rate: Option<u32>,
    /// 0 legacy, 1 MSI, 2 MSI-X.
    pub int_mode: Option<u32>,
    /// Low-latency interrupt TCP port (0 = off).
    pub lli_port: Option<u32>,
    /// Low-latency interrupt packet size (0 = off).
    pub lli_size: Option<u32>,
    /// Low-latency interrupt on TCP PSH.
    pub lli_push: Option<u32>,
    /// RSS queue count (0 = one per CPU).
    pub rss: Option<u32>,
    /// VMDq pool count.
    pub vmdq: Option<u32>,
    /// Virtual functions to expose.
    pub max_vfs: Option<u32>,
    /// Pair TX and RX rings on one vector.
    pub queue_pairs: Option<u32>,
    /// TX descriptors per ring.
    pub tx_ring_count: Option<u32>,
    /// RX descriptors per ring.
    pub rx_ring_count: Option<u32>,
    /// Online CPUs, for RSS auto sizing.
    pub cpus: u32,
    /// Seed for placeholder VF MAC addresses.
    pub mac_seed: u64,
}

/// Range-checked parameter, logged the way module options are.
struct RangeOption {
    name: &'static str,
    err: &'static str,
    def: u32,
    min: u32,
    max: u32,
}

impl RangeOption {
    fn validate(&self, value: Option<u32>) -> u32 {
        let Some(v) = value else {
            return self.def;
        };
        if (self.min..=self.max).contains(&v) {
            info!("igb: {} set to {}", self.name, v);
            v
        } else {
            info!("igb: Invalid {} value specified ({}) {}", self.name, v, self.err);
            self.def
        }
    }
}

/// On/off parameter.
struct EnableOption {
    name: &'static str,
    err: &'static str,
    def: bool,
}

impl EnableOption {
    fn validate(&self, value: Option<u32>) -> bool {
        match value {
            None => self.def,
            Some(1) => {
                info!("igb: {} Enabled", self.name);
                true
            }
            Some(0) => {
                info!("igb: {} Disabled", self.name);
                false
            }
            Some(v) => {
                info!("igb: Invalid {} value specified ({}) {}", self.name, v, self.err);
                self.def
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// VALIDATED CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

/// Immutable adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgbConfig {
    /// Chip generation the values were checked against.
    pub generation: Generation,
    /// RX and TX throttle setting.
    pub itr: ItrSetting,
    /// Requested interrupt mechanism.
    pub int_mode: InterruptMode,
    /// Low-latency interrupt port (0 = off).
    pub lli_port: u16,
    /// Low-latency interrupt size (0 = off).
    pub lli_size: u16,
    /// Low-latency interrupt on TCP PSH.
    pub lli_push: bool,
    /// RSS queues.
    pub rss_queues: u16,
    /// VMDq pools.
    pub vmdq_pools: u16,
    /// Virtual functions.
    pub vfs_allocated_count: u16,
    /// TX/RX rings share a vector.
    pub queue_pairs: bool,
    /// TX descriptors per ring.
    pub tx_ring_count: u16,
    /// RX descriptors per ring.
    pub rx_ring_count: u16,
    /// Maximum frame size at start.
    pub max_frame_size: u32,
    /// Seed for placeholder VF MAC addresses.
    pub mac_seed: u64,
}

impl IgbConfig {
    /// Defaults for a generation with no parameters given.
    pub fn defaults(generation: Generation) -> Self {
        IgbParams {
            cpus: 1,
            ..IgbParams::default()
        }
        .validate(generation)
    }
}

fn ring_count(name: &'static str, value: Option<u32>) -> u16 {
    let opt = RangeOption {
        name,
        err: "using default of 256",
        def: DEFAULT_RING_COUNT as u32,
        min: MIN_RING_COUNT as u32,
        max: MAX_RING_COUNT as u32,
    };
    let count = opt.validate(value) as u16;
    let multiple = RING_COUNT_MULTIPLE;
    ((count + multiple - 1) / multiple * multiple).min(MAX_RING_COUNT)
}

impl IgbParams {
    /// Range-check every parameter for `generation`.
    pub fn validate(&self, generation: Generation) -> IgbConfig {
        // Interrupt Throttling Rate
        let itr = match self.interrupt_throttle_rate {
            None => ItrSetting::Conservative,
            Some(raw) => match ItrSetting::try_from(raw) {
                Ok(ItrSetting::Off) => {
                    info!("igb: Interrupt Throttling Rate (ints/sec) turned off");
                    ItrSetting::Off
                }
                Ok(ItrSetting::Dynamic) => {
                    info!("igb: Interrupt Throttling Rate (ints/sec) set to dynamic mode");
                    ItrSetting::Dynamic
                }
                Ok(ItrSetting::Conservative) => {
                    info!("igb: Interrupt Throttling Rate (ints/sec) set to dynamic conservative mode");
                    ItrSetting::Conservative
                }
                Ok(fixed) => {
                    info!("igb: Interrupt Throttling Rate (ints/sec) set to {}", raw);
                    fixed
                }
                Err(e) => {
                    info!("igb: Invalid value specified ({}) using default of {}", e, DEFAULT_ITR);
                    ItrSetting::Conservative
                }
            },
        };

        // Interrupt Mode
        let int_mode = RangeOption {
            name: "Interrupt Mode",
            err: "defaulting to 2 (MSI-X)",
            def: 2,
            min: 0,
            max: 2,
        }
        .validate(self.int_mode);
        let int_mode = InterruptMode::try_from(int_mode).unwrap_or(InterruptMode::MsiX);

        // Low Latency Interrupts
        let lli_port = match self.lli_port {
            Some(0) => {
                info!("igb: Low Latency Interrupt TCP Port turned off");
                0
            }
            other => RangeOption {
                name: "Low Latency Interrupt TCP Port",
                err: "using default of 0",
                def: 0,
                min: 0,
                max: 0xFFFF,
            }
            .validate(other),
        } as u16;
        let lli_size = match self.lli_size {
            Some(0) => {
                info!("igb: Low Latency Interrupt on Packet Size turned off");
                0
            }
            other => RangeOption {
                name: "Low Latency Interrupt on Packet Size",
                err: "using default of 0",
                def: 0,
                min: 0,
                max: 1500,
            }
            .validate(other),
        } as u16;
        let lli_push = EnableOption {
            name: "Low Latency Interrupt on TCP Push flag",
            err: "defaulting to Disabled",
            def: false,
        }
        .validate(self.lli_push);

        // SR-IOV
        let mut vfs = self.max_vfs.unwrap_or(0).min(u16::MAX as u32) as u16;
        if vfs > MAX_VFS {
            info!("igb: max_vfs {} exceeds {}, limiting", vfs, MAX_VFS);
            vfs = MAX_VFS;
        }
        if vfs > 0 && generation == Generation::I82575 {
            info!("igb: SR-IOV not supported on {}", generation);
            vfs = 0;
        }

        // VMDq
        let max_rss = generation.max_rss_queues() as u32;
        let mut vmdq_raw = self.vmdq;
        if vfs > 0 && vmdq_raw.unwrap_or(0) == 0 {
            if vmdq_raw.is_some() {
                info!("igb: Enabling SR-IOV requires VMDq be set to at least 1");
            }
            vmdq_raw = Some(1);
        }
        let vmdq_pools = RangeOption {
            name: "VMDQ - VMDq multiqueue receive count",
            err: "using default of 0",
            def: 0,
            min: 0,
            max: max_rss.saturating_sub(vfs as u32),
        }
        .validate(vmdq_raw) as u16;

        // RSS
        let mut rss_max = max_rss;
        if vmdq_pools > 0 {
            rss_max = match generation {
                Generation::I82576 => 2,
                Generation::I82575 if vmdq_pools == 2 => 3,
                Generation::I82575 if vmdq_pools < 2 => max_rss,
                _ => 1,
            };
        }
        let rss_opt = RangeOption {
            name: "RSS - RSS multiqueue receive count",
            err: "using default of 1",
            def: 1,
            min: 0,
            max: rss_max,
        };
        let rss_queues = match self.rss {
            None => 1,
            Some(1) => 1,
            Some(0) => rss_max.min(self.cpus.max(1)),
            other => match rss_opt.validate(other) {
                0 => rss_max.min(self.cpus.max(1)),
                v => v,
            },
        } as u16;

        // QueuePairs
        let mut qp = self.queue_pairs;
        let forced = rss_queues > 4
            || vmdq_pools > 4
            || (rss_queues > 1 && (vmdq_pools > 3 || vfs > 6));
        if forced && qp == Some(0) {
            info!("igb: Number of queues exceeds available interrupts, defaulting to Enabled");
            qp = Some(1);
        }
        let queue_pairs = EnableOption {
            name: "QueuePairs - TX/RX queue pairs for interrupt handling",
            err: "defaulting to Enabled",
            def: true,
        }
        .validate(qp);

        IgbConfig {
            generation,
            itr,
            int_mode,
            lli_port,
            lli_size,
            lli_push,
            rss_queues,
            vmdq_pools,
            vfs_allocated_count: vfs,
            queue_pairs,
            tx_ring_count: ring_count("TX descriptors", self.tx_ring_count),
            rx_ring_count: ring_count("RX descriptors", self.rx_ring_count),
            max_frame_size: DEFAULT_MAX_FRAME,
            mac_seed: self.mac_seed,
        }
    }
}
