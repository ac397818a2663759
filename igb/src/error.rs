//! Driver error types.
//!
//! Every fallible operation in the crate returns [`Result`]. Sub-module
//! errors convert into [`IgbError`] so `?` works across layers.

use crate::config::ConfigError;
use crate::dma::DmaError;
use crate::mailbox::MailboxError;

// ═══════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════

/// Top-level driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgbError {
    /// Descriptor memory or a buffer-ownership table could not be allocated.
    OutOfMemory,
    /// A streaming DMA mapping failed.
    DmaMapping,
    /// Ring descriptor count outside the supported range.
    InvalidRingSize {
        /// Requested count.
        requested: u16,
    },
    /// Fewer vectors than rings on one side of the map.
    InsufficientVectors {
        /// Vectors available.
        vectors: usize,
        /// Rings that need a vector.
        rings: usize,
    },
    /// Even the legacy interrupt could not be set up.
    InterruptSetup,
    /// A reset is in progress; retry later.
    Busy,
    /// Adapter is down.
    Down,
    /// MTU outside the supported frame size range.
    InvalidMtu {
        /// Requested MTU.
        mtu: u32,
    },
    /// Ring or vector index out of range.
    InvalidIndex,
    /// Hardware did not clear a queue-enable bit in time.
    QueueDisableTimeout {
        /// Queue register index.
        reg_idx: u16,
    },
    /// Fragment does not fit in a single data descriptor.
    FragmentTooLarge {
        /// Fragment length.
        len: usize,
    },
    /// Configuration error.
    Config(ConfigError),
    /// DMA layer error.
    Dma(DmaError),
    /// Mailbox error.
    Mailbox(MailboxError),
}

impl core::fmt::Display for IgbError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "Out of memory"),
            Self::DmaMapping => write!(f, "DMA mapping failed"),
            Self::InvalidRingSize { requested } => {
                write!(f, "Invalid ring size {}", requested)
            }
            Self::InsufficientVectors { vectors, rings } => {
                write!(f, "{} vectors cannot serve {} rings", vectors, rings)
            }
            Self::InterruptSetup => write!(f, "Unable to set up interrupts"),
            Self::Busy => write!(f, "Adapter busy"),
            Self::Down => write!(f, "Adapter down"),
            Self::InvalidMtu { mtu } => write!(f, "Invalid MTU setting {}", mtu),
            Self::InvalidIndex => write!(f, "Index out of range"),
            Self::QueueDisableTimeout { reg_idx } => {
                write!(f, "Queue {} did not stop", reg_idx)
            }
            Self::FragmentTooLarge { len } => write!(f, "Fragment of {} bytes too large", len),
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::Dma(e) => write!(f, "DMA error: {}", e),
            Self::Mailbox(e) => write!(f, "Mailbox error: {}", e),
        }
    }
}

impl From<ConfigError> for IgbError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<DmaError> for IgbError {
    fn from(e: DmaError) -> Self {
        match e {
            DmaError::OutOfMemory => Self::OutOfMemory,
            DmaError::MappingFailed => Self::DmaMapping,
            other => Self::Dma(other),
        }
    }
}

impl From<MailboxError> for IgbError {
    fn from(e: MailboxError) -> Self {
        Self::Mailbox(e)
    }
}

/// Crate result alias.
pub type Result<T> = core::result::Result<T, IgbError>;
