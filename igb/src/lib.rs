//! Intel 82575/82576/82580 (igb) ring, interrupt and SR-IOV core.
//!
//! Hardware-facing half of an igb physical-function driver: descriptor
//! rings, interrupt vectors and throttling, the transmit/receive data path
//! and the PF side of the VF mailbox. PCI discovery, the network stack and
//! the timer/IRQ plumbing belong to the platform and reach the driver
//! through small capability traits.
//!
//! # Capabilities
//!
//! - [`hw::RegisterAccess`]: 32-bit MMIO ([`hw::Mmio`] for real hardware)
//! - [`dma::DmaMapper`]: streaming and coherent DMA ([`dma::IdentityDma`])
//! - [`interrupt::InterruptPlatform`]: MSI-X / MSI / legacy setup
//! - [`time::Clock`]: monotonic ticks
//! - [`mailbox::MailboxTransport`]: VF mailbox ([`mailbox::PfMailbox`])
//!
//! # Usage
//!
//! ```ignore
//! let cfg = IgbParams::default().validate(Generation::I82576);
//! let hw = Hw::new(unsafe { Mmio::new(bar0) }, Generation::I82576);
//! let mut adapter = Adapter::new(hw, dma, clock, cfg, timeouts, mac, &mut platform)?;
//! adapter.open()?;
//! adapter.transmit(0, TxPacket::new(frame));
//! adapter.poll_signalled(&signal, 64, &mut sink)?;
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod adapter;
pub mod config;
pub mod dma;
pub mod error;
pub mod filter;
pub mod hw;
pub mod interrupt;
pub mod itr;
pub mod mailbox;
pub mod ring;
pub mod rx;
pub mod stats;
pub mod time;
pub mod tx;
pub mod vector;
pub mod watchdog;

#[cfg(test)]
mod testutil;

pub use adapter::{Adapter, AdapterState};
pub use config::{IgbConfig, IgbParams, InterruptMode, ItrSetting};
pub use dma::{DmaMapper, IdentityDma};
pub use error::{IgbError, Result};
pub use hw::{Generation, Hw, RegisterAccess};
pub use interrupt::{InterruptPlatform, VectorSignal};
pub use rx::{RxPacket, RxSink};
pub use time::{Clock, TimeoutConfig};
pub use tx::{TxPacket, TxStatus};
