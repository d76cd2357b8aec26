//! # `ax-wifi-core`
//! This is the packet path core of a driver for PCIe 802.11ax Wi-Fi adapters. It sits between the
//! network stack and the host controller interface (HCI) and is independent of both. The bus, the
//! firmware and the network stack are reached through the traits in [hci].
//! ## Overview
//! This chapter will give a short overview of how frames move through the core.
//!
//! ### Transmit (TX)
//! The network stack keeps one software queue per peer and TID. Whenever an access category is
//! signaled through [Device::wake_tx_queue] or [Device::tx_resource_reclaimed], the drain task
//! walks the queues of that access category in round robin order. Every queue maps to a DMA
//! channel, which only has a limited number of credits. We reclaim completed buffers, admit as
//! many frames as there are credits and build a TX WiFi descriptor (TXWD) for each of them.
//! The descriptor selects the hardware queue, the DMA channel, aggregation and security
//! parameters. Descriptor and frame are then handed to the HCI and the channel is kicked off.
//!
//! ### Aggregation
//! Data frames to a peer are checked for A-MPDU eligibility before they are encoded. If the queue
//! doesn't aggregate yet, it's put on a pending list and a background worker asks the peer for a
//! block ack session. A peer refusing with an invalid argument blocks the queue until it
//! disconnects, every other failure is retried the next time the queue carries traffic.
//!
//! ### Receive (RX)
//! Received buffers start with an RX WiFi descriptor (RXWD). The PHY status of a PPDU arrives in
//! a separate report, after the frames it describes. Frames, that can be enriched with PHY
//! status, are held back per PHY path in a [RxReassembly], keyed by the 3 bit PPDU counter of the
//! descriptor. Once the PPDU status arrives, all held back frames are released in order, and
//! those matching the rate, bandwidth and guard interval of the report receive its signal
//! strength. A frame with a different PPDU counter releases everything held back unmatched.

#![cfg_attr(not(test), no_std)]
pub(crate) mod fmt;

extern crate alloc;

pub mod budget;
pub mod channel;
mod device;
pub mod hci;
pub mod ppdu;
pub mod rate;
pub mod rx;
pub mod rx_desc;
mod sync;
pub mod telemetry;
pub mod tx_desc;
pub mod txq;

pub use device::*;
pub use rx::{RxReassembly, RxStatus};
pub use sync::{AcMask, TxqSignal};

cfg_if::cfg_if! {
    if #[cfg(feature = "critical_section")] {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    } else {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::NoopRawMutex;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CoreError {
    /// The channel definition can't be resolved.
    InvalidChannel,
    /// A buffer ended before the structure it should contain.
    Truncated,
    /// The 802.11 header of a frame is incomplete.
    MalformedHeader,
    /// The frame doesn't fit into a descriptor.
    FrameTooLong,
    /// The cipher suite can't be offloaded to the hardware.
    UnsupportedCipher(u32),
    /// The MAC info block of a PPDU status claims too many users.
    InvalidUserNum(u8),
    /// An IE of a PHY status is malformed.
    PhyStatusParse,
    /// The HCI didn't accept the frame.
    SubmissionFailed,
    /// The firmware didn't accept a command.
    FirmwareCommandFailed,
}
pub type CoreResult<T> = Result<T, CoreError>;
