//! Interfaces to the collaborators of the data path.
//!
//! The core doesn't own the bus, the network stack or the station table. These traits are the
//! seams through which it reaches them.

use crate::{
    channel::{Band, ChannelParams},
    rx::RxStatus,
    tx_desc::{AccessCategory, DmaChannel, TxFrame},
    CoreResult,
};

/// The host controller interface, that moves descriptors and frames to the hardware.
pub trait Hci {
    /// Queue a descriptor and its payload for DMA.
    fn submit(&mut self, desc: &[u8], payload: &[u8]) -> CoreResult<()>;
    /// Start draining everything queued on `ch_dma`.
    fn notify_drain(&mut self, ch_dma: DmaChannel);
    /// Reclaim completed buffers on `ch_dma`, returning how many were freed.
    fn reclaim_credits(&mut self, ch_dma: DmaChannel) -> u32;
}

/// The upper layer, that receives frames.
pub trait RxSink<F> {
    /// Hand a frame to the network stack. This must not block.
    fn deliver(&mut self, frame: F, status: RxStatus);
    /// Hand a firmware event to the firmware layer.
    fn c2h(&mut self, frame: F) {
        let _ = frame;
        debug!("Dropping C2H, no handler installed.");
    }
}

/// The hardware security context of a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecurityContext {
    /// The cipher suite selector of the key.
    pub cipher: u32,
    /// The security CAM slot holding the key.
    pub sec_cam_idx: u8,
}

/// Key management, resolving hardware key indices.
pub trait KeyStore {
    fn lookup(&self, hw_key_idx: u8) -> Option<SecurityContext>;
}

/// What the core needs to know about an associated peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerInfo {
    pub mac_id: u8,
    pub addr: [u8; 6],
    /// Maximum A-MPDU length exponent.
    pub ampdu_factor: u8,
    /// Minimum MPDU start spacing.
    pub ampdu_density: u8,
}

/// The station table.
pub trait Stations {
    /// Resolve a MAC id to a peer. Returns [None] if the peer is gone.
    fn peer(&self, mac_id: u8) -> Option<PeerInfo>;
}

/// Identifies a software TX queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxqId {
    /// The peer this queue belongs to. [None] for queues of the interface itself.
    pub mac_id: Option<u8>,
    pub tid: u8,
}
impl TxqId {
    pub const fn ac(&self) -> AccessCategory {
        AccessCategory::from_tid(self.tid)
    }
}

/// The software TX queues of the network stack.
///
/// A queue whose peer has gone away must report a depth of zero and dequeue nothing.
pub trait TxqSource: Stations {
    fn schedule_start(&mut self, _ac: AccessCategory) {}
    /// The next queue of `ac` in round robin order.
    fn next_txq(&mut self, ac: AccessCategory) -> Option<TxqId>;
    /// Number of frames queued on `txq`.
    fn depth(&self, txq: TxqId) -> usize;
    fn dequeue(&mut self, txq: TxqId) -> Option<TxFrame>;
    fn return_txq(&mut self, _txq: TxqId) {}
    fn schedule_end(&mut self, _ac: AccessCategory) {}
}

/// Why a block ack session couldn't be started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BaStartError {
    /// The peer or the TID doesn't support aggregation. Retrying is pointless.
    InvalidArgument,
    /// A session setup is already in progress.
    Busy,
    Other(i32),
}
impl BaStartError {
    /// Whether the queue must never be proposed for aggregation again.
    pub const fn blocks_queue(&self) -> bool {
        matches!(self, Self::InvalidArgument)
    }
}

/// Block ack session management of the network stack.
pub trait BaSession: Stations {
    /// Ask the peer for a TX block ack session. Completion is reported through
    /// [crate::Device::ampdu_action].
    fn start_tx_ba_session(&mut self, peer: &PeerInfo, tid: u8) -> Result<(), BaStartError>;
}

/// The radio, that is retuned on channel switches.
pub trait Radio {
    fn set_channel_prepare(&mut self) {}
    fn set_channel(&mut self, params: &ChannelParams);
    fn notify_band_switch(&mut self, _band: Band) {}
    fn set_txpwr(&mut self) {}
    fn set_channel_done(&mut self) {}
}

/// Firmware commands issued during the association handshake.
pub trait Firmware {
    fn assoc_cmac_tbl(&mut self, mac_id: u8) -> CoreResult<()>;
    fn join_info(&mut self, mac_id: u8, disconnect: bool) -> CoreResult<()>;
    fn update_cam(&mut self, mac_id: u8) -> CoreResult<()>;
    fn general_pkt(&mut self, mac_id: u8) -> CoreResult<()>;
}
