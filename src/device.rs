//! The driver context.
//!
//! A [Device] owns everything the data path shares between its tasks: the hardware state changed
//! by channel switches and association handshakes, the MAC id pool, per peer telemetry, the DMA
//! channel credits and the aggregation controller. The bus, the firmware and the network stack
//! are passed in by the caller of every operation.
//!
//! ## Background tasks
//! [Device::run] drives the TX queue drainer, the block ack worker and the telemetry tracker.
//! They can also be spawned separately, through [Device::run_txq_drainer],
//! [Device::run_ba_worker] and [Device::run_tracker].

use core::cell::RefCell;

use alloc::vec::Vec;
use embassy_futures::select::select3;
use embassy_sync::blocking_mutex;
use embassy_time::{Duration, Ticker};

use crate::{
    budget::TxResourceBudget,
    channel::{get_channel_params, Band, ChanDef, ChannelParams, ChannelWidth, SubBand},
    channel::CHANNEL_WIDTH_TIERS,
    hci::{BaSession, Firmware, Hci, KeyStore, PeerInfo, Radio, SecurityContext, TxqSource},
    ppdu::PhyPpdu,
    rx::RxStatus,
    rx_desc::RxDescInfo,
    sync::TxqSignal,
    telemetry::{PeerTrack, Telemetry},
    tx_desc::{AccessCategory, AmpduParams, DmaChannel, TxDescInfo, TxFrame, TXWD_MAX_SIZE},
    txq::AggregationController,
    CoreError, CoreResult, DefaultRawMutex,
};

/// Number of MAC ids available for peers and interfaces.
pub const MAC_ID_NUM: usize = 128;
const MAC_ID_WORDS: usize = MAC_ID_NUM / 32;

/// Static configuration of the data path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Number of RF paths reported in the chain signal of received frames.
    pub rf_path_num: u8,
    /// Credits every DMA channel starts with.
    pub tx_credits: u32,
    /// Number of eligible frames on a queue, after which a block ack session is requested.
    pub ba_trigger_frames: u32,
    /// Period of the telemetry tracker.
    pub track_period_ms: u64,
}
impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            rf_path_num: 2,
            tx_credits: 256,
            ba_trigger_frames: 1,
            track_period_ms: 2000,
        }
    }
}

/// State of the hardware, that is changed by multi step handshakes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HalState {
    /// Frequency of the primary channel in MHz.
    pub freq: u16,
    /// Band of the primary channel.
    pub band: Band,
    pub current_band_width: ChannelWidth,
    pub current_channel: u8,
    pub current_primary_channel: u8,
    pub prev_primary_channel: u8,
    pub current_band_type: Band,
    pub current_subband: SubBand,
    pub cch_by_bw: [u8; CHANNEL_WIDTH_TIERS],
    pub total_sta_assoc: u32,
    pub running: bool,
}

/// The driver context.
///
/// A [Device] is shared between the TX drain task, the block ack worker, the tracker and the
/// receive path. All of its methods take `&self`. The receive path additionally owns a
/// [RxReassembly](crate::rx::RxReassembly).
pub struct Device {
    pub(crate) config: DeviceConfig,
    hal: blocking_mutex::Mutex<DefaultRawMutex, RefCell<HalState>>,
    mac_id_map: blocking_mutex::Mutex<DefaultRawMutex, RefCell<[u32; MAC_ID_WORDS]>>,
    telemetry: blocking_mutex::Mutex<DefaultRawMutex, RefCell<Telemetry>>,
    pub(crate) budget: TxResourceBudget,
    pub(crate) agg: AggregationController,
    txq_signal: TxqSignal,
}
impl Device {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            hal: blocking_mutex::Mutex::new(RefCell::new(HalState::default())),
            mac_id_map: blocking_mutex::Mutex::new(RefCell::new([0; MAC_ID_WORDS])),
            telemetry: blocking_mutex::Mutex::new(RefCell::new(Telemetry::new())),
            budget: TxResourceBudget::new(config.tx_credits),
            agg: AggregationController::new(config.ba_trigger_frames),
            txq_signal: TxqSignal::new(),
        }
    }
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
    /// A snapshot of the hardware state.
    pub fn hal(&self) -> HalState {
        self.hal.lock(|hal| *hal.borrow())
    }
    fn with_hal<R>(&self, f: impl FnOnce(&mut HalState) -> R) -> R {
        self.hal.lock(|hal| f(&mut hal.borrow_mut()))
    }
    /// Start the data path, resetting all credits.
    pub fn start(&self) {
        self.budget.reset(self.config.tx_credits);
        self.txq_signal.reset();
        self.with_hal(|hal| hal.running = true);
        info!("Data path started.");
    }
    /// Stop the data path, dropping all pending negotiations.
    pub fn stop(&self) {
        self.with_hal(|hal| hal.running = false);
        self.agg.reset();
        self.txq_signal.reset();
        info!("Data path stopped.");
    }
    pub fn is_running(&self) -> bool {
        self.with_hal(|hal| hal.running)
    }

    /// Switch to the channel described by `chandef`.
    ///
    /// An unsupported channel definition leaves the current state untouched and returns
    /// [CoreError::InvalidChannel].
    pub fn set_channel(&self, chandef: &ChanDef, radio: &mut impl Radio) -> CoreResult<ChannelParams> {
        let ch_param = get_channel_params(chandef);
        if !ch_param.is_valid() {
            error!(
                "Invalid channel: {} MHz, center {} MHz.",
                chandef.chan.center_freq,
                chandef.center_freq1
            );
            return Err(CoreError::InvalidChannel);
        }
        self.with_hal(|hal| {
            let band_type = ch_param.band();
            let band_changed = hal.current_band_type != band_type || hal.current_channel == 0;

            hal.freq = chandef.chan.center_freq;
            hal.band = chandef.chan.band;
            hal.current_band_width = ch_param.bandwidth;
            hal.current_channel = ch_param.center_chan;
            hal.prev_primary_channel = hal.current_primary_channel;
            hal.current_primary_channel = ch_param.primary_chan;
            hal.current_band_type = band_type;
            if let Some(subband) = SubBand::from_center_channel(ch_param.center_chan) {
                hal.current_subband = subband;
            }
            hal.cch_by_bw = ch_param.cch_by_bw;

            radio.set_channel_prepare();
            radio.set_channel(&ch_param);
            if band_changed {
                radio.notify_band_switch(band_type);
            }
            radio.set_txpwr();
            radio.set_channel_done();
        });
        debug!(
            "Switched to channel {}, center {}, tier {}.",
            ch_param.primary_chan,
            ch_param.center_chan,
            ch_param.bandwidth.into_bits()
        );
        Ok(ch_param)
    }

    /// Translate a receive descriptor into the status delivered to the network stack.
    pub fn update_rx_status(&self, desc_info: &RxDescInfo) -> RxStatus {
        let (freq, band) = self.with_hal(|hal| (hal.freq, hal.band));
        RxStatus::from_desc(desc_info, freq, band)
    }
    /// Feed the telemetry of a PPDU status report into the per peer statistics.
    pub fn process_phy_ppdu(&self, phy_ppdu: &PhyPpdu) {
        self.telemetry.lock(|telemetry| {
            let mut telemetry = telemetry.borrow_mut();
            if phy_ppdu.has_rssi {
                telemetry.add_rssi(phy_ppdu.mac_id, phy_ppdu.rssi_avg);
            }
            if let (true, Some(cfo)) = (phy_ppdu.valid, phy_ppdu.cfo) {
                telemetry.add_cfo(phy_ppdu.mac_id, cfo);
            }
        })
    }

    fn resolve_sec_key(frame: &TxFrame, keys: &impl KeyStore) -> Option<SecurityContext> {
        let hw_key_idx = frame.hw_key_idx?;
        let security = keys.lookup(hw_key_idx);
        if security.is_none() {
            warn!("Sec cam entry {} is empty.", hw_key_idx);
        }
        security
    }
    /// Build the descriptor for `frame`, sent to `peer`.
    pub(crate) fn tx_desc_info(
        &self,
        frame: &TxFrame,
        peer: Option<&PeerInfo>,
        ampdu: Option<AmpduParams>,
        keys: &impl KeyStore,
    ) -> CoreResult<TxDescInfo> {
        let mac_id = peer.map(|peer| peer.mac_id).unwrap_or_default();
        TxDescInfo::for_frame(frame, mac_id, ampdu, Self::resolve_sec_key(frame, keys))
    }
    /// Encode `desc_info` and hand it to the HCI together with `payload`, consuming a credit.
    pub(crate) fn tx_submit(
        &self,
        hci: &mut impl Hci,
        desc_info: &TxDescInfo,
        payload: &[u8],
    ) -> CoreResult<()> {
        let mut txdesc = [0u8; TXWD_MAX_SIZE];
        let len = desc_info.fill(&mut txdesc)?;
        hci.submit(&txdesc[..len], payload)?;
        self.budget.consume(desc_info.ch_dma, 1);
        Ok(())
    }
    /// Submit a single frame outside of the TXQ scheduler, returning the DMA channel it was
    /// queued on. The caller is responsible for kicking off the channel.
    pub fn tx_write(
        &self,
        hci: &mut impl Hci,
        keys: &impl KeyStore,
        frame: &TxFrame,
        peer: Option<&PeerInfo>,
    ) -> CoreResult<DmaChannel> {
        let ampdu = peer.map(|peer| AmpduParams {
            agg_num: 0,
            ampdu_factor: peer.ampdu_factor,
            ampdu_density: peer.ampdu_density,
        });
        let desc_info = self.tx_desc_info(frame, peer, ampdu, keys)?;
        self.tx_submit(hci, &desc_info, &frame.data)?;
        Ok(desc_info.ch_dma)
    }
    /// Start draining `ch_dma`.
    pub fn tx_kick_off(&self, hci: &mut impl Hci, ch_dma: DmaChannel) {
        hci.notify_drain(ch_dma);
    }
    /// Send a firmware command.
    pub fn h2c_tx(&self, hci: &mut impl Hci, payload: &[u8], fwdl: bool) -> CoreResult<()> {
        let pkt_size = u16::try_from(payload.len()).map_err(|_| CoreError::FrameTooLong)?;
        let desc_info = TxDescInfo::for_fw_cmd(pkt_size, fwdl);
        if let Err(err) = self.tx_submit(hci, &desc_info, payload) {
            warn!("Failed to transmit H2C: {:?}", err);
            return Err(err);
        }
        self.tx_kick_off(hci, DmaChannel::H2C);
        Ok(())
    }
    /// Request a scheduling round for `ac`.
    pub fn wake_tx_queue(&self, ac: AccessCategory) {
        self.txq_signal.signal(ac);
    }
    /// Notify the scheduler, that the hardware completed frames and credits can be reclaimed.
    pub fn tx_resource_reclaimed(&self) {
        self.txq_signal.signal_all();
    }
    /// Credits currently available on `ch_dma`.
    pub fn tx_credits(&self, ch_dma: DmaChannel) -> u32 {
        self.budget.available(ch_dma)
    }

    /// Allocate the lowest free MAC id.
    pub fn acquire_mac_id(&self) -> Option<u8> {
        self.mac_id_map.lock(|map| {
            let mut map = map.borrow_mut();
            let (word, bits) = map
                .iter_mut()
                .enumerate()
                .find(|(_, bits)| **bits != u32::MAX)?;
            let bit = bits.trailing_ones();
            *bits |= 1 << bit;
            Some((word * 32) as u8 + bit as u8)
        })
    }
    pub fn release_mac_id(&self, mac_id: u8) {
        let (word, bit) = (mac_id as usize / 32, mac_id as u32 % 32);
        self.mac_id_map.lock(|map| {
            if let Some(bits) = map.borrow_mut().get_mut(word) {
                *bits &= !(1 << bit);
            }
        })
    }

    /// A peer was added. Its aggregation state and statistics start from scratch.
    pub fn sta_add(&self, mac_id: u8) {
        self.agg.remove_sta(mac_id);
        self.telemetry
            .lock(|telemetry| telemetry.borrow_mut().add_peer(mac_id));
    }
    /// Run the association handshake with the firmware.
    pub fn sta_assoc(&self, fw: &mut impl Firmware, mac_id: u8) -> CoreResult<()> {
        self.with_hal(|hal| {
            fw.assoc_cmac_tbl(mac_id)
                .inspect_err(|_| warn!("Failed to send h2c cmac table."))?;
            fw.join_info(mac_id, false)
                .inspect_err(|_| warn!("Failed to send h2c join info."))?;
            // update cam aid mac_id net_type
            fw.update_cam(mac_id)
                .inspect_err(|_| warn!("Failed to send h2c cam."))?;
            fw.general_pkt(mac_id)
                .inspect_err(|_| warn!("Failed to send h2c general packet."))?;
            hal.total_sta_assoc += 1;
            Ok(())
        })
    }
    pub fn sta_disassoc(&self, _mac_id: u8) {
        self.with_hal(|hal| hal.total_sta_assoc = hal.total_sta_assoc.saturating_sub(1));
    }
    /// Tear down the association. Pending negotiations of the peer are purged first.
    pub fn sta_disconnect(&self, fw: &mut impl Firmware, mac_id: u8) -> CoreResult<()> {
        self.agg.free_sta_pending_ba(mac_id);
        self.with_hal(|_| {
            fw.assoc_cmac_tbl(mac_id)
                .inspect_err(|_| warn!("Failed to send h2c cmac table."))?;
            fw.join_info(mac_id, true)
                .inspect_err(|_| warn!("Failed to send h2c join info."))?;
            fw.update_cam(mac_id)
                .inspect_err(|_| warn!("Failed to send h2c cam."))
        })
    }
    /// The peer is gone for good.
    pub fn sta_remove(&self, mac_id: u8) {
        self.agg.remove_sta(mac_id);
        self.telemetry
            .lock(|telemetry| telemetry.borrow_mut().remove_peer(mac_id));
    }

    /// Summarize the per peer statistics. Returns [None] if the device isn't running.
    pub fn track(&self) -> Option<Vec<PeerTrack>> {
        if !self.is_running() {
            return None;
        }
        Some(self.telemetry.lock(|telemetry| telemetry.borrow_mut().track()))
    }

    /// Drain the TX queues whenever an access category is signaled.
    pub async fn run_txq_drainer(
        &self,
        txqs: &mut impl TxqSource,
        hci: &mut impl Hci,
        keys: &impl KeyStore,
    ) {
        loop {
            let pending = self.txq_signal.wait().await;
            for ac in pending.iter() {
                self.txq_schedule(ac, txqs, hci, keys);
            }
        }
    }
    /// Start block ack sessions whenever the scheduler requests it.
    pub async fn run_ba_worker(&self, sessions: &mut impl BaSession) {
        loop {
            self.agg.wait_work().await;
            self.ba_work(sessions);
        }
    }
    /// Periodically summarize the per peer statistics and hand them to `on_track`.
    pub async fn run_tracker(&self, mut on_track: impl FnMut(&[PeerTrack])) {
        let mut ticker = Ticker::every(Duration::from_millis(self.config.track_period_ms));
        loop {
            ticker.next().await;
            if let Some(tracks) = self.track() {
                on_track(&tracks);
            }
        }
    }
    /// Run all background tasks of the data path.
    pub async fn run(
        &self,
        txqs: &mut impl TxqSource,
        hci: &mut impl Hci,
        keys: &impl KeyStore,
        sessions: &mut impl BaSession,
        on_track: impl FnMut(&[PeerTrack]),
    ) {
        select3(
            self.run_txq_drainer(txqs, hci, keys),
            self.run_ba_worker(sessions),
            self.run_tracker(on_track),
        )
        .await;
    }
}
