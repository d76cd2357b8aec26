//! The receive path.
//!
//! Data frames and the PPDU status describing them arrive separately. Frames eligible for PHY
//! status enrichment are held back per PHY path until the matching PPDU status report arrives,
//! or until a frame of a different PPDU shows up, at which point they are released unmatched.

use alloc::collections::VecDeque;

use crate::{
    channel::Band,
    device::Device,
    hci::RxSink,
    ppdu::{ChainSignal, PhyPpdu},
    rate::{HeGi, RateInfoBw, RxEncoding},
    rx_desc::{RxDescInfo, RxPktType},
};

/// Number of PHYs, each with its own PPDU counter.
pub const PHY_PATH_NUM: usize = 2;
/// PPDU counters above this are never matched.
pub const MAX_PPDU_CNT: u8 = 8;
/// The counter value before the first frame was seen.
const PPDU_CNT_IDLE: u8 = u8::MAX;

/// Metadata delivered alongside every received frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RxStatus {
    pub freq: u16,
    pub band: Band,
    /// ICV or CRC32 failure.
    pub fcs_failed: bool,
    pub decrypted: bool,
    pub bw: RateInfoBw,
    pub encoding: RxEncoding,
    pub rate_idx: u8,
    /// Spatial streams, for VHT and HE.
    pub nss: Option<u8>,
    pub he_gi: Option<HeGi>,
    /// Value of the free running counter at the start of the frame.
    pub mactime: u32,
    /// Present, if the frame was matched with a PPDU status.
    pub signal: Option<ChainSignal>,
}
impl RxStatus {
    /// Translate a receive descriptor, received while tuned to `freq` on `band`.
    pub fn from_desc(desc_info: &RxDescInfo, freq: u16, band: Band) -> Self {
        let (encoding, rate_idx) = desc_info.data_rate.rate_index(band);
        Self {
            freq,
            band,
            fcs_failed: desc_info.icv_err || desc_info.crc32_err,
            decrypted: desc_info.hw_dec && !(desc_info.sw_dec || desc_info.icv_err),
            bw: desc_info.rate_info_bw(),
            encoding,
            rate_idx,
            nss: desc_info.data_rate.spatial_streams(),
            he_gi: desc_info.he_gi(),
            mactime: desc_info.free_run_cnt,
            signal: None,
        }
    }
    /// Whether this frame belongs to the PPDU described by the report `desc_info`.
    fn matches_report(&self, desc_info: &RxDescInfo) -> bool {
        let (_, rate_idx) = desc_info.data_rate.rate_index(self.band);
        let he_gi = desc_info.he_gi();
        self.rate_idx == rate_idx
            && he_gi.is_some()
            && self.he_gi == he_gi
            && self.bw == desc_info.rate_info_bw()
    }
}

struct PpduPath<F> {
    curr_rx_ppdu_cnt: u8,
    rx_queue: VecDeque<(F, RxStatus)>,
}
impl<F> PpduPath<F> {
    const fn new() -> Self {
        Self {
            curr_rx_ppdu_cnt: PPDU_CNT_IDLE,
            rx_queue: VecDeque::new(),
        }
    }
    fn flush(&mut self, sink: &mut impl RxSink<F>) {
        while let Some((frame, status)) = self.rx_queue.pop_front() {
            sink.deliver(frame, status);
        }
    }
}

/// Reassembles frames with their PPDU status.
///
/// This is owned by the receive context. Each PHY path has a single producer and consumer, so no
/// locking is needed.
pub struct RxReassembly<F> {
    paths: [PpduPath<F>; PHY_PATH_NUM],
}
impl<F: AsRef<[u8]>> RxReassembly<F> {
    pub const fn new() -> Self {
        Self {
            paths: [PpduPath::new(), PpduPath::new()],
        }
    }
    /// Process a received buffer, described by `desc_info`.
    pub fn rx(
        &mut self,
        device: &Device,
        desc_info: &RxDescInfo,
        frame: F,
        sink: &mut impl RxSink<F>,
    ) {
        if desc_info.pkt_type != RxPktType::Wifi {
            self.process_report(device, desc_info, frame, sink);
            return;
        }
        let path = &mut self.paths[desc_info.phy_path()];
        if path.curr_rx_ppdu_cnt != desc_info.ppdu_cnt {
            path.flush(sink);
            path.curr_rx_ppdu_cnt = desc_info.ppdu_cnt;
        }
        let status = device.update_rx_status(desc_info);
        if desc_info.wants_ppdu_status() {
            path.rx_queue.push_back((frame, status));
        } else {
            sink.deliver(frame, status);
        }
    }
    fn process_report(
        &mut self,
        device: &Device,
        desc_info: &RxDescInfo,
        frame: F,
        sink: &mut impl RxSink<F>,
    ) {
        match desc_info.pkt_type {
            RxPktType::C2h => sink.c2h(frame),
            RxPktType::PpduStat => self.process_ppdu_sts(device, desc_info, frame, sink),
            _ => debug!("Unhandled pkt_type {}", desc_info.pkt_type.into_bits()),
        }
    }
    fn process_ppdu_sts(
        &mut self,
        device: &Device,
        desc_info: &RxDescInfo,
        frame: F,
        sink: &mut impl RxSink<F>,
    ) {
        let phy_ppdu = match desc_info.payload(frame.as_ref()) {
            Ok(payload) => PhyPpdu::parse(desc_info, payload),
            Err(_) => {
                warn!("PPDU status of {} bytes is truncated.", frame.as_ref().len());
                PhyPpdu::parse(desc_info, &[])
            }
        };
        device.process_phy_ppdu(&phy_ppdu);
        self.pending_frames(device, &phy_ppdu, desc_info, sink);
    }
    /// Release every frame queued on the path of the report, enriching those it describes.
    fn pending_frames(
        &mut self,
        device: &Device,
        phy_ppdu: &PhyPpdu,
        desc_info: &RxDescInfo,
        sink: &mut impl RxSink<F>,
    ) {
        let path = &mut self.paths[phy_ppdu.phy_path];
        let curr = path.curr_rx_ppdu_cnt;
        if curr > MAX_PPDU_CNT {
            return;
        }
        let chain_signal = phy_ppdu
            .valid
            .then(|| phy_ppdu.chain_signal(device.config().rf_path_num as usize));
        while let Some((frame, mut status)) = path.rx_queue.pop_front() {
            if let Some(chain_signal) = chain_signal {
                if curr == desc_info.ppdu_cnt && status.matches_report(desc_info) {
                    status.signal = Some(chain_signal);
                }
            }
            sink.deliver(frame, status);
        }
    }
    /// Release every held back frame unmatched, for example on teardown.
    pub fn flush(&mut self, sink: &mut impl RxSink<F>) {
        for path in self.paths.iter_mut() {
            path.flush(sink);
            path.curr_rx_ppdu_cnt = PPDU_CNT_IDLE;
        }
    }
    /// Number of frames held back on `phy_path`.
    pub fn pending(&self, phy_path: usize) -> usize {
        self.paths
            .get(phy_path)
            .map(|path| path.rx_queue.len())
            .unwrap_or_default()
    }
    /// The PPDU counter currently collected on `phy_path`.
    pub fn curr_ppdu_cnt(&self, phy_path: usize) -> Option<u8> {
        self.paths
            .get(phy_path)
            .map(|path| path.curr_rx_ppdu_cnt)
            .filter(|cnt| *cnt != PPDU_CNT_IDLE)
    }
}
impl<F: AsRef<[u8]>> Default for RxReassembly<F> {
    fn default() -> Self {
        Self::new()
    }
}
