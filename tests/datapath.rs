use std::collections::{BTreeMap, VecDeque};

use ax_wifi_core::{
    hci::{
        BaSession, BaStartError, Firmware, Hci, KeyStore, PeerInfo, RxSink, SecurityContext,
        Stations, TxqId, TxqSource,
    },
    rate::DataRate,
    rx_desc::{RxDescInfo, RxFrameType, RxPktType},
    tx_desc::{
        AccessCategory, DmaChannel, SecKeyType, TxDescInfo, TxFrame, TxQueueSelect,
        WLAN_CIPHER_SUITE_CCMP, TXWD_BODY_SIZE,
    },
    txq::{AmpduAction, TxqKey},
    CoreError, CoreResult, Device, DeviceConfig, RxReassembly, RxStatus,
};
use embassy_futures::{block_on, select::select, yield_now};

const PEER: PeerInfo = PeerInfo {
    mac_id: 1,
    addr: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
    ampdu_factor: 3,
    ampdu_density: 5,
};

#[derive(Default)]
struct MockHci {
    submitted: Vec<(TxDescInfo, Vec<u8>)>,
    kicked: Vec<DmaChannel>,
    reclaim: u32,
    fail_at: Option<usize>,
}
impl Hci for MockHci {
    fn submit(&mut self, desc: &[u8], payload: &[u8]) -> CoreResult<()> {
        if self.fail_at == Some(self.submitted.len()) {
            self.fail_at = None;
            return Err(CoreError::SubmissionFailed);
        }
        self.submitted
            .push((TxDescInfo::parse(desc).unwrap(), payload.to_vec()));
        Ok(())
    }
    fn notify_drain(&mut self, ch_dma: DmaChannel) {
        self.kicked.push(ch_dma);
    }
    fn reclaim_credits(&mut self, _ch_dma: DmaChannel) -> u32 {
        core::mem::take(&mut self.reclaim)
    }
}

struct MockStack {
    peers: Vec<PeerInfo>,
    queues: BTreeMap<TxqId, VecDeque<TxFrame>>,
    round: VecDeque<TxqId>,
    ba_requests: Vec<(u8, u8)>,
    ba_result: Result<(), BaStartError>,
}
impl MockStack {
    fn new() -> Self {
        Self {
            peers: vec![PEER],
            queues: BTreeMap::new(),
            round: VecDeque::new(),
            ba_requests: Vec::new(),
            ba_result: Ok(()),
        }
    }
    fn enqueue(&mut self, txq: TxqId, frame: TxFrame) {
        self.queues.entry(txq).or_default().push_back(frame);
    }
    fn peer_present(&self, txq: TxqId) -> bool {
        txq.mac_id
            .map(|mac_id| self.peer(mac_id).is_some())
            .unwrap_or(true)
    }
}
impl Stations for MockStack {
    fn peer(&self, mac_id: u8) -> Option<PeerInfo> {
        self.peers.iter().find(|peer| peer.mac_id == mac_id).copied()
    }
}
impl TxqSource for MockStack {
    fn schedule_start(&mut self, ac: AccessCategory) {
        self.round = self
            .queues
            .iter()
            .filter(|(txq, frames)| txq.ac() == ac && !frames.is_empty())
            .map(|(txq, _)| *txq)
            .collect();
    }
    fn next_txq(&mut self, _ac: AccessCategory) -> Option<TxqId> {
        self.round.pop_front()
    }
    fn depth(&self, txq: TxqId) -> usize {
        if !self.peer_present(txq) {
            return 0;
        }
        self.queues.get(&txq).map(VecDeque::len).unwrap_or(0)
    }
    fn dequeue(&mut self, txq: TxqId) -> Option<TxFrame> {
        if !self.peer_present(txq) {
            return None;
        }
        self.queues.get_mut(&txq)?.pop_front()
    }
}
impl BaSession for MockStack {
    fn start_tx_ba_session(&mut self, peer: &PeerInfo, tid: u8) -> Result<(), BaStartError> {
        self.ba_requests.push((peer.mac_id, tid));
        self.ba_result
    }
}

struct Keys;
impl KeyStore for Keys {
    fn lookup(&self, hw_key_idx: u8) -> Option<SecurityContext> {
        match hw_key_idx {
            0 => Some(SecurityContext {
                cipher: WLAN_CIPHER_SUITE_CCMP,
                sec_cam_idx: 4,
            }),
            // GCMP-256 can't be offloaded.
            1 => Some(SecurityContext {
                cipher: 0x000f_ac09,
                sec_cam_idx: 5,
            }),
            _ => None,
        }
    }
}

struct NoFirmware;
impl Firmware for NoFirmware {
    fn assoc_cmac_tbl(&mut self, _mac_id: u8) -> CoreResult<()> {
        Ok(())
    }
    fn join_info(&mut self, _mac_id: u8, _disconnect: bool) -> CoreResult<()> {
        Ok(())
    }
    fn update_cam(&mut self, _mac_id: u8) -> CoreResult<()> {
        Ok(())
    }
    fn general_pkt(&mut self, _mac_id: u8) -> CoreResult<()> {
        Ok(())
    }
}

/// Block ack sessions of a peer, that disconnects while the session is being set up.
struct DisconnectOnSetup<'a> {
    device: &'a Device,
}
impl Stations for DisconnectOnSetup<'_> {
    fn peer(&self, mac_id: u8) -> Option<PeerInfo> {
        (mac_id == PEER.mac_id).then_some(PEER)
    }
}
impl BaSession for DisconnectOnSetup<'_> {
    fn start_tx_ba_session(&mut self, peer: &PeerInfo, _tid: u8) -> Result<(), BaStartError> {
        self.device.sta_disconnect(&mut NoFirmware, peer.mac_id).unwrap();
        Err(BaStartError::InvalidArgument)
    }
}

fn qos_data(tid: u8, seq: u16) -> TxFrame {
    let mut data = vec![0u8; 40];
    data[0] = 0x88;
    data[4..10].copy_from_slice(&PEER.addr);
    data[22..24].copy_from_slice(&(seq << 4).to_le_bytes());
    TxFrame {
        data,
        tid,
        ..Default::default()
    }
}

fn peer_txq(tid: u8) -> TxqId {
    TxqId {
        mac_id: Some(PEER.mac_id),
        tid,
    }
}

fn device(tx_credits: u32) -> Device {
    let device = Device::new(DeviceConfig {
        tx_credits,
        ..Default::default()
    });
    device.start();
    device
}

#[test]
fn scheduler_admits_only_available_credits() {
    let device = device(3);
    let mut stack = MockStack::new();
    let mut hci = MockHci::default();
    for seq in 0..5 {
        stack.enqueue(peer_txq(0), qos_data(0, seq));
    }

    assert_eq!(
        device.txq_schedule(AccessCategory::BestEffort, &mut stack, &mut hci, &Keys),
        3
    );
    assert_eq!(hci.submitted.len(), 3);
    assert_eq!(stack.depth(peer_txq(0)), 2);
    assert_eq!(hci.kicked, [DmaChannel::Ach0]);
    assert_eq!(device.tx_credits(DmaChannel::Ach0), 0);

    // Without credits nothing moves and the channel isn't kicked.
    assert_eq!(
        device.txq_schedule(AccessCategory::BestEffort, &mut stack, &mut hci, &Keys),
        0
    );
    assert_eq!(hci.kicked.len(), 1);

    // Completions free credits for the rest.
    hci.reclaim = 10;
    assert_eq!(
        device.txq_schedule(AccessCategory::BestEffort, &mut stack, &mut hci, &Keys),
        2
    );
    let seqs: Vec<u16> = hci.submitted.iter().map(|(desc, _)| desc.seq).collect();
    assert_eq!(seqs, [0, 1, 2, 3, 4]);
    assert_eq!(device.tx_credits(DmaChannel::Ach0), 8);
}

#[test]
fn submission_failure_ends_the_round_for_that_queue_only() {
    let device = device(16);
    let mut stack = MockStack::new();
    let mut hci = MockHci {
        fail_at: Some(1),
        ..Default::default()
    };
    for seq in 0..4 {
        stack.enqueue(peer_txq(0), qos_data(0, seq));
        stack.enqueue(peer_txq(3), qos_data(3, 100 + seq));
    }

    device.txq_schedule(AccessCategory::BestEffort, &mut stack, &mut hci, &Keys);
    // The first queue lost one frame and kept the remaining two. The second drained fully.
    assert_eq!(stack.depth(peer_txq(0)), 2);
    assert_eq!(stack.depth(peer_txq(3)), 0);
    assert_eq!(hci.submitted.len(), 5);
    assert_eq!(hci.kicked, [DmaChannel::Ach0, DmaChannel::Ach0]);
}

#[test]
fn aggregation_is_negotiated_in_the_background() {
    let device = device(64);
    let mut stack = MockStack::new();
    let mut hci = MockHci::default();
    stack.enqueue(peer_txq(0), qos_data(0, 0));
    device.txq_schedule_all(&mut stack, &mut hci, &Keys);
    assert!(!hci.submitted[0].0.agg_en);

    assert_eq!(device.ba_work(&mut stack), 1);
    assert_eq!(stack.ba_requests, [(PEER.mac_id, 0)]);
    device.ampdu_action(
        TxqKey {
            mac_id: PEER.mac_id,
            tid: 0,
        },
        AmpduAction::TxOperational { buf_size: 32 },
    );

    stack.enqueue(peer_txq(0), qos_data(0, 1));
    device.txq_schedule_all(&mut stack, &mut hci, &Keys);
    let desc = hci.submitted[1].0;
    assert!(desc.agg_en);
    assert_eq!(desc.ampdu_num, 31);
    assert_eq!(desc.ampdu_density, PEER.ampdu_density);
    assert_eq!(desc.mac_id, PEER.mac_id);
}

#[test]
fn voice_is_never_aggregated() {
    let device = device(64);
    let mut stack = MockStack::new();
    let mut hci = MockHci::default();
    for seq in 0..8 {
        stack.enqueue(peer_txq(6), qos_data(6, seq));
    }
    device.txq_schedule_all(&mut stack, &mut hci, &Keys);
    assert_eq!(hci.submitted.len(), 8);
    assert_eq!(hci.kicked, [DmaChannel::Ach3]);
    assert_eq!(device.ba_work(&mut stack), 0);
    assert!(stack.ba_requests.is_empty());
}

#[test]
fn rejected_peer_stays_blocked_until_disconnect() {
    let device = device(64);
    let mut stack = MockStack::new();
    stack.ba_result = Err(BaStartError::InvalidArgument);
    let mut hci = MockHci::default();

    stack.enqueue(peer_txq(0), qos_data(0, 0));
    device.txq_schedule_all(&mut stack, &mut hci, &Keys);
    assert_eq!(device.ba_work(&mut stack), 1);

    for seq in 1..10 {
        stack.enqueue(peer_txq(0), qos_data(0, seq));
        device.txq_schedule_all(&mut stack, &mut hci, &Keys);
    }
    assert_eq!(device.ba_work(&mut stack), 0);
    assert_eq!(stack.ba_requests.len(), 1);

    device.sta_disconnect(&mut NoFirmware, PEER.mac_id).unwrap();
    stack.ba_result = Ok(());
    stack.enqueue(peer_txq(0), qos_data(0, 10));
    device.txq_schedule_all(&mut stack, &mut hci, &Keys);
    assert_eq!(device.ba_work(&mut stack), 1);
    assert_eq!(stack.ba_requests.len(), 2);
}

#[test]
fn disconnect_during_setup_lifts_the_rejection() {
    let device = device(64);
    let mut stack = MockStack::new();
    let mut hci = MockHci::default();

    stack.enqueue(peer_txq(0), qos_data(0, 0));
    device.txq_schedule_all(&mut stack, &mut hci, &Keys);
    assert_eq!(device.ba_work(&mut DisconnectOnSetup { device: &device }), 1);

    // The peer reassociated, its traffic is proposed again.
    for seq in 1..10 {
        stack.enqueue(peer_txq(0), qos_data(0, seq));
        device.txq_schedule_all(&mut stack, &mut hci, &Keys);
    }
    assert_eq!(device.ba_work(&mut stack), 1);
    assert_eq!(stack.ba_requests, [(PEER.mac_id, 0)]);
}

#[test]
fn gone_peer_has_nothing_to_send() {
    let device = device(64);
    let mut stack = MockStack::new();
    let mut hci = MockHci::default();
    stack.enqueue(peer_txq(0), qos_data(0, 0));
    stack.peers.clear();
    assert_eq!(device.txq_schedule_all(&mut stack, &mut hci, &Keys), 0);
    assert!(hci.kicked.is_empty());
}

#[test]
fn security_and_unsupported_ciphers() {
    let device = device(64);
    let mut stack = MockStack::new();
    let mut hci = MockHci::default();
    let mut protected = qos_data(4, 0);
    protected.hw_key_idx = Some(0);
    let mut unsupported = qos_data(4, 1);
    unsupported.hw_key_idx = Some(1);
    let mut missing = qos_data(4, 2);
    missing.hw_key_idx = Some(2);
    stack.enqueue(peer_txq(4), protected);
    stack.enqueue(peer_txq(4), unsupported);
    stack.enqueue(peer_txq(4), missing);

    assert_eq!(device.txq_schedule_all(&mut stack, &mut hci, &Keys), 2);
    let desc = hci.submitted[0].0;
    assert!(desc.sec_en);
    assert_eq!(desc.sec_type, SecKeyType::Ccmp128);
    assert_eq!(desc.sec_cam_idx, 4);
    assert_eq!(desc.qsel, TxQueueSelect::Vi0);
    // The frame without a CAM entry goes out unprotected, the unsupported one is dropped.
    let desc = hci.submitted[1].0;
    assert_eq!(desc.seq, 2);
    assert!(!desc.sec_en);
}

#[test]
fn firmware_commands_use_the_h2c_channel() {
    let device = device(4);
    let mut hci = MockHci::default();
    device.h2c_tx(&mut hci, &[0xaa; 64], true).unwrap();
    let (desc, payload) = &hci.submitted[0];
    assert_eq!(desc.ch_dma, DmaChannel::H2C);
    assert!(desc.fw_dl);
    assert!(!desc.wd_page);
    assert_eq!(desc.desc_size(), TXWD_BODY_SIZE);
    assert_eq!(payload.len(), 64);
    assert_eq!(hci.kicked, [DmaChannel::H2C]);
    assert_eq!(device.tx_credits(DmaChannel::H2C), 3);
}

#[test]
fn drainer_runs_signaled_access_categories() {
    let device = device(64);
    let mut stack = MockStack::new();
    let mut hci = MockHci::default();
    stack.enqueue(peer_txq(1), qos_data(1, 0));
    stack.enqueue(peer_txq(5), qos_data(5, 0));

    device.wake_tx_queue(AccessCategory::Background);
    block_on(select(
        device.run_txq_drainer(&mut stack, &mut hci, &Keys),
        yield_now(),
    ));
    assert_eq!(hci.kicked, [DmaChannel::Ach1]);
    assert_eq!(stack.depth(peer_txq(5)), 1);

    device.tx_resource_reclaimed();
    block_on(select(
        device.run_txq_drainer(&mut stack, &mut hci, &Keys),
        yield_now(),
    ));
    assert_eq!(hci.kicked, [DmaChannel::Ach1, DmaChannel::Ach2]);
}

#[derive(Default)]
struct Collector {
    delivered: Vec<(Vec<u8>, RxStatus)>,
}
impl RxSink<Vec<u8>> for Collector {
    fn deliver(&mut self, frame: Vec<u8>, status: RxStatus) {
        self.delivered.push((frame, status));
    }
}

fn rx_buffer(desc_info: RxDescInfo, payload: &[u8]) -> (RxDescInfo, Vec<u8>) {
    let desc_info = RxDescInfo {
        pkt_size: payload.len() as u16,
        ..desc_info
    };
    let mut buf = vec![0u8; desc_info.desc_size()];
    desc_info.write(&mut buf).unwrap();
    buf.extend_from_slice(payload);
    (RxDescInfo::query(&buf, 0).unwrap(), buf)
}

fn phy_status(rssi_avg: u8, rssi: [u8; 4], cfo: u16) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&[0, 5, 0, rssi_avg]);
    buf.extend_from_slice(&rssi);
    // Common OFDM IE, 32 bytes long.
    let mut ie = [0u8; 32];
    ie[0] = 1;
    ie[4..8].copy_from_slice(&((cfo as u32) << 20).to_le_bytes());
    buf.extend_from_slice(&ie);
    buf
}

#[test]
fn received_frames_are_matched_with_their_ppdu_status() {
    let device = device(64);
    device.sta_add(PEER.mac_id);
    let mut reassembly = RxReassembly::new();
    let mut sink = Collector::default();
    let vht = RxDescInfo {
        long_rxdesc: true,
        frame_type: RxFrameType::Data,
        data_rate: DataRate(0x100 | (1 << 4) | 8),
        gi_ltf: 0,
        bw: 2,
        ppdu_cnt: 6,
        mac_id: PEER.mac_id,
        ..Default::default()
    };

    for tag in 0..3 {
        let (desc_info, buf) = rx_buffer(vht, &[tag; 24]);
        reassembly.rx(&device, &desc_info, buf, &mut sink);
    }
    assert_eq!(reassembly.pending(0), 3);

    let report = RxDescInfo {
        pkt_type: RxPktType::PpduStat,
        addr1_match: true,
        ..vht
    };
    let (desc_info, buf) = rx_buffer(report, &phy_status(96, [0x8c, 0x90, 0, 0], 0xffe));
    reassembly.rx(&device, &desc_info, buf, &mut sink);

    assert_eq!(sink.delivered.len(), 3);
    for (tag, (frame, status)) in sink.delivered.iter().enumerate() {
        assert_eq!(frame.last(), Some(&(tag as u8)));
        assert_eq!(status.nss, Some(2));
        assert_eq!(status.rate_idx, 8);
        let signal = status.signal.unwrap();
        assert_eq!(signal.signal, -38);
        assert_eq!(signal.chains, 0b11);
    }

    let tracks = device.track().unwrap();
    assert_eq!(tracks[0].mac_id, PEER.mac_id);
    assert_eq!(tracks[0].avg_rssi, 96);
    assert_eq!(tracks[0].avg_cfo, Some(-2));
}

#[test]
fn epoch_change_releases_unmatched_frames() {
    let device = device(64);
    let mut reassembly = RxReassembly::new();
    let mut sink = Collector::default();
    let mgmt = RxDescInfo {
        long_rxdesc: true,
        frame_type: RxFrameType::Mgmt,
        ppdu_cnt: 1,
        ..Default::default()
    };
    let (desc_info, buf) = rx_buffer(mgmt, &[1]);
    reassembly.rx(&device, &desc_info, buf, &mut sink);
    let (desc_info, buf) = rx_buffer(RxDescInfo { ppdu_cnt: 2, ..mgmt }, &[2]);
    reassembly.rx(&device, &desc_info, buf, &mut sink);

    assert_eq!(sink.delivered.len(), 1);
    assert!(sink.delivered[0].1.signal.is_none());
    assert_eq!(reassembly.curr_ppdu_cnt(0), Some(2));
    assert_eq!(reassembly.pending(0), 1);
}

#[test]
fn malformed_ppdu_status_is_contained() {
    let device = device(64);
    let mut reassembly = RxReassembly::new();
    let mut sink = Collector::default();
    let data = RxDescInfo {
        long_rxdesc: true,
        frame_type: RxFrameType::Data,
        ppdu_cnt: 0,
        ..Default::default()
    };
    let (desc_info, buf) = rx_buffer(data, &[0; 16]);
    reassembly.rx(&device, &desc_info, buf, &mut sink);

    // A variable length IE claiming far more than the buffer holds.
    let mut phy = phy_status(80, [0x8c; 4], 0);
    phy[8] = 8 | (3 << 5);
    phy[9] = 0x0f;
    let report = RxDescInfo {
        pkt_type: RxPktType::PpduStat,
        addr1_match: true,
        ..data
    };
    let (desc_info, buf) = rx_buffer(report, &phy);
    reassembly.rx(&device, &desc_info, buf, &mut sink);

    assert_eq!(sink.delivered.len(), 1);
    assert!(sink.delivered[0].1.signal.is_none());
}
