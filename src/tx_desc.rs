//! Transmit WiFi descriptors (TXWD).
//!
//! Every frame handed to the hardware is prefixed by a TXWD. The first six dwords (the body) are
//! always present, the following six (the info section) are only present if
//! [TxWdBody0::wd_info_en] is set. All dwords are little endian.

use alloc::vec::Vec;

use bitfield_struct::bitfield;
use macro_bits::serializable_enum;

use crate::{hci::SecurityContext, CoreError, CoreResult};

/// Size of the TXWD body.
pub const TXWD_BODY_SIZE: usize = 24;
/// Size of the TXWD info section.
pub const TXWD_INFO_SIZE: usize = 24;
/// Maximum size of a TXWD.
pub const TXWD_MAX_SIZE: usize = TXWD_BODY_SIZE + TXWD_INFO_SIZE;
/// Largest payload a TXWD can describe.
pub const TXPKT_SIZE_MAX: u16 = 0x3fff;
/// Largest minimum MPDU start spacing code.
pub const MAX_AMPDU_DENSITY: u8 = 7;
const MAX_AMPDU_FACTOR: u8 = 6;

#[bitfield(u32)]
pub struct TxWdBody0 {
    #[bits(5)]
    __: u8,
    pub hw_amsdu: bool,
    #[bits(1)]
    __: u8,
    pub wd_page: bool,
    #[bits(3)]
    __: u8,
    #[bits(5)]
    pub hdr_llc_len: u8,
    #[bits(4)]
    pub channel_dma: u8,
    pub fw_dl: bool,
    #[bits(1)]
    __: u8,
    pub wd_info_en: bool,
    pub more_data: bool,
    #[bits(8)]
    pub wp_offset: u8,
}

#[bitfield(u32)]
pub struct TxWdBody2 {
    #[bits(14)]
    pub txpkt_size: u16,
    #[bits(3)]
    __: u8,
    #[bits(6)]
    pub qsel: u8,
    pub tid_indicate: bool,
    #[bits(7)]
    pub mac_id: u8,
    #[bits(1)]
    __: u8,
}

#[bitfield(u32)]
pub struct TxWdBody3 {
    #[bits(12)]
    pub sw_seq: u16,
    pub agg_en: bool,
    pub bk: bool,
    pub bmc: bool,
    #[bits(17)]
    __: u32,
}

#[bitfield(u32)]
pub struct TxWdInfo0 {
    #[bits(10)]
    __: u16,
    pub dis_data_fb: bool,
    #[bits(5)]
    __: u8,
    #[bits(9)]
    pub data_rate: u16,
    #[bits(3)]
    pub gi_ltf: u8,
    #[bits(2)]
    pub data_bw: u8,
    pub use_rate: bool,
    #[bits(1)]
    __: u8,
}

#[bitfield(u32)]
pub struct TxWdInfo1 {
    #[bits(8)]
    pub max_aggnum: u8,
    #[bits(10)]
    __: u16,
    #[bits(3)]
    pub ampdu_density: u8,
    #[bits(11)]
    __: u16,
}

#[bitfield(u32)]
pub struct TxWdInfo2 {
    #[bits(8)]
    pub sec_cam_idx: u8,
    pub sec_hw_enc: bool,
    #[bits(4)]
    pub sec_type: u8,
    #[bits(19)]
    __: u32,
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    /// The hardware queue a frame is placed in.
    pub enum TxQueueSelect: u8 {
        #[default]
        Be0 => 0x00,
        Bk0 => 0x01,
        Vi0 => 0x02,
        Vo0 => 0x03,
        Be1 => 0x04,
        Bk1 => 0x05,
        Vi1 => 0x06,
        Vo1 => 0x07,
        B0Bcn => 0x10,
        B0Hi => 0x11,
        B0Mgmt => 0x12,
        B0NoPs => 0x13,
        B1Bcn => 0x14,
        B1Hi => 0x15,
        B1Mgmt => 0x16,
        B1NoPs => 0x17
    }
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    /// A host DMA channel.
    pub enum DmaChannel: u8 {
        #[default]
        Ach0 => 0,
        Ach1 => 1,
        Ach2 => 2,
        Ach3 => 3,
        Ach4 => 4,
        Ach5 => 5,
        Ach6 => 6,
        Ach7 => 7,
        Ch8 => 8,
        Ch9 => 9,
        Ch10 => 10,
        Ch11 => 11,
        Ch12 => 12
    }
}
impl DmaChannel {
    /// Number of host DMA channels.
    pub const COUNT: usize = 13;
    /// The channel firmware commands are sent on.
    pub const H2C: DmaChannel = DmaChannel::Ch12;

    /// Map a queue select to the DMA channel that serves it.
    pub fn from_qsel(qsel: TxQueueSelect) -> Self {
        match qsel {
            TxQueueSelect::Be0 => Self::Ach0,
            TxQueueSelect::Bk0 => Self::Ach1,
            TxQueueSelect::Vi0 => Self::Ach2,
            TxQueueSelect::Vo0 => Self::Ach3,
            TxQueueSelect::B0Mgmt => Self::Ch8,
            TxQueueSelect::B0Hi => Self::Ch9,
            TxQueueSelect::B1Mgmt => Self::Ch10,
            TxQueueSelect::B1Hi => Self::Ch11,
            _ => {
                warn!("Cannot map qsel {} to DMA channel.", qsel.into_bits());
                Self::Ach0
            }
        }
    }
    /// Index into per channel tables.
    pub fn index(self) -> usize {
        self.into_bits() as usize
    }
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    /// Hardware cipher selection.
    pub enum SecKeyType: u8 {
        #[default]
        None => 0,
        Wep40 => 1,
        Wep104 => 2,
        Tkip => 3,
        Wapi => 4,
        GcmSms4 => 5,
        Ccmp128 => 6,
        Ccmp256 => 7,
        Gcmp128 => 8,
        Gcmp256 => 9,
        BipCcmp128 => 10
    }
}

pub const WLAN_CIPHER_SUITE_WEP40: u32 = 0x000f_ac01;
pub const WLAN_CIPHER_SUITE_TKIP: u32 = 0x000f_ac02;
pub const WLAN_CIPHER_SUITE_CCMP: u32 = 0x000f_ac04;
pub const WLAN_CIPHER_SUITE_WEP104: u32 = 0x000f_ac05;

impl SecKeyType {
    /// Map a cipher suite selector to the hardware cipher.
    pub fn from_cipher_suite(cipher: u32) -> CoreResult<Self> {
        match cipher {
            WLAN_CIPHER_SUITE_WEP40 => Ok(Self::Wep40),
            WLAN_CIPHER_SUITE_WEP104 => Ok(Self::Wep104),
            WLAN_CIPHER_SUITE_TKIP => Ok(Self::Tkip),
            WLAN_CIPHER_SUITE_CCMP => Ok(Self::Ccmp128),
            _ => Err(CoreError::UnsupportedCipher(cipher)),
        }
    }
}

/// Access categories, ordered by priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessCategory {
    Voice = 0,
    Video = 1,
    BestEffort = 2,
    Background = 3,
}
impl AccessCategory {
    pub const ALL: [AccessCategory; 4] = [
        AccessCategory::Voice,
        AccessCategory::Video,
        AccessCategory::BestEffort,
        AccessCategory::Background,
    ];
    /// The 802.1D user priority to access category mapping.
    pub const fn from_tid(tid: u8) -> Self {
        match tid & 0x7 {
            1 | 2 => Self::Background,
            0 | 3 => Self::BestEffort,
            4 | 5 => Self::Video,
            _ => Self::Voice,
        }
    }
}

/// Map a TID to the hardware queue of band 0.
pub fn qsel_for_tid(tid: u8) -> TxQueueSelect {
    match tid {
        0 | 3 => TxQueueSelect::Be0,
        1 | 2 => TxQueueSelect::Bk0,
        4 | 5 => TxQueueSelect::Vi0,
        6 | 7 => TxQueueSelect::Vo0,
        _ => {
            warn!("Should use tag 1d: {}", tid);
            TxQueueSelect::Be0
        }
    }
}

/// The DMA channel data frames of this TID are sent on.
pub fn ch_dma_for_tid(tid: u8) -> DmaChannel {
    DmaChannel::from_qsel(qsel_for_tid(tid))
}

/// The second TID of every access category is marked, so the hardware can tell them apart.
pub const fn tid_indicate(tid: u8) -> bool {
    matches!(tid, 2 | 3 | 5 | 7)
}

/// Frame classification on the transmit path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxType {
    Mgmt,
    Data,
    FwCmd,
}

#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct FrameControl {
    #[bits(2)]
    pub protocol_version: u8,
    #[bits(2)]
    pub frame_type: u8,
    #[bits(4)]
    pub subtype: u8,
    #[bits(8)]
    pub flags: u8,
}
impl FrameControl {
    const TYPE_MGMT: u8 = 0;
    const TYPE_DATA: u8 = 2;
    const SUBTYPE_NULLFUNC: u8 = 4;

    pub fn is_mgmt(&self) -> bool {
        self.frame_type() == Self::TYPE_MGMT
    }
    pub fn is_nullfunc(&self) -> bool {
        self.frame_type() == Self::TYPE_DATA && self.subtype() == Self::SUBTYPE_NULLFUNC
    }
}

const HDR_MIN_LEN: usize = 24;
const HDR_ADDR1: usize = 4;
const HDR_SEQ_CTRL: usize = 22;

/// The fields of an 802.11 header relevant for building a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxHeaderInfo {
    pub frame_control: FrameControl,
    pub seq: u16,
    pub is_bmc: bool,
}
impl TxHeaderInfo {
    pub fn parse(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HDR_MIN_LEN {
            return Err(CoreError::MalformedHeader);
        }
        let frame_control = FrameControl::from_bits(u16::from_le_bytes([data[0], data[1]]));
        let seq_ctrl = u16::from_le_bytes([data[HDR_SEQ_CTRL], data[HDR_SEQ_CTRL + 1]]);
        Ok(Self {
            frame_control,
            seq: (seq_ctrl & 0xfff0) >> 4,
            // Broadcast is a special case of multicast.
            is_bmc: data[HDR_ADDR1] & 0x01 != 0,
        })
    }
    pub fn tx_type(&self) -> TxType {
        if self.frame_control.is_mgmt() || self.frame_control.is_nullfunc() {
            TxType::Mgmt
        } else {
            TxType::Data
        }
    }
}

/// A frame queued for transmission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxFrame {
    /// The 802.11 frame, starting with the MAC header.
    pub data: Vec<u8>,
    /// 802.1D user priority.
    pub tid: u8,
    /// EAPOL frames take part in the key exchange and are never aggregated.
    pub eapol: bool,
    /// Index of the hardware key used to protect the frame.
    pub hw_key_idx: Option<u8>,
    /// Set by the scheduler, if the frame is part of an A-MPDU.
    pub ampdu: bool,
}

/// The aggregation parameters of the peer a frame is sent to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AmpduParams {
    /// Buffer size negotiated with the peer. Zero if none was negotiated.
    pub agg_num: u8,
    /// Maximum A-MPDU length exponent from the peer's HT capabilities.
    pub ampdu_factor: u8,
    /// Minimum MPDU start spacing from the peer's HT capabilities.
    pub ampdu_density: u8,
}

/// Everything that ends up in a TXWD.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxDescInfo {
    pub pkt_size: u16,
    pub wp_offset: u8,
    pub hdr_llc_len: u8,
    pub wd_page: bool,
    pub fw_dl: bool,
    pub en_wd_info: bool,
    pub ch_dma: DmaChannel,
    pub qsel: TxQueueSelect,
    pub tid_indicate: bool,
    pub mac_id: u8,
    pub seq: u16,
    pub is_bmc: bool,
    pub agg_en: bool,
    pub ampdu_density: u8,
    pub ampdu_num: u8,
    pub use_rate: bool,
    pub dis_data_fb: bool,
    pub data_rate: u16,
    pub sec_en: bool,
    pub sec_type: SecKeyType,
    pub sec_cam_idx: u8,
}
impl TxDescInfo {
    /// Build the descriptor for a firmware command.
    pub fn for_fw_cmd(pkt_size: u16, fw_dl: bool) -> Self {
        Self {
            pkt_size,
            fw_dl,
            ch_dma: DmaChannel::H2C,
            ..Default::default()
        }
    }
    /// Build the descriptor for an 802.11 frame.
    ///
    /// `security` is the resolved security context, if the frame references a hardware key.
    /// `ampdu` must be present if the frame is flagged as part of an A-MPDU.
    pub fn for_frame(
        frame: &TxFrame,
        mac_id: u8,
        ampdu: Option<AmpduParams>,
        security: Option<SecurityContext>,
    ) -> CoreResult<Self> {
        let header = TxHeaderInfo::parse(&frame.data)?;
        let pkt_size = u16::try_from(frame.data.len()).map_err(|_| CoreError::FrameTooLong)?;
        let mut desc_info = Self {
            pkt_size,
            seq: header.seq,
            is_bmc: header.is_bmc,
            wd_page: true,
            mac_id,
            ..Default::default()
        };
        match header.tx_type() {
            TxType::Mgmt => desc_info.update_mgmt_info(),
            _ => desc_info.update_data_info(frame, ampdu, security)?,
        }
        Ok(desc_info)
    }
    fn update_mgmt_info(&mut self) {
        self.qsel = TxQueueSelect::B0Mgmt;
        self.ch_dma = DmaChannel::from_qsel(self.qsel);
        // Management frames go out at the lowest basic rate, without fallback.
        self.en_wd_info = true;
        self.use_rate = true;
        self.dis_data_fb = true;
        self.data_rate = 0x00;
    }
    fn update_data_info(
        &mut self,
        frame: &TxFrame,
        ampdu: Option<AmpduParams>,
        security: Option<SecurityContext>,
    ) -> CoreResult<()> {
        let tid = frame.tid & 0x7;
        self.qsel = qsel_for_tid(tid);
        self.ch_dma = DmaChannel::from_qsel(self.qsel);
        self.tid_indicate = tid_indicate(tid);
        // The info section carries the A-MPDU parameters.
        self.en_wd_info = true;

        if frame.ampdu {
            match ampdu {
                Some(params) => self.update_ampdu_info(params),
                None => warn!("Cannot set A-MPDU info without a peer, tid: {}", tid),
            }
        }
        if let Some(security) = security {
            self.update_sec_key(security)?;
        }
        Ok(())
    }
    fn update_ampdu_info(&mut self, params: AmpduParams) {
        let agg_num = if params.agg_num != 0 {
            params.agg_num as u16
        } else {
            // Anything above this exceeds the 8 bit aggregation count anyway.
            4u16 << params.ampdu_factor.min(MAX_AMPDU_FACTOR)
        };
        self.agg_en = true;
        self.ampdu_density = params.ampdu_density.min(MAX_AMPDU_DENSITY);
        self.ampdu_num = agg_num.saturating_sub(1).min(u8::MAX as u16) as u8;
    }
    fn update_sec_key(&mut self, security: SecurityContext) -> CoreResult<()> {
        self.sec_type = SecKeyType::from_cipher_suite(security.cipher)?;
        self.sec_en = true;
        self.sec_cam_idx = security.sec_cam_idx;
        Ok(())
    }
    /// Size of the encoded descriptor.
    pub const fn desc_size(&self) -> usize {
        if self.en_wd_info {
            TXWD_MAX_SIZE
        } else {
            TXWD_BODY_SIZE
        }
    }
    /// Encode the descriptor into `buf`, returning the number of bytes written.
    ///
    /// Fields wider than their slot in the TXWD are truncated.
    pub fn fill(&self, buf: &mut [u8]) -> CoreResult<usize> {
        if self.pkt_size > TXPKT_SIZE_MAX {
            return Err(CoreError::FrameTooLong);
        }
        let size = self.desc_size();
        let Some(buf) = buf.get_mut(..size) else {
            return Err(CoreError::Truncated);
        };
        buf.fill(0);
        let body0 = TxWdBody0::new()
            .with_wp_offset(self.wp_offset)
            .with_wd_info_en(self.en_wd_info)
            .with_channel_dma(self.ch_dma.into_bits())
            .with_hdr_llc_len(self.hdr_llc_len & 0x1f)
            .with_wd_page(self.wd_page)
            .with_fw_dl(self.fw_dl);
        let body2 = TxWdBody2::new()
            .with_tid_indicate(self.tid_indicate)
            .with_qsel(self.qsel.into_bits())
            .with_mac_id(self.mac_id & 0x7f)
            .with_txpkt_size(self.pkt_size);
        let body3 = TxWdBody3::new()
            .with_sw_seq(self.seq & 0xfff)
            .with_agg_en(self.agg_en)
            .with_bmc(self.is_bmc);
        write_dword(buf, 0, body0.into_bits());
        write_dword(buf, 2, body2.into_bits());
        write_dword(buf, 3, body3.into_bits());

        if !self.en_wd_info {
            return Ok(size);
        }
        let info0 = TxWdInfo0::new()
            .with_use_rate(self.use_rate)
            .with_data_rate(self.data_rate & 0x1ff)
            .with_dis_data_fb(self.dis_data_fb);
        let info1 = TxWdInfo1::new()
            .with_max_aggnum(self.ampdu_num)
            .with_ampdu_density(self.ampdu_density & MAX_AMPDU_DENSITY);
        let info2 = TxWdInfo2::new()
            .with_sec_type(self.sec_type.into_bits())
            .with_sec_hw_enc(self.sec_en)
            .with_sec_cam_idx(self.sec_cam_idx);
        write_dword(buf, 6, info0.into_bits());
        write_dword(buf, 7, info1.into_bits());
        write_dword(buf, 8, info2.into_bits());
        Ok(size)
    }
    /// Decode a descriptor previously written by [Self::fill].
    pub fn parse(buf: &[u8]) -> CoreResult<Self> {
        if buf.len() < TXWD_BODY_SIZE {
            return Err(CoreError::Truncated);
        }
        let body0 = TxWdBody0::from_bits(read_dword(buf, 0));
        let body2 = TxWdBody2::from_bits(read_dword(buf, 2));
        let body3 = TxWdBody3::from_bits(read_dword(buf, 3));
        let mut desc_info = Self {
            pkt_size: body2.txpkt_size(),
            wp_offset: body0.wp_offset(),
            hdr_llc_len: body0.hdr_llc_len(),
            wd_page: body0.wd_page(),
            fw_dl: body0.fw_dl(),
            en_wd_info: body0.wd_info_en(),
            ch_dma: DmaChannel::from_bits(body0.channel_dma()),
            qsel: TxQueueSelect::from_bits(body2.qsel()),
            tid_indicate: body2.tid_indicate(),
            mac_id: body2.mac_id(),
            seq: body3.sw_seq(),
            is_bmc: body3.bmc(),
            agg_en: body3.agg_en(),
            ..Default::default()
        };
        if !desc_info.en_wd_info {
            return Ok(desc_info);
        }
        if buf.len() < TXWD_MAX_SIZE {
            return Err(CoreError::Truncated);
        }
        let info0 = TxWdInfo0::from_bits(read_dword(buf, 6));
        let info1 = TxWdInfo1::from_bits(read_dword(buf, 7));
        let info2 = TxWdInfo2::from_bits(read_dword(buf, 8));
        desc_info.use_rate = info0.use_rate();
        desc_info.data_rate = info0.data_rate();
        desc_info.dis_data_fb = info0.dis_data_fb();
        desc_info.ampdu_num = info1.max_aggnum();
        desc_info.ampdu_density = info1.ampdu_density();
        desc_info.sec_type = SecKeyType::from_bits(info2.sec_type());
        desc_info.sec_en = info2.sec_hw_enc();
        desc_info.sec_cam_idx = info2.sec_cam_idx();
        Ok(desc_info)
    }
}

fn write_dword(buf: &mut [u8], index: usize, value: u32) {
    buf[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
}
pub(crate) fn read_dword(buf: &[u8], index: usize) -> u32 {
    let mut dword = [0u8; 4];
    dword.copy_from_slice(&buf[index * 4..index * 4 + 4]);
    u32::from_le_bytes(dword)
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    fn header(fc: u16, addr1: [u8; 6], seq: u16) -> Vec<u8> {
        let mut data = vec![0u8; 32];
        data[0..2].copy_from_slice(&fc.to_le_bytes());
        data[4..10].copy_from_slice(&addr1);
        data[22..24].copy_from_slice(&(seq << 4).to_le_bytes());
        data
    }
    const QOS_DATA: u16 = 0x0088;
    const BEACON: u16 = 0x0080;
    const NULLFUNC: u16 = 0x0048;
    const PEER: [u8; 6] = [0x02, 0x11, 0x22, 0x33, 0x44, 0x55];

    fn round_trip(desc_info: &TxDescInfo) -> TxDescInfo {
        let mut buf = [0xffu8; TXWD_MAX_SIZE];
        let len = desc_info.fill(&mut buf).unwrap();
        assert_eq!(len, desc_info.desc_size());
        TxDescInfo::parse(&buf[..len]).unwrap()
    }

    #[test]
    fn management_frames_use_fixed_rate() {
        let frame = TxFrame {
            data: header(BEACON, [0xff; 6], 100),
            ..Default::default()
        };
        let desc_info = TxDescInfo::for_frame(&frame, 0, None, None).unwrap();
        assert_eq!(desc_info.qsel, TxQueueSelect::B0Mgmt);
        assert_eq!(desc_info.ch_dma, DmaChannel::Ch8);
        assert!(desc_info.use_rate && desc_info.dis_data_fb && desc_info.en_wd_info);
        assert_eq!(desc_info.data_rate, 0);
        assert_eq!(desc_info.seq, 100);
        assert!(desc_info.is_bmc);
        assert_eq!(round_trip(&desc_info), desc_info);
    }

    #[test]
    fn nullfunc_is_management() {
        let frame = TxFrame {
            data: header(NULLFUNC, PEER, 1),
            tid: 6,
            ..Default::default()
        };
        let desc_info = TxDescInfo::for_frame(&frame, 3, None, None).unwrap();
        assert_eq!(desc_info.qsel, TxQueueSelect::B0Mgmt);
        assert!(!desc_info.is_bmc);
    }

    #[test]
    fn data_frame_with_ampdu_and_security() {
        let frame = TxFrame {
            data: header(QOS_DATA, PEER, 4095),
            tid: 5,
            hw_key_idx: Some(1),
            ampdu: true,
            ..Default::default()
        };
        let ampdu = AmpduParams {
            agg_num: 0,
            ampdu_factor: 3,
            ampdu_density: 5,
        };
        let security = SecurityContext {
            cipher: WLAN_CIPHER_SUITE_CCMP,
            sec_cam_idx: 17,
        };
        let desc_info = TxDescInfo::for_frame(&frame, 9, Some(ampdu), Some(security)).unwrap();
        assert_eq!(desc_info.qsel, TxQueueSelect::Vi0);
        assert_eq!(desc_info.ch_dma, DmaChannel::Ach2);
        assert!(desc_info.tid_indicate);
        assert!(desc_info.agg_en);
        assert_eq!(desc_info.ampdu_num, 31);
        assert_eq!(desc_info.ampdu_density, 5);
        assert_eq!(desc_info.sec_type, SecKeyType::Ccmp128);
        assert_eq!(desc_info.sec_cam_idx, 17);
        assert_eq!(desc_info.seq, 4095);
        assert_eq!(desc_info.pkt_size, 32);
        assert_eq!(round_trip(&desc_info), desc_info);
    }

    #[test]
    fn negotiated_buffer_size_wins() {
        let frame = TxFrame {
            data: header(QOS_DATA, PEER, 0),
            ampdu: true,
            ..Default::default()
        };
        let ampdu = AmpduParams {
            agg_num: 64,
            ampdu_factor: 3,
            ampdu_density: 0,
        };
        let desc_info = TxDescInfo::for_frame(&frame, 1, Some(ampdu), None).unwrap();
        assert_eq!(desc_info.ampdu_num, 63);
    }

    #[test]
    fn out_of_range_peer_capabilities_are_clamped() {
        let frame = TxFrame {
            data: header(QOS_DATA, PEER, 0),
            ampdu: true,
            ..Default::default()
        };
        for ampdu_factor in [7, 16, u8::MAX] {
            let ampdu = AmpduParams {
                agg_num: 0,
                ampdu_factor,
                ampdu_density: 8,
            };
            let desc_info = TxDescInfo::for_frame(&frame, 1, Some(ampdu), None).unwrap();
            assert_eq!(desc_info.ampdu_num, u8::MAX);
            assert_eq!(desc_info.ampdu_density, MAX_AMPDU_DENSITY);
            assert_eq!(round_trip(&desc_info), desc_info);
        }
    }

    #[test]
    fn wide_fields_are_truncated_on_encode() {
        let desc_info = TxDescInfo {
            en_wd_info: true,
            ampdu_density: 9,
            mac_id: 0x81,
            seq: 0x1001,
            ..Default::default()
        };
        let parsed = round_trip(&desc_info);
        assert_eq!(parsed.ampdu_density, 1);
        assert_eq!(parsed.mac_id, 1);
        assert_eq!(parsed.seq, 1);
    }

    #[test]
    fn aggregation_is_only_set_for_flagged_frames() {
        let frame = TxFrame {
            data: header(QOS_DATA, PEER, 0),
            tid: 0,
            ..Default::default()
        };
        let desc_info =
            TxDescInfo::for_frame(&frame, 1, Some(AmpduParams::default()), None).unwrap();
        assert!(!desc_info.agg_en);
        assert_eq!(desc_info.qsel, TxQueueSelect::Be0);
        assert!(!desc_info.sec_en);
    }

    #[test]
    fn unsupported_cipher_is_rejected() {
        let frame = TxFrame {
            data: header(QOS_DATA, PEER, 0),
            hw_key_idx: Some(0),
            ..Default::default()
        };
        let security = SecurityContext {
            cipher: 0x000f_ac08,
            sec_cam_idx: 0,
        };
        assert_eq!(
            TxDescInfo::for_frame(&frame, 0, None, Some(security)),
            Err(CoreError::UnsupportedCipher(0x000f_ac08))
        );
    }

    #[test]
    fn firmware_command_has_short_descriptor() {
        let desc_info = TxDescInfo::for_fw_cmd(200, true);
        assert_eq!(desc_info.desc_size(), TXWD_BODY_SIZE);
        assert_eq!(desc_info.ch_dma, DmaChannel::H2C);
        let mut buf = [0u8; TXWD_MAX_SIZE];
        assert_eq!(desc_info.fill(&mut buf), Ok(TXWD_BODY_SIZE));
        // fw_dl is bit 20 and the channel occupies bits 19:16 of dword 0.
        assert_eq!(read_dword(&buf, 0), (1 << 20) | (12 << 16));
        assert_eq!(read_dword(&buf, 2), 200);
        assert_eq!(round_trip(&desc_info), desc_info);
    }

    #[test]
    fn short_frames_are_malformed() {
        let frame = TxFrame {
            data: vec![0x88, 0x00, 0x00],
            ..Default::default()
        };
        assert_eq!(
            TxDescInfo::for_frame(&frame, 0, None, None),
            Err(CoreError::MalformedHeader)
        );
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let desc_info = TxDescInfo::for_fw_cmd(TXPKT_SIZE_MAX + 1, false);
        let mut buf = [0u8; TXWD_MAX_SIZE];
        assert_eq!(desc_info.fill(&mut buf), Err(CoreError::FrameTooLong));
    }

    #[test]
    fn tid_mappings() {
        assert_eq!(ch_dma_for_tid(1), DmaChannel::Ach1);
        assert_eq!(ch_dma_for_tid(7), DmaChannel::Ach3);
        assert_eq!(AccessCategory::from_tid(6), AccessCategory::Voice);
        assert_eq!(AccessCategory::from_tid(0), AccessCategory::BestEffort);
        assert_eq!(AccessCategory::from_tid(2), AccessCategory::Background);
        assert!(!tid_indicate(0) && tid_indicate(3));
    }
}
