//! Receive WiFi descriptors (RXWD).
//!
//! The hardware prefixes every received buffer with a short RXWD of four dwords. If
//! [RxWdShort0::long_rxd] is set, four more dwords follow, carrying the frame type and the
//! association table references.

use bitfield_struct::bitfield;
use macro_bits::serializable_enum;

use crate::{
    rate::{DataRate, HeGi, RateInfoBw},
    tx_desc::read_dword,
    CoreError, CoreResult,
};

/// Size of the short RXWD.
pub const RXWD_SHORT_SIZE: usize = 16;
/// Size of the long RXWD.
pub const RXWD_LONG_SIZE: usize = 32;

#[bitfield(u32)]
pub struct RxWdShort0 {
    #[bits(14)]
    pub pkt_size: u16,
    #[bits(2)]
    pub shift: u8,
    #[bits(6)]
    pub hd_iv_len: u8,
    pub bb_sel: bool,
    pub mac_info_valid: bool,
    #[bits(4)]
    pub rpkt_type: u8,
    #[bits(3)]
    pub drv_info_size: u8,
    pub long_rxd: bool,
}

#[bitfield(u32)]
pub struct RxWdShort1 {
    #[bits(4)]
    pub ppdu_type: u8,
    #[bits(3)]
    pub ppdu_cnt: u8,
    pub sr_en: bool,
    #[bits(8)]
    pub user_id: u8,
    #[bits(9)]
    pub data_rate: u16,
    #[bits(3)]
    pub gi_ltf: u8,
    #[bits(2)]
    __: u8,
    #[bits(2)]
    pub bw: u8,
}

#[bitfield(u32)]
pub struct RxWdShort3 {
    pub a1_match: bool,
    pub sw_dec: bool,
    pub hw_dec: bool,
    #[bits(6)]
    __: u8,
    pub crc32_err: bool,
    pub icv_err: bool,
    #[bits(21)]
    __: u32,
}

#[bitfield(u32)]
pub struct RxWdLong4 {
    #[bits(2)]
    pub frame_type: u8,
    #[bits(30)]
    __: u32,
}

#[bitfield(u32)]
pub struct RxWdLong5 {
    pub mac_id: u8,
    pub addr_cam_id: u8,
    #[bits(4)]
    pub rx_pl_id: u8,
    pub addr_cam_vld: bool,
    #[bits(3)]
    __: u8,
    pub sec_cam_id: u8,
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    /// The kind of report carried by a receive buffer.
    pub enum RxPktType: u8 {
        #[default]
        Wifi => 0,
        PpduStat => 1,
        ChInfo => 2,
        BbScope => 3,
        F2pTxCmd => 4,
        Ss2Fw => 5,
        TxReport => 6,
        TxRelHost => 7,
        Dfs => 8,
        TxRelCpu => 9,
        C2h => 10,
        Csi => 11,
        Cqi => 12
    }
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    /// The 802.11 frame type from the long RXWD.
    pub enum RxFrameType: u8 {
        #[default]
        Mgmt => 0,
        Ctrl => 1,
        Data => 2
    }
}

/// Frame types that wait for their PPDU status before being delivered.
const PPDU_FILTER: [RxFrameType; 2] = [RxFrameType::Mgmt, RxFrameType::Data];

/// Everything parsed from an RXWD.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RxDescInfo {
    pub pkt_size: u16,
    /// Driver info length in units of 8 bytes.
    pub drv_info_size: u8,
    /// Header shift in units of 2 bytes.
    pub shift: u8,
    pub hd_iv_len: u8,
    pub long_rxdesc: bool,
    /// Selects the PHY, and with it the reassembly path.
    pub bb_sel: bool,
    pub pkt_type: RxPktType,
    pub mac_info_valid: bool,
    pub bw: u8,
    pub data_rate: DataRate,
    pub gi_ltf: u8,
    pub user_id: u8,
    pub sr_en: bool,
    pub ppdu_cnt: u8,
    pub ppdu_type: u8,
    pub free_run_cnt: u32,
    pub icv_err: bool,
    pub crc32_err: bool,
    pub hw_dec: bool,
    pub sw_dec: bool,
    pub addr1_match: bool,

    pub frame_type: RxFrameType,
    pub addr_cam_valid: bool,
    pub addr_cam_id: u8,
    pub sec_cam_id: u8,
    pub mac_id: u8,
    pub rx_pl_id: u8,

    /// Offset of the payload, relative to the start of the buffer passed to [Self::query].
    pub offset: usize,
}
impl RxDescInfo {
    /// Parse the RXWD found at `data_offset` in `data`.
    pub fn query(data: &[u8], data_offset: usize) -> CoreResult<Self> {
        let Some(rxd) = data.get(data_offset..) else {
            return Err(CoreError::Truncated);
        };
        if rxd.len() < RXWD_SHORT_SIZE {
            return Err(CoreError::Truncated);
        }
        let dw0 = RxWdShort0::from_bits(read_dword(rxd, 0));
        let dw1 = RxWdShort1::from_bits(read_dword(rxd, 1));
        let dw3 = RxWdShort3::from_bits(read_dword(rxd, 3));
        let mut desc_info = Self {
            pkt_size: dw0.pkt_size(),
            drv_info_size: dw0.drv_info_size(),
            shift: dw0.shift(),
            hd_iv_len: dw0.hd_iv_len(),
            long_rxdesc: dw0.long_rxd(),
            bb_sel: dw0.bb_sel(),
            pkt_type: RxPktType::from_bits(dw0.rpkt_type()),
            mac_info_valid: dw0.mac_info_valid(),
            bw: dw1.bw(),
            data_rate: DataRate(dw1.data_rate()),
            gi_ltf: dw1.gi_ltf(),
            user_id: dw1.user_id(),
            sr_en: dw1.sr_en(),
            ppdu_cnt: dw1.ppdu_cnt(),
            ppdu_type: dw1.ppdu_type(),
            free_run_cnt: read_dword(rxd, 2),
            icv_err: dw3.icv_err(),
            crc32_err: dw3.crc32_err(),
            hw_dec: dw3.hw_dec(),
            sw_dec: dw3.sw_dec(),
            addr1_match: dw3.a1_match(),
            ..Default::default()
        };

        if desc_info.long_rxdesc {
            if rxd.len() < RXWD_LONG_SIZE {
                return Err(CoreError::Truncated);
            }
            let dw4 = RxWdLong4::from_bits(read_dword(rxd, 4));
            let dw5 = RxWdLong5::from_bits(read_dword(rxd, 5));
            desc_info.frame_type = RxFrameType::from_bits(dw4.frame_type());
            desc_info.addr_cam_valid = dw5.addr_cam_vld();
            desc_info.addr_cam_id = dw5.addr_cam_id();
            desc_info.sec_cam_id = dw5.sec_cam_id();
            desc_info.mac_id = dw5.mac_id();
            desc_info.rx_pl_id = dw5.rx_pl_id();
        }
        desc_info.offset = data_offset
            + desc_info.desc_size()
            + ((desc_info.shift as usize) << 1)
            + ((desc_info.drv_info_size as usize) << 3);
        Ok(desc_info)
    }
    /// Size of the RXWD itself.
    pub const fn desc_size(&self) -> usize {
        if self.long_rxdesc {
            RXWD_LONG_SIZE
        } else {
            RXWD_SHORT_SIZE
        }
    }
    /// The reassembly path this descriptor belongs to.
    pub const fn phy_path(&self) -> usize {
        self.bb_sel as usize
    }
    /// Whether the frame is held back until its PPDU status arrives.
    pub fn wants_ppdu_status(&self) -> bool {
        self.long_rxdesc && PPDU_FILTER.contains(&self.frame_type)
    }
    /// The decoded bandwidth class.
    pub const fn rate_info_bw(&self) -> RateInfoBw {
        RateInfoBw::from_desc(self.bw)
    }
    /// The decoded guard interval class.
    pub fn he_gi(&self) -> Option<HeGi> {
        HeGi::from_gi_ltf(self.gi_ltf)
    }
    /// Locate the payload in `data`.
    pub fn payload<'a>(&self, data: &'a [u8]) -> CoreResult<&'a [u8]> {
        data.get(self.offset..self.offset + self.pkt_size as usize)
            .ok_or(CoreError::Truncated)
    }
    /// Encode the descriptor into `buf`, returning the number of bytes written.
    ///
    /// This is the inverse of [Self::query] and used to build loopback and test buffers.
    pub fn write(&self, buf: &mut [u8]) -> CoreResult<usize> {
        let size = self.desc_size();
        let Some(buf) = buf.get_mut(..size) else {
            return Err(CoreError::Truncated);
        };
        buf.fill(0);
        let dw0 = RxWdShort0::new()
            .with_pkt_size(self.pkt_size)
            .with_shift(self.shift)
            .with_hd_iv_len(self.hd_iv_len)
            .with_bb_sel(self.bb_sel)
            .with_mac_info_valid(self.mac_info_valid)
            .with_rpkt_type(self.pkt_type.into_bits())
            .with_drv_info_size(self.drv_info_size)
            .with_long_rxd(self.long_rxdesc);
        let dw1 = RxWdShort1::new()
            .with_ppdu_type(self.ppdu_type)
            .with_ppdu_cnt(self.ppdu_cnt)
            .with_sr_en(self.sr_en)
            .with_user_id(self.user_id)
            .with_data_rate(self.data_rate.0)
            .with_gi_ltf(self.gi_ltf)
            .with_bw(self.bw);
        let dw3 = RxWdShort3::new()
            .with_a1_match(self.addr1_match)
            .with_sw_dec(self.sw_dec)
            .with_hw_dec(self.hw_dec)
            .with_crc32_err(self.crc32_err)
            .with_icv_err(self.icv_err);
        buf[0..4].copy_from_slice(&dw0.into_bits().to_le_bytes());
        buf[4..8].copy_from_slice(&dw1.into_bits().to_le_bytes());
        buf[8..12].copy_from_slice(&self.free_run_cnt.to_le_bytes());
        buf[12..16].copy_from_slice(&dw3.into_bits().to_le_bytes());
        if self.long_rxdesc {
            let dw4 = RxWdLong4::new().with_frame_type(self.frame_type.into_bits());
            let dw5 = RxWdLong5::new()
                .with_mac_id(self.mac_id)
                .with_addr_cam_id(self.addr_cam_id)
                .with_rx_pl_id(self.rx_pl_id)
                .with_addr_cam_vld(self.addr_cam_valid)
                .with_sec_cam_id(self.sec_cam_id);
            buf[16..20].copy_from_slice(&dw4.into_bits().to_le_bytes());
            buf[20..24].copy_from_slice(&dw5.into_bits().to_le_bytes());
        }
        Ok(size)
    }
}
