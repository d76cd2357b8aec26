//! PPDU status reports.
//!
//! A PPDU status report describes the PHY layer properties of a received PPDU. It starts with an
//! optional MAC info block, followed by the PHY status, which consists of a fixed header carrying
//! the RSSI values and a sequence of information elements (IEs).

use bitfield_struct::bitfield;

use crate::{rx_desc::RxDescInfo, tx_desc::read_dword, CoreError, CoreResult};

/// Size of the fixed part of the MAC info block.
pub const PPDU_MAC_INFO_SIZE: usize = 8;
/// Size of the per user part of the MAC info block.
pub const PPDU_MAC_INFO_USR_SIZE: usize = 4;
/// Size of the optional RX count block.
pub const PPDU_MAC_RX_CNT_SIZE: usize = 96;
/// Maximum number of users in a MAC info block.
pub const PPDU_MAX_USR: u8 = 4;
/// Size of the PHY status header.
pub const PHY_STS_HDR_LEN: usize = 8;
/// The reference the raw RSSI values are biased by.
pub const MAX_RSSI: i8 = 110;
/// Number of RF paths carried in the PHY status header.
pub const RF_PATH_MAX: usize = 4;

#[bitfield(u32)]
pub struct RxInfo0 {
    #[bits(4)]
    pub usr_num: u8,
    #[bits(24)]
    __: u32,
    pub is_to_self: bool,
    pub rx_cnt_vld: bool,
    #[bits(2)]
    __: u8,
}

#[bitfield(u32)]
pub struct RxInfo1 {
    __: u16,
    /// PLCP length in units of 8 bytes.
    pub plcp_len: u8,
    __: u8,
}

#[bitfield(u32)]
pub struct PhyStsHdr0 {
    __: u8,
    /// Total length of the PHY status in units of 8 bytes.
    pub len: u8,
    __: u8,
    pub rssi_avg: u8,
}

#[bitfield(u32)]
pub struct PhyStsHdr1 {
    pub rssi_a: u8,
    pub rssi_b: u8,
    pub rssi_c: u8,
    pub rssi_d: u8,
}

#[bitfield(u32)]
pub struct PhyStsIeHdr {
    #[bits(5)]
    pub ie_type: u8,
    /// Length in units of 8 bytes, only used for variable length IEs.
    #[bits(7)]
    pub len: u8,
    #[bits(20)]
    __: u32,
}

#[bitfield(u32)]
pub struct PhyStsIe01Dw1 {
    #[bits(20)]
    __: u32,
    /// Carrier frequency offset, S(12,2).
    #[bits(12)]
    pub cfo: u16,
}

const VAR_LEN: u8 = 0xff;
const VAR_LEN_UNIT: u16 = 8;
/// Length of each IE type in bytes.
const PHYSTS_IE_LEN_TAB: [u8; 32] = [
    16, 32, 24, 24, 8, 8, 8, 8, VAR_LEN, 8, VAR_LEN, 176, VAR_LEN, VAR_LEN, VAR_LEN, VAR_LEN,
    VAR_LEN, VAR_LEN, 16, 24, VAR_LEN, VAR_LEN, VAR_LEN, 0, 24, 24, 24, 24, 32, 32, 32, 32,
];
/// The common OFDM IE.
const PHYSTS_IE01_CMN_OFDM: u8 = 1;

/// Sign extend `value`, using bit `index` as the sign bit.
pub const fn sign_extend(value: u32, index: u32) -> i32 {
    let shift = 31 - index;
    ((value << shift) as i32) >> shift
}

fn ie_len(hdr: PhyStsIeHdr) -> u16 {
    match PHYSTS_IE_LEN_TAB[hdr.ie_type() as usize] {
        VAR_LEN => hdr.len() as u16 * VAR_LEN_UNIT,
        len => len as u16,
    }
}

/// Offset of the PHY status behind the MAC info block at the start of `buf`.
pub fn mac_ppdu_phy_sts_offset(buf: &[u8]) -> CoreResult<usize> {
    if buf.len() < PPDU_MAC_INFO_SIZE {
        return Err(CoreError::Truncated);
    }
    let rxinfo0 = RxInfo0::from_bits(read_dword(buf, 0));
    let rxinfo1 = RxInfo1::from_bits(read_dword(buf, 1));
    let usr_num = rxinfo0.usr_num();
    if usr_num > PPDU_MAX_USR {
        warn!("Invalid user number {} in mac info.", usr_num);
        return Err(CoreError::InvalidUserNum(usr_num));
    }
    let mut offset = PPDU_MAC_INFO_SIZE + usr_num as usize * PPDU_MAC_INFO_USR_SIZE;
    // 8 byte alignment
    if usr_num & 1 != 0 {
        offset += PPDU_MAC_INFO_USR_SIZE;
    }
    if rxinfo0.rx_cnt_vld() {
        offset += PPDU_MAC_RX_CNT_SIZE;
    }
    offset += (rxinfo1.plcp_len() as usize) << 3;
    if offset > buf.len() {
        return Err(CoreError::Truncated);
    }
    Ok(offset)
}

/// Walk the IEs of a PHY status, returning the CFO if a common OFDM IE was present.
///
/// Every IE is bounds checked before it is read, so a malformed status never reads past `buf`.
pub fn parse_phy_sts_ies(buf: &[u8]) -> CoreResult<Option<i16>> {
    let mut cfo = None;
    let mut pos = PHY_STS_HDR_LEN;
    while pos < buf.len() {
        let Some(ie) = buf.get(pos..) else {
            return Err(CoreError::PhyStatusParse);
        };
        if ie.len() < 4 {
            return Err(CoreError::PhyStatusParse);
        }
        let hdr = PhyStsIeHdr::from_bits(read_dword(ie, 0));
        let len = ie_len(hdr) as usize;
        if len == 0 || len > ie.len() {
            debug!("PHY status parse failed at offset {}, IE {}.", pos, hdr.ie_type());
            return Err(CoreError::PhyStatusParse);
        }
        if hdr.ie_type() == PHYSTS_IE01_CMN_OFDM {
            let dw1 = PhyStsIe01Dw1::from_bits(read_dword(ie, 1));
            cfo = Some(sign_extend(dw1.cfo() as u32, 11) as i16);
        }
        pos += len;
    }
    Ok(cfo)
}

/// The parsed contents of a PPDU status report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhyPpdu {
    /// The reassembly path the report belongs to.
    pub phy_path: usize,
    /// The epoch the report describes.
    pub ppdu_cnt: u8,
    /// The peer the PPDU was received from.
    pub mac_id: u8,
    pub to_self: bool,
    /// Whether the PHY status header was intact, making the RSSI fields usable.
    pub has_rssi: bool,
    pub rssi_avg: u8,
    /// Per path RSSI in dBm.
    pub rssi: [i8; RF_PATH_MAX],
    pub cfo: Option<i16>,
    /// Header and IEs were both intact.
    pub valid: bool,
}
impl PhyPpdu {
    /// Parse the payload of a PPDU status report.
    ///
    /// Malformed reports never fail. They yield a status with [Self::valid] cleared instead.
    pub fn parse(desc_info: &RxDescInfo, payload: &[u8]) -> Self {
        let mut phy_ppdu = Self {
            phy_path: desc_info.phy_path(),
            ppdu_cnt: desc_info.ppdu_cnt,
            mac_id: desc_info.mac_id,
            to_self: desc_info.addr1_match,
            ..Default::default()
        };
        let mut phy_sts = payload;
        if desc_info.mac_info_valid {
            match mac_ppdu_phy_sts_offset(payload) {
                Ok(offset) => phy_sts = &payload[offset..],
                Err(err) => debug!("Failed to skip mac info: {:?}", err),
            }
        }
        if phy_sts.len() < PHY_STS_HDR_LEN {
            debug!("PHY status too short: {} bytes.", phy_sts.len());
            return phy_ppdu;
        }
        let hdr0 = PhyStsHdr0::from_bits(read_dword(phy_sts, 0));
        if (hdr0.len() as usize) << 3 != phy_sts.len() {
            warn!(
                "PHY PPDU length mismatch: {} != {}",
                (hdr0.len() as usize) << 3,
                phy_sts.len()
            );
        } else {
            let hdr1 = PhyStsHdr1::from_bits(read_dword(phy_sts, 1));
            phy_ppdu.has_rssi = true;
            phy_ppdu.rssi_avg = hdr0.rssi_avg();
            phy_ppdu.rssi = [hdr1.rssi_a(), hdr1.rssi_b(), hdr1.rssi_c(), hdr1.rssi_d()]
                .map(|raw| (raw >> 1) as i8 - MAX_RSSI);
        }

        let ies = if phy_ppdu.to_self {
            parse_phy_sts_ies(phy_sts)
        } else {
            Ok(None)
        };
        match ies {
            Ok(cfo) => {
                phy_ppdu.cfo = cfo;
                phy_ppdu.valid = phy_ppdu.has_rssi;
            }
            Err(_) => debug!("Parse PHY status failed."),
        }
        phy_ppdu
    }
    /// The strongest signal over the first `rf_path_num` paths, and the per chain signals.
    pub fn chain_signal(&self, rf_path_num: usize) -> ChainSignal {
        let paths = rf_path_num.min(RF_PATH_MAX);
        let mut chain_signal = ChainSignal {
            signal: self.rssi[..paths].iter().copied().max().unwrap_or(i8::MIN),
            ..Default::default()
        };
        for (path, rssi) in self.rssi[..paths].iter().enumerate() {
            chain_signal.chains |= 1 << path;
            chain_signal.chain_signal[path] = *rssi;
        }
        chain_signal
    }
}

/// Signal strength of a received frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChainSignal {
    pub signal: i8,
    /// Bitmask of the chains with a valid entry in [Self::chain_signal].
    pub chains: u8,
    pub chain_signal: [i8; RF_PATH_MAX],
}
