//! Rate codes as reported in receive descriptors.
//!
//! The hardware packs a 9 bit rate code: bits 8:7 hold the PHY mode, the remaining bits are the
//! rate index (legacy, HT) or NSS and MCS (VHT, HE).

use macro_bits::serializable_enum;

use crate::channel::Band;

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    /// PHY mode of a rate code.
    pub enum DataRateMode: u8 {
        #[default]
        NonHt => 0,
        Ht => 1,
        Vht => 2,
        He => 3
    }
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    /// Combined guard interval and HE-LTF size field.
    pub enum GiLtf: u8 {
        #[default]
        Lgi4xHe32 => 0,
        Sgi4xHe08 => 1,
        He2x16 => 2,
        He2x08 => 3,
        He1x16 => 4,
        He1x08 => 5
    }
}

/// HE guard interval classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeGi {
    Gi0_8,
    Gi1_6,
    Gi3_2,
}
impl HeGi {
    /// Decode the raw GI/LTF field of a descriptor. Reserved values yield [None].
    pub fn from_gi_ltf(raw: u8) -> Option<Self> {
        match GiLtf::from_bits(raw) {
            GiLtf::Sgi4xHe08 | GiLtf::He2x08 | GiLtf::He1x08 => Some(Self::Gi0_8),
            GiLtf::He2x16 | GiLtf::He1x16 => Some(Self::Gi1_6),
            GiLtf::Lgi4xHe32 if raw == GiLtf::Lgi4xHe32.into_bits() => Some(Self::Gi3_2),
            _ => None,
        }
    }
}

/// Encoding of a received PPDU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxEncoding {
    #[default]
    Legacy,
    Ht,
    Vht,
    He,
}

/// Bandwidth as reported to the network stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RateInfoBw {
    #[default]
    Bw20,
    Bw40,
    Bw80,
}
impl RateInfoBw {
    /// Decode the raw bandwidth field of a receive descriptor.
    pub const fn from_desc(raw: u8) -> Self {
        match raw {
            2 => Self::Bw80,
            1 => Self::Bw40,
            _ => Self::Bw20,
        }
    }
}

/// The number of CCK rates at the start of the legacy rate table, which don't exist on 5 GHz.
const CCK_RATE_COUNT: u8 = 4;

/// A decoded rate code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DataRate(pub u16);
impl DataRate {
    pub fn mode(self) -> DataRateMode {
        DataRateMode::from_bits(((self.0 >> 7) & 0b11) as u8)
    }
    const fn not_ht_idx(self) -> u8 {
        (self.0 & 0xf) as u8
    }
    const fn ht_idx(self) -> u8 {
        (self.0 & 0x3f) as u8
    }
    const fn vht_he_idx(self) -> u8 {
        (self.0 & 0xf) as u8
    }
    const fn nss(self) -> u8 {
        ((self.0 >> 4) & 0b111) as u8
    }
    /// The encoding and the rate index in the band's rate table.
    ///
    /// Legacy indices on 5 GHz are corrected for the missing CCK rates. A CCK code on 5 GHz wraps
    /// to an index outside of the table, so it never aliases an OFDM rate.
    pub fn rate_index(self, band: Band) -> (RxEncoding, u8) {
        match self.mode() {
            DataRateMode::NonHt => {
                let idx = self.not_ht_idx();
                let idx = if band == Band::Band5G {
                    idx.wrapping_sub(CCK_RATE_COUNT)
                } else {
                    idx
                };
                (RxEncoding::Legacy, idx)
            }
            DataRateMode::Ht => (RxEncoding::Ht, self.ht_idx()),
            DataRateMode::Vht => (RxEncoding::Vht, self.vht_he_idx()),
            _ => (RxEncoding::He, self.vht_he_idx()),
        }
    }
    /// Number of spatial streams, only meaningful for VHT and HE.
    pub fn spatial_streams(self) -> Option<u8> {
        match self.mode() {
            DataRateMode::Vht | DataRateMode::He => Some(self.nss() + 1),
            _ => None,
        }
    }
}

/// Legacy rates in units of 100 kbps, indexed by the rate adaption report.
pub const BITRATES: [u16; 12] = [10, 20, 55, 110, 60, 90, 120, 180, 240, 360, 480, 540];

/// Convert a rate adaption report index to a bitrate in units of 100 kbps.
pub fn ra_report_to_bitrate(rpt_rate: u8) -> u16 {
    match BITRATES.get(rpt_rate as usize) {
        Some(bitrate) => *bitrate,
        None => {
            info!("Invalid rate report index {}.", rpt_rate);
            0
        }
    }
}
