//! Channel tables and the channel geometry resolver.
//!
//! mac80211 style channel definitions describe a channel by its primary 20 MHz channel and the
//! center frequency of the whole (possibly bonded) channel. The baseband however wants to know
//! the center channel number for every bandwidth tier up to the selected one, together with the
//! position of the primary channel inside the bonded channel. [get_channel_params] computes this.

use macro_bits::serializable_enum;

/// The frequency band a channel lives in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Band {
    #[default]
    Band2G,
    Band5G,
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    /// Bandwidth tier as used by the baseband.
    pub enum ChannelWidth: u8 {
        #[default]
        Width20 => 0,
        Width40 => 1,
        Width80 => 2,
        Width160 => 3,
        Width80P80 => 4,
        Width5 => 5,
        Width10 => 6
    }
}
impl ChannelWidth {
    /// The widest tier for which a center channel is tracked.
    pub const MAX_TRACKED: ChannelWidth = ChannelWidth::Width80;
    /// Index into [ChannelParams::cch_by_bw].
    pub const fn tier(self) -> usize {
        self.into_bits() as usize
    }
}
/// Number of entries in [ChannelParams::cch_by_bw].
pub const CHANNEL_WIDTH_TIERS: usize = ChannelWidth::MAX_TRACKED.tier() + 1;

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    /// Position of the primary 20 MHz channel inside a bonded channel.
    pub enum SubChannel: u8 {
        #[default]
        DontCare => 0,
        Upper20 => 1,
        Lower20 => 2,
        Upmost20 => 3,
        Lowest20 => 4
    }
}

/// Sub-band, used for TX power and calibration tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubBand {
    #[default]
    Band2G,
    Band5GBand1,
    Band5GBand3,
    Band5GBand4,
}
impl SubBand {
    /// Classify a center channel. Channels outside of all ranges keep the previous sub-band.
    pub const fn from_center_channel(center_chan: u8) -> Option<Self> {
        match center_chan {
            1..=14 => Some(Self::Band2G),
            36..=64 => Some(Self::Band5GBand1),
            100..=144 => Some(Self::Band5GBand3),
            149..=177 => Some(Self::Band5GBand4),
            _ => None,
        }
    }
}

/// A 20 MHz channel supported by the hardware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Channel {
    /// Center frequency of the 20 MHz channel in MHz.
    pub center_freq: u16,
    /// The IEEE channel number.
    pub hw_value: u8,
    pub band: Band,
    /// HT40- may not be used with this channel as primary.
    pub no_ht40_minus: bool,
}
impl Channel {
    const fn new_2g(center_freq: u16, hw_value: u8) -> Self {
        Self {
            center_freq,
            hw_value,
            band: Band::Band2G,
            no_ht40_minus: false,
        }
    }
    const fn new_5g(center_freq: u16, hw_value: u8) -> Self {
        Self {
            center_freq,
            hw_value,
            band: Band::Band5G,
            no_ht40_minus: false,
        }
    }
    /// Look up a supported channel by its center frequency.
    pub fn from_freq(center_freq: u16) -> Option<Self> {
        CHANNELS_2GHZ
            .iter()
            .chain(CHANNELS_5GHZ.iter())
            .find(|channel| channel.center_freq == center_freq)
            .copied()
    }
    /// Look up a supported channel by its channel number.
    pub fn from_hw_value(band: Band, hw_value: u8) -> Option<Self> {
        let table: &[Channel] = match band {
            Band::Band2G => &CHANNELS_2GHZ,
            Band::Band5G => &CHANNELS_5GHZ,
        };
        table
            .iter()
            .find(|channel| channel.hw_value == hw_value)
            .copied()
    }
}

pub static CHANNELS_2GHZ: [Channel; 14] = [
    Channel::new_2g(2412, 1),
    Channel::new_2g(2417, 2),
    Channel::new_2g(2422, 3),
    Channel::new_2g(2427, 4),
    Channel::new_2g(2432, 5),
    Channel::new_2g(2437, 6),
    Channel::new_2g(2442, 7),
    Channel::new_2g(2447, 8),
    Channel::new_2g(2452, 9),
    Channel::new_2g(2457, 10),
    Channel::new_2g(2462, 11),
    Channel::new_2g(2467, 12),
    Channel::new_2g(2472, 13),
    Channel::new_2g(2484, 14),
];

pub static CHANNELS_5GHZ: [Channel; 25] = [
    Channel::new_5g(5180, 36),
    Channel::new_5g(5200, 40),
    Channel::new_5g(5220, 44),
    Channel::new_5g(5240, 48),
    Channel::new_5g(5260, 52),
    Channel::new_5g(5280, 56),
    Channel::new_5g(5300, 60),
    Channel::new_5g(5320, 64),
    Channel::new_5g(5500, 100),
    Channel::new_5g(5520, 104),
    Channel::new_5g(5540, 108),
    Channel::new_5g(5560, 112),
    Channel::new_5g(5580, 116),
    Channel::new_5g(5600, 120),
    Channel::new_5g(5620, 124),
    Channel::new_5g(5640, 128),
    Channel::new_5g(5660, 132),
    Channel::new_5g(5680, 136),
    Channel::new_5g(5700, 140),
    Channel::new_5g(5720, 144),
    Channel::new_5g(5745, 149),
    Channel::new_5g(5765, 153),
    Channel::new_5g(5785, 157),
    Channel::new_5g(5805, 161),
    Channel {
        no_ht40_minus: true,
        ..Channel::new_5g(5825, 165)
    },
];

/// Requested channel width, as handed down by the upper layers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChanWidth {
    Width20NoHt,
    #[default]
    Width20,
    Width40,
    Width80,
    Width80P80,
    Width160,
    Width5,
    Width10,
}

/// A channel definition: primary channel, width and center frequency of the bonded channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChanDef {
    pub chan: Channel,
    pub width: ChanWidth,
    /// Center frequency of the whole channel in MHz.
    pub center_freq1: u16,
}
impl ChanDef {
    /// A plain 20 MHz channel definition.
    pub const fn new_20(chan: Channel) -> Self {
        Self {
            chan,
            width: ChanWidth::Width20,
            center_freq1: chan.center_freq,
        }
    }
}

/// The channel geometry, as consumed by the baseband.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChannelParams {
    /// Center channel of the selected bandwidth. Zero if the request was invalid.
    pub center_chan: u8,
    pub primary_chan: u8,
    pub bandwidth: ChannelWidth,
    pub pri_ch_idx: SubChannel,
    /// Center channel for every bandwidth tier. Tiers above [Self::bandwidth] are zero.
    pub cch_by_bw: [u8; CHANNEL_WIDTH_TIERS],
}
impl ChannelParams {
    /// Check if the resolver accepted the channel definition.
    pub const fn is_valid(&self) -> bool {
        self.center_chan != 0
    }
    /// The band of the resolved center channel.
    pub const fn band(&self) -> Band {
        if self.center_chan > 14 {
            Band::Band5G
        } else {
            Band::Band2G
        }
    }
}

/// Resolve a channel definition into the per tier center channels.
///
/// Unsupported widths produce a center channel of zero, which callers must reject.
pub fn get_channel_params(chandef: &ChanDef) -> ChannelParams {
    let channel = &chandef.chan;
    let primary_freq = channel.center_freq;
    let center_freq = chandef.center_freq1;
    let mut cch_by_bw = [0u8; CHANNEL_WIDTH_TIERS];
    let mut center_chan = channel.hw_value;
    let mut bandwidth = ChannelWidth::Width20;
    let mut primary_chan_idx = SubChannel::DontCare;

    cch_by_bw[ChannelWidth::Width20.tier()] = channel.hw_value;

    match chandef.width {
        ChanWidth::Width20NoHt | ChanWidth::Width20 => {}
        ChanWidth::Width40 => {
            bandwidth = ChannelWidth::Width40;
            if primary_freq > center_freq {
                primary_chan_idx = SubChannel::Upper20;
                center_chan = center_chan.wrapping_sub(2);
            } else {
                primary_chan_idx = SubChannel::Lower20;
                center_chan = center_chan.wrapping_add(2);
            }
        }
        ChanWidth::Width80 => {
            bandwidth = ChannelWidth::Width80;
            if primary_freq > center_freq {
                if primary_freq - center_freq == 10 {
                    primary_chan_idx = SubChannel::Upper20;
                    center_chan = center_chan.wrapping_sub(2);
                } else {
                    primary_chan_idx = SubChannel::Upmost20;
                    center_chan = center_chan.wrapping_sub(6);
                }
                cch_by_bw[ChannelWidth::Width40.tier()] = center_chan.wrapping_add(4);
            } else {
                if center_freq - primary_freq == 10 {
                    primary_chan_idx = SubChannel::Lower20;
                    center_chan = center_chan.wrapping_add(2);
                } else {
                    primary_chan_idx = SubChannel::Lowest20;
                    center_chan = center_chan.wrapping_add(6);
                }
                cch_by_bw[ChannelWidth::Width40.tier()] = center_chan.wrapping_sub(4);
            }
        }
        _ => center_chan = 0,
    }

    cch_by_bw[bandwidth.tier()] = center_chan;
    for cch in cch_by_bw.iter_mut().skip(bandwidth.tier() + 1) {
        *cch = 0;
    }

    ChannelParams {
        center_chan,
        primary_chan: channel.hw_value,
        bandwidth,
        pri_ch_idx: primary_chan_idx,
        cch_by_bw,
    }
}
