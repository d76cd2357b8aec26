//! Per peer signal tracking.

use alloc::{collections::BTreeMap, vec::Vec};

/// Exponentially weighted moving average of the RSSI.
///
/// Values are kept in fixed point with [Self::PRECISION] fractional bits and every new sample is
/// weighted with 1/[Self::WEIGHT_RCP].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EwmaRssi {
    internal: u32,
}
impl EwmaRssi {
    pub const PRECISION: u32 = 10;
    pub const WEIGHT_RCP: u32 = 16;
    const WEIGHT_RCP_LOG2: u32 = Self::WEIGHT_RCP.ilog2();

    pub const fn new() -> Self {
        Self { internal: 0 }
    }
    pub fn add(&mut self, value: u32) {
        let value = value << Self::PRECISION;
        self.internal = if self.internal == 0 {
            value
        } else {
            // internal * (1 - 1/weight) + value / weight
            (((self.internal << Self::WEIGHT_RCP_LOG2) - self.internal) + value)
                >> Self::WEIGHT_RCP_LOG2
        };
    }
    pub const fn read(&self) -> u32 {
        self.internal >> Self::PRECISION
    }
}

/// Accumulated signal statistics of a single peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub avg_rssi: EwmaRssi,
    pub cfo_tail: i32,
    pub cfo_cnt: u32,
}
impl PeerStats {
    pub fn add_cfo(&mut self, cfo: i16) {
        self.cfo_tail += cfo as i32;
        self.cfo_cnt += 1;
    }
}

/// The result of tracking a single peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerTrack {
    pub mac_id: u8,
    pub avg_rssi: u32,
    /// Average CFO since the last track, if any was reported.
    pub avg_cfo: Option<i32>,
}

/// Signal statistics of all known peers, keyed by MAC id.
#[derive(Clone, Debug, Default)]
pub struct Telemetry {
    peers: BTreeMap<u8, PeerStats>,
}
impl Telemetry {
    pub const fn new() -> Self {
        Self {
            peers: BTreeMap::new(),
        }
    }
    /// Start tracking `mac_id` from scratch.
    pub fn add_peer(&mut self, mac_id: u8) {
        self.peers.insert(mac_id, PeerStats::default());
    }
    pub fn remove_peer(&mut self, mac_id: u8) {
        self.peers.remove(&mac_id);
    }
    pub fn peer(&self, mac_id: u8) -> Option<&PeerStats> {
        self.peers.get(&mac_id)
    }
    /// Feed an average RSSI sample. Unknown peers are ignored.
    pub fn add_rssi(&mut self, mac_id: u8, rssi_avg: u8) {
        if let Some(stats) = self.peers.get_mut(&mac_id) {
            stats.avg_rssi.add(rssi_avg as u32);
        }
    }
    /// Feed a CFO sample. Unknown peers are ignored.
    pub fn add_cfo(&mut self, mac_id: u8, cfo: i16) {
        if let Some(stats) = self.peers.get_mut(&mac_id) {
            stats.add_cfo(cfo);
        }
    }
    /// Summarize every peer and restart CFO accumulation.
    pub fn track(&mut self) -> Vec<PeerTrack> {
        self.peers
            .iter_mut()
            .map(|(mac_id, stats)| {
                let avg_cfo = (stats.cfo_cnt != 0).then(|| stats.cfo_tail / stats.cfo_cnt as i32);
                stats.cfo_tail = 0;
                stats.cfo_cnt = 0;
                PeerTrack {
                    mac_id: *mac_id,
                    avg_rssi: stats.avg_rssi.read(),
                    avg_cfo,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_converges() {
        let mut ewma = EwmaRssi::new();
        ewma.add(100);
        assert_eq!(ewma.read(), 100);
        ewma.add(116);
        assert_eq!(ewma.read(), 101);
        for _ in 0..200 {
            ewma.add(60);
        }
        assert_eq!(ewma.read(), 60);
    }

    #[test]
    fn track_resets_cfo() {
        let mut telemetry = Telemetry::new();
        telemetry.add_peer(1);
        telemetry.add_cfo(1, -2);
        telemetry.add_cfo(1, -4);
        telemetry.add_rssi(1, 80);
        // Unknown peers don't show up.
        telemetry.add_cfo(2, 10);

        let tracks = telemetry.track();
        assert_eq!(
            tracks,
            [PeerTrack {
                mac_id: 1,
                avg_rssi: 80,
                avg_cfo: Some(-3)
            }]
        );
        assert_eq!(telemetry.track()[0].avg_cfo, None);
        telemetry.remove_peer(1);
        assert!(telemetry.track().is_empty());
    }
}
