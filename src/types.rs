//! Core value types: station identity, bandwidth, transmission scheme,
//! resource-block bitmaps and simulation time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulation time in nanoseconds
pub type SimTime = u64;

pub const NANOS_PER_SEC: SimTime = 1_000_000_000;

/// One LTE subframe
pub const TTI_NS: SimTime = 1_000_000;

/// Largest RB count any supported bandwidth produces
pub const MAX_NUM_RB: usize = 100;

/// Every transmission uses this bearer until multi-bearer mapping exists
pub const DEFAULT_BEARER_ID: u8 = 0;

/// Identity of one radio endpoint: owning element plus interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StationId {
    pub node_id: u32,
    pub interface_index: u32,
}

impl StationId {
    pub const fn new(node_id: u32, interface_index: u32) -> Self {
        Self {
            node_id,
            interface_index,
        }
    }

    /// Packed form used for seed derivation and NIF handles
    pub const fn as_u64(self) -> u64 {
        ((self.node_id as u64) << 32) | self.interface_index as u64
    }

    pub const fn from_u64(v: u64) -> Self {
        Self::new((v >> 32) as u32, v as u32)
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_id, self.interface_index)
    }
}

/// Channel bandwidths defined for LTE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelBandwidth {
    #[serde(rename = "1.4MHz")]
    Mhz1_4,
    #[serde(rename = "3MHz")]
    Mhz3,
    #[serde(rename = "5MHz")]
    Mhz5,
    #[serde(rename = "10MHz")]
    Mhz10,
    #[serde(rename = "15MHz")]
    Mhz15,
    #[serde(rename = "20MHz")]
    Mhz20,
}

impl ChannelBandwidth {
    /// Number of resource blocks in the band
    pub const fn num_rb(self) -> usize {
        match self {
            ChannelBandwidth::Mhz1_4 => 6,
            ChannelBandwidth::Mhz3 => 15,
            ChannelBandwidth::Mhz5 => 25,
            ChannelBandwidth::Mhz10 => 50,
            ChannelBandwidth::Mhz15 => 75,
            ChannelBandwidth::Mhz20 => 100,
        }
    }

    pub fn from_mhz(mhz: f64) -> Option<Self> {
        const TABLE: [(f64, ChannelBandwidth); 6] = [
            (1.4, ChannelBandwidth::Mhz1_4),
            (3.0, ChannelBandwidth::Mhz3),
            (5.0, ChannelBandwidth::Mhz5),
            (10.0, ChannelBandwidth::Mhz10),
            (15.0, ChannelBandwidth::Mhz15),
            (20.0, ChannelBandwidth::Mhz20),
        ];
        TABLE
            .iter()
            .find(|(m, _)| (m - mhz).abs() < 1e-6)
            .map(|&(_, bw)| bw)
    }
}

/// Downlink/uplink transmission schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxScheme {
    SingleAntenna,
    /// Space-frequency block coding over two transmit antennas
    Diversity,
    /// Open-loop spatial multiplexing, two layers
    OpenLoopSpatialMultiplexing,
}

impl TxScheme {
    pub const fn num_transport_blocks(self) -> usize {
        match self {
            TxScheme::SingleAntenna | TxScheme::Diversity => 1,
            TxScheme::OpenLoopSpatialMultiplexing => 2,
        }
    }

    pub const fn num_layers(self) -> usize {
        self.num_transport_blocks()
    }

    /// Scheme implied by a reported rank and the number of transmit antennas
    pub fn from_rank(rank: u8, num_tx_antennas: usize) -> Self {
        match (num_tx_antennas, rank) {
            (1, _) => TxScheme::SingleAntenna,
            (_, 1) => TxScheme::Diversity,
            _ => TxScheme::OpenLoopSpatialMultiplexing,
        }
    }
}

/// Link direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Downlink,
    Uplink,
}

/// Bitmap of resource blocks, bit `i` set when RB `i` is used.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RbBitmap(u128);

impl RbBitmap {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Contiguous run `[start, start + len)`
    pub fn from_range(start: usize, len: usize) -> Self {
        assert!(start + len <= 128, "RB range {}+{} exceeds bitmap", start, len);
        let mut map = Self::empty();
        for rb in start..start + len {
            map.set(rb);
        }
        map
    }

    pub fn from_bits(bits: u128) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u128 {
        self.0
    }

    pub fn set(&mut self, rb: usize) {
        assert!(rb < 128, "RB index {} out of bitmap range", rb);
        self.0 |= 1u128 << rb;
    }

    pub fn is_set(&self, rb: usize) -> bool {
        rb < 128 && self.0 & (1u128 << rb) != 0
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_disjoint(&self, other: &RbBitmap) -> bool {
        self.0 & other.0 == 0
    }

    /// Indices of used RBs in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let bits = self.0;
        (0..128).filter(move |&rb| bits & (1u128 << rb) != 0)
    }
}

impl fmt::Debug for RbBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_id_pack() {
        let id = StationId::new(7, 3);
        assert_eq!(id.as_u64(), (7u64 << 32) | 3);
        assert_eq!(StationId::from_u64(id.as_u64()), id);
        assert!(StationId::new(8, 0) > StationId::new(7, 99));
    }

    #[test]
    fn test_bandwidth_rb_counts() {
        let counts: Vec<usize> = [
            ChannelBandwidth::Mhz1_4,
            ChannelBandwidth::Mhz3,
            ChannelBandwidth::Mhz5,
            ChannelBandwidth::Mhz10,
            ChannelBandwidth::Mhz15,
            ChannelBandwidth::Mhz20,
        ]
        .iter()
        .map(|b| b.num_rb())
        .collect();
        assert_eq!(counts, vec![6, 15, 25, 50, 75, 100]);
        assert_eq!(ChannelBandwidth::from_mhz(10.0), Some(ChannelBandwidth::Mhz10));
        assert_eq!(ChannelBandwidth::from_mhz(7.0), None);
    }

    #[test]
    fn test_scheme_from_rank() {
        assert_eq!(TxScheme::from_rank(2, 1), TxScheme::SingleAntenna);
        assert_eq!(TxScheme::from_rank(1, 2), TxScheme::Diversity);
        assert_eq!(TxScheme::from_rank(2, 2), TxScheme::OpenLoopSpatialMultiplexing);
        assert_eq!(TxScheme::OpenLoopSpatialMultiplexing.num_transport_blocks(), 2);
    }

    #[test]
    fn test_bitmap_ops() {
        let a = RbBitmap::from_range(2, 3);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(a.count(), 3);
        let b = RbBitmap::from_range(5, 2);
        assert!(a.is_disjoint(&b));
        assert!(!a.is_disjoint(&RbBitmap::from_range(4, 1)));
        assert!(RbBitmap::empty().is_empty());
        assert!(RbBitmap::from_range(99, 1).is_set(99));
    }
}
