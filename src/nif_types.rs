//! Terms exchanged with Elixir

use rustler::{Atom, NifStruct};

use crate::config::{RawConfig, RrmConfig};
use crate::error::{ConfigError, Result};
use crate::feedback::FeedbackUpdate;
use crate::scheduler::SchedulingEntry;
use crate::tables::{CQI_INDEX_LEN, MAX_RANK};
use crate::types::{ChannelBandwidth, StationId, TxScheme};

mod atoms {
    rustler::atoms! {
        single_antenna,
        diversity,
        open_loop_spatial_multiplexing,
    }
}

/// Base station parameters from Elixir. `config_yaml` is read first; the
/// explicit fields override it when not nil.
#[derive(NifStruct, Debug, Clone, Default)]
#[module = "LteRrm.Types.BaseStationParams"]
pub struct BaseStationParams {
    pub node_id: u32,
    pub interface_index: u32,
    pub channel_index: u32,
    pub config_yaml: Option<String>,
    pub bandwidth_mhz: Option<f64>,
    pub num_tx_antennas: Option<usize>,
    pub num_rx_antennas: Option<usize>,
    pub target_bler: Option<f64>,
    pub global_seed: Option<u64>,
}

impl BaseStationParams {
    pub fn station_id(&self) -> StationId {
        StationId::new(self.node_id, self.interface_index)
    }

    pub fn to_config(&self) -> Result<RrmConfig> {
        let mut raw: RawConfig = match &self.config_yaml {
            Some(yaml) => serde_yaml::from_str(yaml)?,
            None => RawConfig::default(),
        };
        if let Some(mhz) = self.bandwidth_mhz {
            let bw = ChannelBandwidth::from_mhz(mhz).ok_or_else(|| ConfigError::Invalid {
                name: "bandwidth_mhz",
                reason: format!("{} MHz is not an LTE bandwidth", mhz),
            })?;
            raw.bandwidth = Some(bw);
        }
        raw.num_tx_antennas = self.num_tx_antennas.or(raw.num_tx_antennas);
        raw.num_rx_antennas = self.num_rx_antennas.or(raw.num_rx_antennas);
        raw.target_bler = self.target_bler.or(raw.target_bler);
        raw.global_seed = self.global_seed.or(raw.global_seed);
        RrmConfig::resolve(raw)
    }
}

/// Validate a CQI/RI report coming from Elixir
pub fn feedback_update(is_rank: bool, values: &[u8]) -> Option<FeedbackUpdate> {
    if is_rank {
        match values {
            [rank] if (1..=MAX_RANK).contains(rank) => Some(FeedbackUpdate::Ri(*rank)),
            _ => None,
        }
    } else {
        let valid = |c: &u8| (*c as usize) < CQI_INDEX_LEN;
        match values {
            [cqi0] if valid(cqi0) => Some(FeedbackUpdate::Cqi { cqi0: *cqi0, cqi1: None }),
            [cqi0, cqi1] if valid(cqi0) && valid(cqi1) => Some(FeedbackUpdate::Cqi {
                cqi0: *cqi0,
                cqi1: Some(*cqi1),
            }),
            _ => None,
        }
    }
}

fn scheme_atom(scheme: TxScheme) -> Atom {
    match scheme {
        TxScheme::SingleAntenna => atoms::single_antenna(),
        TxScheme::Diversity => atoms::diversity(),
        TxScheme::OpenLoopSpatialMultiplexing => atoms::open_loop_spatial_multiplexing(),
    }
}

#[derive(NifStruct, Debug, Clone)]
#[module = "LteRrm.Types.SchedulingEntry"]
pub struct SchedulingEntryTerm {
    pub node_id: u32,
    pub interface_index: u32,
    pub rbs: Vec<usize>,
    pub tx_scheme: Atom,
    pub mcs: Vec<u8>,
    pub bearer_id: u8,
    pub dequeue_bytes: Vec<u32>,
    pub sinr_db: Vec<f64>,
}

impl From<&SchedulingEntry> for SchedulingEntryTerm {
    fn from(e: &SchedulingEntry) -> Self {
        Self {
            node_id: e.station.node_id,
            interface_index: e.station.interface_index,
            rbs: e.allocated_rbs.iter().collect(),
            tx_scheme: scheme_atom(e.tx_scheme),
            mcs: e.transport_blocks.iter().map(|tb| tb.mcs).collect(),
            bearer_id: e
                .transport_blocks
                .first()
                .map(|tb| tb.dequeue.bearer_id)
                .unwrap_or_default(),
            dequeue_bytes: e
                .transport_blocks
                .iter()
                .map(|tb| tb.dequeue.size_bytes)
                .collect(),
            sinr_db: e.transport_blocks.iter().map(|tb| tb.sinr_db).collect(),
        }
    }
}

#[derive(NifStruct, Debug, Clone)]
#[module = "LteRrm.Types.TtiResult"]
pub struct TtiResultTerm {
    pub tti: u64,
    pub downlink: Vec<SchedulingEntryTerm>,
    pub uplink: Vec<SchedulingEntryTerm>,
}
