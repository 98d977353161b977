//! Configuration
//!
//! [`RawConfig`] mirrors the YAML file: every field optional. [`RrmConfig::resolve`]
//! validates it, fills unset fields with defaults (logging a warning for each)
//! and rejects out-of-range values.
//!
//! ```yaml
//! bandwidth: 10MHz
//! num_tx_antennas: 2
//! num_rx_antennas: 2
//! target_bler: 0.1
//! cqi_interval: 10
//! ri_interval: 10
//! ri_offset: 1
//! scheduler: proportional_fair
//! fading:
//!   max_doppler_hz: 5.0
//!   table_len: 4096
//!   sample_rate_hz: 1000.0
//! ```

use serde::Deserialize;
use std::fmt::Debug;
use std::path::Path;
use tracing::warn;

use crate::error::{ConfigError, Result};
use crate::tables::{CQI_INDEX_LEN, DEFAULT_CQI_SNR_TABLE};
use crate::types::{ChannelBandwidth, SimTime, NANOS_PER_SEC};
use crate::utils::dbm_to_mw;

pub const DEFAULT_TARGET_BLER: f64 = 0.1;
pub const DEFAULT_NUM_TX_ANTENNAS: usize = 1;
pub const DEFAULT_NUM_RX_ANTENNAS: usize = 1;
pub const MAX_NUM_ANTENNAS: usize = 2;
pub const DEFAULT_CQI_INTERVAL: u64 = 10;
pub const DEFAULT_CQI_OFFSET: u64 = 0;
pub const DEFAULT_RI_INTERVAL: u64 = 10;
pub const DEFAULT_RI_OFFSET: u64 = 1;
pub const DEFAULT_PATHLOSS_FILTER_COEFFICIENT: f64 = 40.0;
pub const DEFAULT_INTERFERENCE_FILTER_COEFFICIENT: f64 = 40.0;
pub const DEFAULT_TX_POWER_DBM: f64 = 23.0;
pub const DEFAULT_NOISE_FIGURE_DB: f64 = 7.0;
pub const DEFAULT_PUCCH_OVERHEAD: usize = 0;
pub const DEFAULT_P0_PUSCH_DBM: f64 = -90.0;
pub const DEFAULT_TPC_ALPHA: f64 = 1.0;
pub const DEFAULT_CONNECTION_CHECK_INTERVAL: SimTime = NANOS_PER_SEC;
pub const DEFAULT_PF_FILTER_COEFFICIENT: f64 = 16.0;

/// Thermal noise density
const THERMAL_NOISE_DBM_PER_HZ: f64 = -174.0;
const RB_BANDWIDTH_HZ: f64 = 180_000.0;

/// Fading table parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FadingConfig {
    pub max_doppler_hz: f64,
    pub table_len: usize,
    pub sample_rate_hz: f64,
}

/// How the base station splits the RB pool among eligible stations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPolicy {
    #[default]
    RoundRobin,
    ProportionalFair,
}

/// Configuration as read from YAML or handed over by the host
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    pub bandwidth: Option<ChannelBandwidth>,
    pub num_tx_antennas: Option<usize>,
    pub num_rx_antennas: Option<usize>,
    pub target_bler: Option<f64>,
    pub cqi_interval: Option<u64>,
    pub cqi_offset: Option<u64>,
    pub ri_interval: Option<u64>,
    pub ri_offset: Option<u64>,
    pub pathloss_filter_coefficient: Option<f64>,
    pub interference_filter_coefficient: Option<f64>,
    pub interference_filtering: Option<bool>,
    pub interference_filter_in_db: Option<bool>,
    pub tx_power_dbm: Option<f64>,
    pub noise_figure_db: Option<f64>,
    pub pucch_overhead: Option<usize>,
    pub p0_pusch_dbm: Option<f64>,
    pub tpc_alpha: Option<f64>,
    pub scheduler: Option<SchedulerPolicy>,
    pub pf_filter_coefficient: Option<f64>,
    pub cqi_snr_table: Option<Vec<f64>>,
    pub fading: Option<FadingConfig>,
    pub global_seed: Option<u64>,
    pub connection_check_interval_ms: Option<u64>,
}

/// Validated configuration of one LTE element
#[derive(Debug, Clone, PartialEq)]
pub struct RrmConfig {
    pub bandwidth: ChannelBandwidth,
    pub num_tx_antennas: usize,
    pub num_rx_antennas: usize,
    pub target_bler: f64,
    pub cqi_interval: u64,
    pub cqi_offset: u64,
    pub ri_interval: u64,
    pub ri_offset: u64,
    /// Layer-3 filter coefficient `k`, alpha = 1 / 2^(k/4)
    pub pathloss_filter_coefficient: f64,
    pub interference_filter_coefficient: f64,
    /// Estimate SINR against the filtered interference table instead of the raw one
    pub interference_filtering: bool,
    pub interference_filter_in_db: bool,
    /// Whole-band downlink transmit power of a cell, dBm
    pub tx_power_dbm: f64,
    pub noise_figure_db: f64,
    pub pucch_overhead: usize,
    pub p0_pusch_dbm: f64,
    pub tpc_alpha: f64,
    pub scheduler: SchedulerPolicy,
    /// Averaging coefficient of the proportional-fair throughput history
    pub pf_filter_coefficient: f64,
    pub cqi_snr_table: [f64; CQI_INDEX_LEN],
    pub fading: Option<FadingConfig>,
    pub global_seed: u64,
    pub connection_check_interval: SimTime,
}

impl Default for RrmConfig {
    fn default() -> Self {
        Self {
            bandwidth: ChannelBandwidth::Mhz10,
            num_tx_antennas: DEFAULT_NUM_TX_ANTENNAS,
            num_rx_antennas: DEFAULT_NUM_RX_ANTENNAS,
            target_bler: DEFAULT_TARGET_BLER,
            cqi_interval: DEFAULT_CQI_INTERVAL,
            cqi_offset: DEFAULT_CQI_OFFSET,
            ri_interval: DEFAULT_RI_INTERVAL,
            ri_offset: DEFAULT_RI_OFFSET,
            pathloss_filter_coefficient: DEFAULT_PATHLOSS_FILTER_COEFFICIENT,
            interference_filter_coefficient: DEFAULT_INTERFERENCE_FILTER_COEFFICIENT,
            interference_filtering: false,
            interference_filter_in_db: false,
            tx_power_dbm: DEFAULT_TX_POWER_DBM,
            noise_figure_db: DEFAULT_NOISE_FIGURE_DB,
            pucch_overhead: DEFAULT_PUCCH_OVERHEAD,
            p0_pusch_dbm: DEFAULT_P0_PUSCH_DBM,
            tpc_alpha: DEFAULT_TPC_ALPHA,
            scheduler: SchedulerPolicy::RoundRobin,
            pf_filter_coefficient: DEFAULT_PF_FILTER_COEFFICIENT,
            cqi_snr_table: DEFAULT_CQI_SNR_TABLE,
            fading: None,
            global_seed: 0,
            connection_check_interval: DEFAULT_CONNECTION_CHECK_INTERVAL,
        }
    }
}

fn or_default<T: Debug>(value: Option<T>, name: &'static str, default: T) -> T {
    match value {
        Some(v) => v,
        None => {
            warn!(parameter = name, default = ?default, "parameter not set, using default");
            default
        }
    }
}

fn check_range<T>(name: &'static str, value: T, ok: bool, range: &'static str) -> Result<T>
where
    T: ToString,
{
    if ok {
        Ok(value)
    } else {
        Err(ConfigError::out_of_range(name, value, range))
    }
}

impl RrmConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(yaml)?;
        Self::resolve(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn resolve(raw: RawConfig) -> Result<Self> {
        let d = RrmConfig::default();

        let bandwidth = or_default(raw.bandwidth, "bandwidth", d.bandwidth);

        let num_tx_antennas = or_default(raw.num_tx_antennas, "num_tx_antennas", d.num_tx_antennas);
        let num_tx_antennas = check_range(
            "num_tx_antennas",
            num_tx_antennas,
            (1..=MAX_NUM_ANTENNAS).contains(&num_tx_antennas),
            "[1, 2]",
        )?;
        let num_rx_antennas = or_default(raw.num_rx_antennas, "num_rx_antennas", d.num_rx_antennas);
        let num_rx_antennas = check_range(
            "num_rx_antennas",
            num_rx_antennas,
            (1..=MAX_NUM_ANTENNAS).contains(&num_rx_antennas),
            "[1, 2]",
        )?;

        let target_bler = or_default(raw.target_bler, "target_bler", d.target_bler);
        let target_bler = check_range(
            "target_bler",
            target_bler,
            (0.0..=1.0).contains(&target_bler),
            "[0, 1]",
        )?;

        let cqi_interval = or_default(raw.cqi_interval, "cqi_interval", d.cqi_interval);
        let cqi_interval = check_range("cqi_interval", cqi_interval, cqi_interval > 0, "(0, inf)")?;
        let cqi_offset = or_default(raw.cqi_offset, "cqi_offset", d.cqi_offset);
        let cqi_offset = check_range(
            "cqi_offset",
            cqi_offset,
            cqi_offset < cqi_interval,
            "[0, cqi_interval)",
        )?;
        let ri_interval = or_default(raw.ri_interval, "ri_interval", d.ri_interval);
        let ri_interval = check_range("ri_interval", ri_interval, ri_interval > 0, "(0, inf)")?;
        let ri_offset = or_default(raw.ri_offset, "ri_offset", d.ri_offset);
        let ri_offset = check_range(
            "ri_offset",
            ri_offset,
            ri_offset < ri_interval,
            "[0, ri_interval)",
        )?;

        let pathloss_filter_coefficient = or_default(
            raw.pathloss_filter_coefficient,
            "pathloss_filter_coefficient",
            d.pathloss_filter_coefficient,
        );
        let pathloss_filter_coefficient = check_range(
            "pathloss_filter_coefficient",
            pathloss_filter_coefficient,
            pathloss_filter_coefficient >= 0.0,
            "[0, inf)",
        )?;
        let interference_filter_coefficient = or_default(
            raw.interference_filter_coefficient,
            "interference_filter_coefficient",
            d.interference_filter_coefficient,
        );
        let interference_filter_coefficient = check_range(
            "interference_filter_coefficient",
            interference_filter_coefficient,
            interference_filter_coefficient >= 0.0,
            "[0, inf)",
        )?;

        let pucch_overhead = or_default(raw.pucch_overhead, "pucch_overhead", d.pucch_overhead);
        let pucch_overhead = check_range(
            "pucch_overhead",
            pucch_overhead,
            pucch_overhead < bandwidth.num_rb(),
            "[0, num_rb)",
        )?;

        let tpc_alpha = or_default(raw.tpc_alpha, "tpc_alpha", d.tpc_alpha);
        let tpc_alpha = check_range("tpc_alpha", tpc_alpha, (0.0..=1.0).contains(&tpc_alpha), "[0, 1]")?;

        let scheduler = or_default(raw.scheduler, "scheduler", d.scheduler);
        let pf_filter_coefficient = match (scheduler, raw.pf_filter_coefficient) {
            (_, Some(k)) => k,
            (SchedulerPolicy::ProportionalFair, None) => {
                or_default(None, "pf_filter_coefficient", d.pf_filter_coefficient)
            }
            (SchedulerPolicy::RoundRobin, None) => d.pf_filter_coefficient,
        };
        let pf_filter_coefficient = check_range(
            "pf_filter_coefficient",
            pf_filter_coefficient,
            pf_filter_coefficient >= 0.0,
            "[0, inf)",
        )?;

        let cqi_snr_table = match raw.cqi_snr_table {
            None => d.cqi_snr_table,
            Some(values) => {
                let table: [f64; CQI_INDEX_LEN] =
                    values.try_into().map_err(|v: Vec<f64>| ConfigError::Invalid {
                        name: "cqi_snr_table",
                        reason: format!("expected {} entries, got {}", CQI_INDEX_LEN, v.len()),
                    })?;
                if table.windows(2).any(|w| w[1] < w[0]) {
                    return Err(ConfigError::Invalid {
                        name: "cqi_snr_table",
                        reason: "thresholds must be non-decreasing".into(),
                    });
                }
                table
            }
        };

        if let Some(fading) = &raw.fading {
            if fading.table_len == 0 {
                return Err(ConfigError::out_of_range("fading.table_len", 0, "[1, inf)"));
            }
            if !(fading.sample_rate_hz > 0.0) {
                return Err(ConfigError::out_of_range(
                    "fading.sample_rate_hz",
                    fading.sample_rate_hz,
                    "(0, inf)",
                ));
            }
            if fading.max_doppler_hz < 0.0 {
                return Err(ConfigError::out_of_range(
                    "fading.max_doppler_hz",
                    fading.max_doppler_hz,
                    "[0, inf)",
                ));
            }
        }

        let connection_check_interval = match raw.connection_check_interval_ms {
            None => d.connection_check_interval,
            Some(ms) => ms.checked_mul(1_000_000).ok_or_else(|| {
                ConfigError::out_of_range(
                    "connection_check_interval_ms",
                    ms,
                    "(0, 18446744073709]",
                )
            })?,
        };
        let connection_check_interval = check_range(
            "connection_check_interval_ms",
            connection_check_interval,
            connection_check_interval > 0,
            "(0, inf)",
        )?;

        Ok(Self {
            bandwidth,
            num_tx_antennas,
            num_rx_antennas,
            target_bler,
            cqi_interval,
            cqi_offset,
            ri_interval,
            ri_offset,
            pathloss_filter_coefficient,
            interference_filter_coefficient,
            interference_filtering: raw.interference_filtering.unwrap_or(d.interference_filtering),
            interference_filter_in_db: raw
                .interference_filter_in_db
                .unwrap_or(d.interference_filter_in_db),
            tx_power_dbm: or_default(raw.tx_power_dbm, "tx_power_dbm", d.tx_power_dbm),
            noise_figure_db: or_default(raw.noise_figure_db, "noise_figure_db", d.noise_figure_db),
            pucch_overhead,
            p0_pusch_dbm: or_default(raw.p0_pusch_dbm, "p0_pusch_dbm", d.p0_pusch_dbm),
            tpc_alpha,
            scheduler,
            pf_filter_coefficient,
            cqi_snr_table,
            fading: raw.fading,
            global_seed: raw.global_seed.unwrap_or(d.global_seed),
            connection_check_interval,
        })
    }

    pub fn num_rb(&self) -> usize {
        self.bandwidth.num_rb()
    }

    /// Thermal noise per resource block, mW
    pub fn noise_mw_per_rb(&self) -> f64 {
        dbm_to_mw(THERMAL_NOISE_DBM_PER_HZ + 10.0 * RB_BANDWIDTH_HZ.log10() + self.noise_figure_db)
    }
}
