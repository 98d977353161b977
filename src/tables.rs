//! LTE link-adaptation tables
//!
//! CQI table (36.213 7.2.3-1), PDSCH/PUSCH MCS tables, the transport-block
//! size model, RB-group sizing and the per-MCS bit-error-rate curves used
//! by the MCS selector.

use crate::types::Direction;
use crate::utils::{db_to_linear, erfc};

pub const CQI_INDEX_LEN: usize = 16;
pub const MCS_INDEX_LEN: usize = 32;
/// Indices 29..=31 are reserved for retransmissions
pub const REGULAR_MCS_INDEX_LEN: usize = 29;
pub const MAX_TBS_NUM_RB: usize = 110;
pub const MAX_RANK: u8 = 2;

/// CQI threshold SNRs in dB: CQI `i` is reportable when SINR >= entry `i`
pub const DEFAULT_CQI_SNR_TABLE: [f64; CQI_INDEX_LEN] = [
    -5.00, -4.42, -3.40, -1.70, -0.19, 1.34, 2.64, 5.16, 6.71, 8.18, 10.43, 11.84, 13.32, 15.53,
    16.20, 22.38,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    None,
    Qpsk,
    Qam16,
    Qam64,
}

impl Modulation {
    pub const fn order(self) -> u8 {
        match self {
            Modulation::None => 0,
            Modulation::Qpsk => 2,
            Modulation::Qam16 => 4,
            Modulation::Qam64 => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CqiEntry {
    pub modulation: Modulation,
    /// Code rate x 1024
    pub code_rate: u16,
}

impl CqiEntry {
    /// Information bits per resource element
    pub fn efficiency(&self) -> f64 {
        self.modulation.order() as f64 * self.code_rate as f64 / 1024.0
    }
}

const fn cqi(modulation: Modulation, code_rate: u16) -> CqiEntry {
    CqiEntry {
        modulation,
        code_rate,
    }
}

pub const CQI_TABLE: [CqiEntry; CQI_INDEX_LEN] = [
    cqi(Modulation::None, 0),
    cqi(Modulation::Qpsk, 78),
    cqi(Modulation::Qpsk, 120),
    cqi(Modulation::Qpsk, 193),
    cqi(Modulation::Qpsk, 308),
    cqi(Modulation::Qpsk, 449),
    cqi(Modulation::Qpsk, 602),
    cqi(Modulation::Qam16, 378),
    cqi(Modulation::Qam16, 490),
    cqi(Modulation::Qam16, 616),
    cqi(Modulation::Qam64, 466),
    cqi(Modulation::Qam64, 567),
    cqi(Modulation::Qam64, 666),
    cqi(Modulation::Qam64, 772),
    cqi(Modulation::Qam64, 873),
    cqi(Modulation::Qam64, 948),
];

/// Spectral efficiency of a CQI index
pub fn cqi_efficiency(cqi: u8) -> f64 {
    assert!((cqi as usize) < CQI_INDEX_LEN, "CQI index {} out of range", cqi);
    CQI_TABLE[cqi as usize].efficiency()
}

/// Largest CQI whose threshold does not exceed `sinr_db`, 0 when none does.
pub fn quantize_cqi(snr_table: &[f64; CQI_INDEX_LEN], sinr_db: f64) -> u8 {
    snr_table
        .iter()
        .rposition(|&threshold| threshold <= sinr_db)
        .map(|i| i as u8)
        .unwrap_or(0)
}

/// One row of an MCS table: modulation order and TBS index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McsEntry {
    pub modulation_order: u8,
    pub tbs_index: Option<u8>,
}

const fn mcs(modulation_order: u8, tbs_index: u8) -> McsEntry {
    McsEntry {
        modulation_order,
        tbs_index: Some(tbs_index),
    }
}

const fn reserved(modulation_order: u8) -> McsEntry {
    McsEntry {
        modulation_order,
        tbs_index: None,
    }
}

/// 36.213 table 7.1.7.1-1
pub const PDSCH_MCS_TABLE: [McsEntry; MCS_INDEX_LEN] = [
    mcs(2, 0), mcs(2, 1), mcs(2, 2), mcs(2, 3), mcs(2, 4), mcs(2, 5), mcs(2, 6), mcs(2, 7),
    mcs(2, 8), mcs(2, 9), mcs(4, 9), mcs(4, 10), mcs(4, 11), mcs(4, 12), mcs(4, 13), mcs(4, 14),
    mcs(4, 15), mcs(6, 15), mcs(6, 16), mcs(6, 17), mcs(6, 18), mcs(6, 19), mcs(6, 20), mcs(6, 21),
    mcs(6, 22), mcs(6, 23), mcs(6, 24), mcs(6, 25), mcs(6, 26), reserved(2), reserved(4),
    reserved(6),
];

/// 36.213 table 8.6.1-1
pub const PUSCH_MCS_TABLE: [McsEntry; MCS_INDEX_LEN] = [
    mcs(2, 0), mcs(2, 1), mcs(2, 2), mcs(2, 3), mcs(2, 4), mcs(2, 5), mcs(2, 6), mcs(2, 7),
    mcs(2, 8), mcs(2, 9), mcs(2, 10), mcs(4, 10), mcs(4, 11), mcs(4, 12), mcs(4, 13), mcs(4, 14),
    mcs(4, 15), mcs(4, 16), mcs(4, 17), mcs(4, 18), mcs(4, 19), mcs(6, 19), mcs(6, 20), mcs(6, 21),
    mcs(6, 22), mcs(6, 23), mcs(6, 24), mcs(6, 25), mcs(6, 26), reserved(0), reserved(0),
    reserved(0),
];

pub fn mcs_table(direction: Direction) -> &'static [McsEntry; MCS_INDEX_LEN] {
    match direction {
        Direction::Downlink => &PDSCH_MCS_TABLE,
        Direction::Uplink => &PUSCH_MCS_TABLE,
    }
}

/// TBS (bits) at 10 PRB for each TBS index, from 36.213 table 7.1.7.2.1-1.
/// Other RB counts scale linearly from this column.
const TBS_AT_10_PRB: [u32; 27] = [
    256, 328, 424, 520, 648, 776, 928, 1064, 1224, 1384, 1544, 1736, 2024, 2280, 2536, 2856, 3112,
    3240, 3624, 3880, 4136, 4584, 4968, 5352, 5736, 5992, 6712,
];

/// Transport block size in bits for a regular MCS index and RB count.
///
/// Panics when either argument is outside the table.
pub fn transport_block_size(direction: Direction, mcs_index: u8, num_rb: usize) -> u32 {
    assert!(
        (1..=MAX_TBS_NUM_RB).contains(&num_rb),
        "RB count {} outside TBS table [1, {}]",
        num_rb,
        MAX_TBS_NUM_RB
    );
    assert!(
        (mcs_index as usize) < REGULAR_MCS_INDEX_LEN,
        "MCS index {} outside regular range",
        mcs_index
    );
    let itbs = mcs_table(direction)[mcs_index as usize]
        .tbs_index
        .map(usize::from)
        .unwrap_or(0);
    let bits = TBS_AT_10_PRB[itbs] as u64 * num_rb as u64 / 10;
    ((bits / 8) * 8).max(16) as u32
}

/// Bytes the upper layer may drain for one transport block
pub fn dequeue_bytes(direction: Direction, mcs_index: u8, num_rb: usize) -> u32 {
    transport_block_size(direction, mcs_index, num_rb) / 8
}

/// Downlink resource-allocation type 0 RB-group size (36.213 table 7.1.6.1-1)
pub fn rbg_size(num_rb: usize) -> usize {
    match num_rb {
        0..=10 => 1,
        11..=26 => 2,
        27..=63 => 3,
        _ => 4,
    }
}

/// Coded-bit efficiency: information bits per modulation symbol
fn mcs_efficiency(direction: Direction, mcs_index: usize) -> f64 {
    let entry = mcs_table(direction)[mcs_index];
    let itbs = entry.tbs_index.map(usize::from).unwrap_or(0);
    // 10 PRB carry 120 data REs per PRB after control and reference overhead
    TBS_AT_10_PRB[itbs] as f64 / (10.0 * 120.0)
}

const BER_TABLE_MIN_DB: f64 = -10.0;
const BER_TABLE_MAX_DB: f64 = 40.0;
const BER_TABLE_STEP_DB: f64 = 0.25;
const BER_TABLE_POINTS: usize = ((BER_TABLE_MAX_DB - BER_TABLE_MIN_DB) / BER_TABLE_STEP_DB) as usize + 1;

/// Bit-error-rate curve of one MCS sampled on a fixed SINR grid
#[derive(Debug, Clone)]
pub struct BerCurve {
    samples: Vec<f64>,
}

impl BerCurve {
    /// Waterfall curve around a threshold SINR derived from the Shannon
    /// bound with a fixed implementation gap.
    fn for_efficiency(efficiency: f64) -> Self {
        let threshold_lin = 2f64.powf(efficiency / 0.75) - 1.0;
        let samples = (0..BER_TABLE_POINTS)
            .map(|i| {
                let sinr_lin = db_to_linear(BER_TABLE_MIN_DB + i as f64 * BER_TABLE_STEP_DB);
                (0.5 * erfc((9.1 * sinr_lin / threshold_lin).sqrt())).min(0.5)
            })
            .collect();
        Self { samples }
    }

    /// BER at `sinr_db`, linear interpolation, clamped to the grid edges
    pub fn ber(&self, sinr_db: f64) -> f64 {
        if sinr_db <= BER_TABLE_MIN_DB {
            return self.samples[0];
        }
        if sinr_db >= BER_TABLE_MAX_DB {
            return self.samples[BER_TABLE_POINTS - 1];
        }
        let pos = (sinr_db - BER_TABLE_MIN_DB) / BER_TABLE_STEP_DB;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(BER_TABLE_POINTS - 1);
        let frac = pos - lo as f64;
        self.samples[lo] * (1.0 - frac) + self.samples[hi] * frac
    }
}

/// BER curves for every regular MCS of one direction
#[derive(Debug, Clone)]
pub struct BerTable {
    curves: Vec<BerCurve>,
}

impl BerTable {
    pub fn new(direction: Direction) -> Self {
        let curves = (0..REGULAR_MCS_INDEX_LEN)
            .map(|i| BerCurve::for_efficiency(mcs_efficiency(direction, i)))
            .collect();
        Self { curves }
    }

    pub fn ber(&self, mcs_index: u8, sinr_db: f64) -> f64 {
        assert!(
            (mcs_index as usize) < REGULAR_MCS_INDEX_LEN,
            "MCS index {} outside BER table",
            mcs_index
        );
        self.curves[mcs_index as usize].ber(sinr_db)
    }
}

lazy_static::lazy_static! {
    pub static ref DL_BER_TABLE: BerTable = BerTable::new(Direction::Downlink);
    pub static ref UL_BER_TABLE: BerTable = BerTable::new(Direction::Uplink);
}

pub fn ber_table(direction: Direction) -> &'static BerTable {
    match direction {
        Direction::Downlink => &DL_BER_TABLE,
        Direction::Uplink => &UL_BER_TABLE,
    }
}
