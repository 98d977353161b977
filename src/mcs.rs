//! MCS selection
//!
//! Descending search over the regular MCS indices: the first index whose
//! predicted block error rate meets the target wins.
//!
//!   BLER = 1 - (1 - BER(sinr - offset))^TBS

use tracing::trace;

use crate::tables::{ber_table, transport_block_size, MAX_TBS_NUM_RB, REGULAR_MCS_INDEX_LEN};
use crate::types::Direction;

/// SINR back-off applied before the downlink BER lookup, dB
pub const DL_SNR_OFFSET_DB: f64 = 1.0;
/// Uplink back-off, larger to cover the coarser uplink estimate
pub const UL_SNR_OFFSET_DB: f64 = 2.0;

pub const HIGHEST_REGULAR_MCS: u8 = (REGULAR_MCS_INDEX_LEN - 1) as u8;

/// BLER of one transport block sent with `mcs` over `num_rb` RBs at `sinr_db`
pub fn block_error_rate(direction: Direction, mcs: u8, sinr_db: f64, num_rb: usize) -> f64 {
    let ber = ber_table(direction).ber(mcs, sinr_db);
    let tbs = transport_block_size(direction, mcs, num_rb) as f64;
    // 1 - (1 - ber)^tbs without cancellation for tiny BER
    -(tbs * (-ber).ln_1p()).exp_m1()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McsSelection {
    /// Highest index meeting the target
    Meets(u8),
    /// No index met the target
    Exhausted,
}

impl McsSelection {
    /// Index to signal; the lowest index when the search was exhausted
    pub fn index(self) -> u8 {
        match self {
            McsSelection::Meets(i) => i,
            McsSelection::Exhausted => 0,
        }
    }

    pub fn meets_target(self) -> bool {
        matches!(self, McsSelection::Meets(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct McsSelector {
    direction: Direction,
    target_bler: f64,
    snr_offset_db: f64,
}

impl McsSelector {
    pub fn new(direction: Direction, target_bler: f64) -> Self {
        let snr_offset_db = match direction {
            Direction::Downlink => DL_SNR_OFFSET_DB,
            Direction::Uplink => UL_SNR_OFFSET_DB,
        };
        Self::with_offset(direction, target_bler, snr_offset_db)
    }

    pub fn with_offset(direction: Direction, target_bler: f64, snr_offset_db: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&target_bler),
            "target BLER {} outside [0, 1]",
            target_bler
        );
        Self {
            direction,
            target_bler,
            snr_offset_db,
        }
    }

    pub fn target_bler(&self) -> f64 {
        self.target_bler
    }

    /// Predicted BLER of one MCS at `sinr_db` after the selection back-off
    pub fn block_error_rate(&self, mcs: u8, sinr_db: f64, num_rb: usize) -> f64 {
        block_error_rate(self.direction, mcs, sinr_db - self.snr_offset_db, num_rb)
    }

    pub fn select(&self, sinr_db: f64, num_rb: usize) -> McsSelection {
        assert!(
            (1..=MAX_TBS_NUM_RB).contains(&num_rb),
            "RB count {} outside [1, {}]",
            num_rb,
            MAX_TBS_NUM_RB
        );

        for mcs in (0..=HIGHEST_REGULAR_MCS).rev() {
            let bler = self.block_error_rate(mcs, sinr_db, num_rb);
            if bler <= self.target_bler {
                trace!(direction = ?self.direction, sinr_db, num_rb, mcs, bler, "MCS selected");
                return McsSelection::Meets(mcs);
            }
        }
        trace!(direction = ?self.direction, sinr_db, num_rb, "no MCS meets target BLER");
        McsSelection::Exhausted
    }
}
