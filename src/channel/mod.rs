//! Channel model
//!
//! Builds the receive x transmit complex gain matrix of a link at a given
//! instant. Nothing is cached per link: the matrix is recomputed from the
//! global seed, the link identity and the simulation time.

pub mod fading;
pub mod matrix;

use num_complex::Complex64;

use crate::config::FadingConfig;
use crate::types::{SimTime, StationId};
use crate::utils::db_to_linear;

pub use fading::{fading_offset, FadingTable};
pub use matrix::ChannelMatrix;

/// One end of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEnd {
    pub station: StationId,
    pub num_antennas: usize,
}

impl LinkEnd {
    pub const fn new(station: StationId, num_antennas: usize) -> Self {
        Self {
            station,
            num_antennas,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelModel {
    global_seed: u64,
    channel_index: u32,
    fading: Option<FadingTable>,
}

impl ChannelModel {
    pub fn new(global_seed: u64, channel_index: u32, fading: Option<&FadingConfig>) -> Self {
        Self {
            global_seed,
            channel_index,
            fading: fading.map(|cfg| FadingTable::generate(cfg, global_seed)),
        }
    }

    /// Model without fading: every antenna pair has unit gain
    pub fn flat() -> Self {
        Self::new(0, 0, None)
    }

    /// Fading coefficient between one transmit and one receive antenna
    pub fn gain(
        &self,
        tx: StationId,
        tx_antenna: usize,
        rx: StationId,
        rx_antenna: usize,
        time: SimTime,
    ) -> Complex64 {
        match &self.fading {
            None => Complex64::new(1.0, 0.0),
            Some(table) => {
                let offset = fading_offset(
                    self.global_seed,
                    tx,
                    rx,
                    tx_antenna,
                    rx_antenna,
                    self.channel_index,
                    table.len(),
                );
                table.sample(offset, time)
            }
        }
    }

    /// Fading-only matrix, rows are receive antennas
    pub fn fading_matrix(&self, tx: LinkEnd, rx: LinkEnd, time: SimTime) -> ChannelMatrix {
        let mut data = Vec::with_capacity(rx.num_antennas * tx.num_antennas);
        for r in 0..rx.num_antennas {
            for t in 0..tx.num_antennas {
                data.push(self.gain(tx.station, t, rx.station, r, time));
            }
        }
        ChannelMatrix::from_vec(rx.num_antennas, tx.num_antennas, data)
    }

    /// Fading matrix with pathloss folded into every entry
    pub fn matrix(
        &self,
        tx: LinkEnd,
        rx: LinkEnd,
        time: SimTime,
        pathloss_db: f64,
    ) -> ChannelMatrix {
        apply_pathloss(&self.fading_matrix(tx, rx, time), pathloss_db)
    }
}

/// Scale every entry by sqrt(1 / linear(pathloss))
pub fn apply_pathloss(matrix: &ChannelMatrix, pathloss_db: f64) -> ChannelMatrix {
    matrix.scale((1.0 / db_to_linear(pathloss_db)).sqrt())
}
