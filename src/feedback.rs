//! CQI/RI feedback
//!
//! [`ReportTracker`] holds the validity state machine for one link. The
//! terminal keeps one next to its [`FeedbackGenerator`]; the base station
//! keeps one per connected station and drives it with the delivered reports.
//!
//! ```text
//!   Init --CQI--> NoRi --RI--> NoCqi --CQI--> Stationary --RI--> Pending
//!    |              ^CQI         ^RI             ^    ^CQI          |
//!    +-----RI-------------------->+              |    +-------------+
//!                                                +--------CQI-------+
//! ```
//!
//! A report is valid only in `Pending` and `Stationary`. The pair exposed
//! is the one committed on the last entry into `Stationary`, so while
//! `Pending` the previous consistent pair stays in use.

use tracing::debug;

use crate::sinr::SinrVector;
use crate::tables::{cqi_efficiency, quantize_cqi, CQI_INDEX_LEN};
use crate::types::TxScheme;
use crate::utils::linear_to_db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportState {
    Init,
    /// CQI seen, rank still missing
    NoRi,
    /// Rank seen, CQI for it still missing
    NoCqi,
    /// Rank changed since the last consistent pair
    Pending,
    Stationary,
}

/// A consistent CQI/RI pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CqiReport {
    pub cqi0: u8,
    /// Second codeword, present for rank 2
    pub cqi1: Option<u8>,
    pub rank: u8,
}

/// One feedback event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackUpdate {
    Ri(u8),
    Cqi { cqi0: u8, cqi1: Option<u8> },
}

#[derive(Debug, Clone)]
pub struct ReportTracker {
    state: ReportState,
    latest_cqi: Option<(u8, Option<u8>)>,
    latest_rank: Option<u8>,
    committed: Option<CqiReport>,
}

impl Default for ReportTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportTracker {
    pub fn new() -> Self {
        Self {
            state: ReportState::Init,
            latest_cqi: None,
            latest_rank: None,
            committed: None,
        }
    }

    pub fn state(&self) -> ReportState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.state, ReportState::Pending | ReportState::Stationary)
    }

    /// The valid pair, None unless the state is Pending or Stationary
    pub fn report(&self) -> Option<CqiReport> {
        if self.is_valid() {
            self.committed
        } else {
            None
        }
    }

    pub fn latest_rank(&self) -> Option<u8> {
        self.latest_rank
    }

    pub fn apply(&mut self, update: FeedbackUpdate) {
        match update {
            FeedbackUpdate::Ri(rank) => self.on_ri(rank),
            FeedbackUpdate::Cqi { cqi0, cqi1 } => self.on_cqi(cqi0, cqi1),
        }
    }

    pub fn on_cqi(&mut self, cqi0: u8, cqi1: Option<u8>) {
        assert!((cqi0 as usize) < CQI_INDEX_LEN, "CQI {} out of range", cqi0);
        self.latest_cqi = Some((cqi0, cqi1));
        self.state = match self.state {
            ReportState::Init | ReportState::NoRi => ReportState::NoRi,
            ReportState::NoCqi | ReportState::Pending | ReportState::Stationary => {
                self.commit();
                ReportState::Stationary
            }
        };
    }

    pub fn on_ri(&mut self, rank: u8) {
        self.latest_rank = Some(rank);
        self.state = match self.state {
            // CQI computed before the rank was known no longer applies
            ReportState::Init | ReportState::NoRi | ReportState::NoCqi => {
                self.latest_cqi = None;
                ReportState::NoCqi
            }
            ReportState::Stationary | ReportState::Pending => ReportState::Pending,
        };
    }

    fn commit(&mut self) {
        if let (Some((cqi0, cqi1)), Some(rank)) = (self.latest_cqi, self.latest_rank) {
            self.committed = Some(CqiReport {
                cqi0,
                cqi1: if rank >= 2 { cqi1 } else { None },
                rank,
            });
        }
    }
}

/// Rank candidates for a given antenna configuration, lowest rank first
pub fn rank_candidates(num_tx_antennas: usize, num_rx_antennas: usize) -> Vec<(u8, TxScheme)> {
    match num_tx_antennas {
        1 => vec![(1, TxScheme::SingleAntenna)],
        _ if num_rx_antennas >= 2 => vec![
            (1, TxScheme::Diversity),
            (2, TxScheme::OpenLoopSpatialMultiplexing),
        ],
        _ => vec![(1, TxScheme::Diversity)],
    }
}

/// Terminal-side CQI/RI computation on the reporting schedule
#[derive(Debug, Clone)]
pub struct FeedbackGenerator {
    cqi_interval: u64,
    cqi_offset: u64,
    ri_interval: u64,
    ri_offset: u64,
    num_tx_antennas: usize,
    num_rx_antennas: usize,
    cqi_snr_table: [f64; CQI_INDEX_LEN],
    tracker: ReportTracker,
}

impl FeedbackGenerator {
    pub fn new(
        cqi_interval: u64,
        cqi_offset: u64,
        ri_interval: u64,
        ri_offset: u64,
        num_tx_antennas: usize,
        num_rx_antennas: usize,
        cqi_snr_table: [f64; CQI_INDEX_LEN],
    ) -> Self {
        assert!(cqi_interval > 0 && ri_interval > 0, "reporting interval must be > 0");
        Self {
            cqi_interval,
            cqi_offset,
            ri_interval,
            ri_offset,
            num_tx_antennas,
            num_rx_antennas,
            cqi_snr_table,
            tracker: ReportTracker::new(),
        }
    }

    pub fn tracker(&self) -> &ReportTracker {
        &self.tracker
    }

    /// Latest valid pair
    pub fn report(&self) -> Option<CqiReport> {
        self.tracker.report()
    }

    pub fn is_ri_tti(&self, tti: u64) -> bool {
        tti % self.ri_interval == self.ri_offset
    }

    pub fn is_cqi_tti(&self, tti: u64) -> bool {
        tti % self.cqi_interval == self.cqi_offset
    }

    fn quantize(&self, sinr: &SinrVector) -> Vec<u8> {
        sinr.iter()
            .map(|&s| quantize_cqi(&self.cqi_snr_table, linear_to_db(s)))
            .collect()
    }

    /// Rank maximising the summed CQI efficiency; ties keep the lower rank
    pub fn select_rank<F>(&self, mut estimate: F) -> u8
    where
        F: FnMut(TxScheme) -> SinrVector,
    {
        let mut best: Option<(u8, f64)> = None;
        for (rank, scheme) in rank_candidates(self.num_tx_antennas, self.num_rx_antennas) {
            let efficiency: f64 = self
                .quantize(&estimate(scheme))
                .into_iter()
                .map(cqi_efficiency)
                .sum();
            if best.map_or(true, |(_, e)| efficiency > e) {
                best = Some((rank, efficiency));
            }
        }
        best.map(|(r, _)| r).unwrap_or(1)
    }

    /// Run the reporting schedule for one TTI.
    ///
    /// `estimate` returns the wideband SINR vector for a transmission scheme.
    /// RI wins when both are due; CQI is then skipped for this TTI.
    pub fn on_tti<F>(&mut self, tti: u64, mut estimate: F) -> Option<FeedbackUpdate>
    where
        F: FnMut(TxScheme) -> SinrVector,
    {
        let update = if self.is_ri_tti(tti) {
            FeedbackUpdate::Ri(self.select_rank(&mut estimate))
        } else if self.is_cqi_tti(tti) {
            let rank = self.tracker.latest_rank().unwrap_or(1);
            let scheme = TxScheme::from_rank(rank, self.num_tx_antennas);
            let cqis = self.quantize(&estimate(scheme));
            FeedbackUpdate::Cqi {
                cqi0: cqis.first().copied().unwrap_or(0),
                cqi1: cqis.get(1).copied(),
            }
        } else {
            return None;
        };

        debug!(tti, ?update, "feedback computed");
        self.tracker.apply(update);
        Some(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::DEFAULT_CQI_SNR_TABLE;
    use crate::utils::db_to_linear;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_listed_transitions() {
        let mut t = ReportTracker::new();
        t.on_cqi(5, None);
        assert_eq!(t.state(), ReportState::NoRi);
        t.on_cqi(6, None);
        assert_eq!(t.state(), ReportState::NoRi);

        let mut t = ReportTracker::new();
        t.on_ri(1);
        assert_eq!(t.state(), ReportState::NoCqi);
        t.on_ri(2);
        assert_eq!(t.state(), ReportState::NoCqi);
        t.on_cqi(7, Some(4));
        assert_eq!(t.state(), ReportState::Stationary);
        assert_eq!(t.report(), Some(CqiReport { cqi0: 7, cqi1: Some(4), rank: 2 }));

        t.on_ri(1);
        assert_eq!(t.state(), ReportState::Pending);
        t.on_cqi(9, None);
        assert_eq!(t.state(), ReportState::Stationary);
        assert_eq!(t.report(), Some(CqiReport { cqi0: 9, cqi1: None, rank: 1 }));
    }

    #[test]
    fn test_pending_keeps_previous_pair() {
        let mut t = ReportTracker::new();
        t.on_ri(1);
        t.on_cqi(8, None);
        t.on_ri(2);
        assert_eq!(t.state(), ReportState::Pending);
        assert_eq!(t.report(), Some(CqiReport { cqi0: 8, cqi1: None, rank: 1 }));
        t.on_ri(1);
        assert_eq!(t.state(), ReportState::Pending);
    }

    #[test]
    fn test_cqi_before_rank_is_discarded() {
        let mut t = ReportTracker::new();
        t.on_cqi(12, None);
        t.on_ri(1);
        assert_eq!(t.state(), ReportState::NoCqi);
        assert!(t.report().is_none());
    }

    #[test]
    fn test_validity_matches_state_on_random_sequences() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..200 {
            let mut t = ReportTracker::new();
            let (mut seen_ri, mut seen_cqi) = (false, false);
            for _ in 0..rng.gen_range(0..20) {
                if rng.gen_bool(0.5) {
                    t.on_ri(rng.gen_range(1..=2));
                    seen_ri = true;
                } else {
                    t.on_cqi(rng.gen_range(0..16), None);
                    seen_cqi = true;
                }
                let valid_state =
                    matches!(t.state(), ReportState::Pending | ReportState::Stationary);
                assert_eq!(t.is_valid(), valid_state);
                assert_eq!(t.report().is_some(), valid_state);
                if t.is_valid() {
                    assert!(seen_ri && seen_cqi);
                }
            }
        }
    }

    fn generator(tx: usize, rx: usize) -> FeedbackGenerator {
        FeedbackGenerator::new(10, 0, 10, 0, tx, rx, DEFAULT_CQI_SNR_TABLE)
    }

    #[test]
    fn test_ri_wins_collision_and_skips_cqi() {
        let mut g = generator(1, 1);
        let mut calls = 0;
        let u = g.on_tti(0, |_| {
            calls += 1;
            vec![db_to_linear(10.0)]
        });
        assert_eq!(u, Some(FeedbackUpdate::Ri(1)));
        assert_eq!(calls, 1);
        assert_eq!(g.on_tti(5, |_| vec![1.0]), None);
    }

    #[test]
    fn test_schedule_reaches_valid_report() {
        let mut g = FeedbackGenerator::new(5, 0, 10, 1, 1, 2, DEFAULT_CQI_SNR_TABLE);
        let sinr = db_to_linear(9.0);
        let mut updates = Vec::new();
        for tti in 0..12 {
            if let Some(u) = g.on_tti(tti, |_| vec![sinr]) {
                updates.push((tti, u));
            }
        }
        assert_eq!(
            updates,
            vec![
                (0, FeedbackUpdate::Cqi { cqi0: 9, cqi1: None }),
                (1, FeedbackUpdate::Ri(1)),
                (5, FeedbackUpdate::Cqi { cqi0: 9, cqi1: None }),
                (10, FeedbackUpdate::Cqi { cqi0: 9, cqi1: None }),
                (11, FeedbackUpdate::Ri(1)),
            ]
        );
        assert_eq!(g.tracker().state(), ReportState::Pending);
        assert_eq!(g.report().map(|r| r.cqi0), Some(9));
    }

    #[test]
    fn test_rank_selection_prefers_two_layers_when_better() {
        let g = generator(2, 2);
        let rank = g.select_rank(|scheme| match scheme {
            TxScheme::OpenLoopSpatialMultiplexing => vec![db_to_linear(12.0), db_to_linear(12.0)],
            _ => vec![db_to_linear(16.0)],
        });
        assert_eq!(rank, 2);
    }

    #[test]
    fn test_rank_selection_tie_goes_to_rank_one() {
        let g = generator(2, 2);
        // CQI 0 on both layers sums to zero, same as rank one at CQI 0
        let rank = g.select_rank(|scheme| match scheme {
            TxScheme::OpenLoopSpatialMultiplexing => vec![1e-3, 1e-3],
            _ => vec![1e-3],
        });
        assert_eq!(rank, 1);
    }

    #[test]
    fn test_rank_candidates() {
        assert_eq!(rank_candidates(1, 2), vec![(1, TxScheme::SingleAntenna)]);
        assert_eq!(rank_candidates(2, 1), vec![(1, TxScheme::Diversity)]);
        assert_eq!(rank_candidates(2, 2).len(), 2);
    }
}
