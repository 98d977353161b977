//! Per-RB interference accumulation
//!
//! The raw table follows signal arrivals and departures exactly. The
//! filtered table is only touched by [`InterferenceTable::snapshot_filter`],
//! which the owning element calls from its half-TTI timer.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::filter::ExponentialMean;
use crate::types::RbBitmap;
use crate::utils::{db_to_linear, linear_to_db};

/// Which interference view an estimate should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterferenceSource {
    Raw,
    Filtered,
}

/// Floor used when filtering in dB so an idle RB does not become -inf
const DB_FILTER_FLOOR_MW: f64 = 1e-30;

#[derive(Debug, Clone)]
pub struct InterferenceTable {
    raw_mw: Vec<f64>,
    filters: Vec<ExponentialMean>,
    filter_in_db: bool,
}

impl InterferenceTable {
    pub fn new(num_rb: usize, filter_coefficient: f64, filter_in_db: bool) -> Self {
        Self {
            raw_mw: vec![0.0; num_rb],
            filters: vec![ExponentialMean::new(filter_coefficient); num_rb],
            filter_in_db,
        }
    }

    pub fn num_rb(&self) -> usize {
        self.raw_mw.len()
    }

    /// Add an interferer's received power on every RB it uses
    pub fn add(&mut self, rbs: &RbBitmap, power_mw: f64) {
        let num_rb = self.raw_mw.len();
        for rb in rbs.iter().filter(|&rb| rb < num_rb) {
            self.raw_mw[rb] += power_mw;
        }
        trace!(rbs = ?rbs, power_mw, "interference added");
    }

    /// Remove a departed interferer; entries are clamped at zero
    pub fn subtract(&mut self, rbs: &RbBitmap, power_mw: f64) {
        let num_rb = self.raw_mw.len();
        for rb in rbs.iter().filter(|&rb| rb < num_rb) {
            self.raw_mw[rb] = (self.raw_mw[rb] - power_mw).max(0.0);
        }
        trace!(rbs = ?rbs, power_mw, "interference removed");
    }

    /// Feed the current raw table into the per-RB filters
    pub fn snapshot_filter(&mut self) {
        for (filter, &raw) in self.filters.iter_mut().zip(&self.raw_mw) {
            if self.filter_in_db {
                filter.update(linear_to_db(raw.max(DB_FILTER_FLOOR_MW)));
            } else {
                filter.update(raw);
            }
        }
    }

    pub fn raw(&self, rb: usize) -> f64 {
        self.raw_mw[rb]
    }

    /// Filtered interference in mW; falls back to the raw value until the
    /// first snapshot
    pub fn filtered(&self, rb: usize) -> f64 {
        match self.filters[rb].value() {
            None => self.raw_mw[rb],
            Some(v) if self.filter_in_db => {
                let mw = db_to_linear(v);
                if mw <= DB_FILTER_FLOOR_MW * 1.000_001 {
                    0.0
                } else {
                    mw
                }
            }
            Some(v) => v,
        }
    }

    pub fn get(&self, rb: usize, source: InterferenceSource) -> f64 {
        match source {
            InterferenceSource::Raw => self.raw(rb),
            InterferenceSource::Filtered => self.filtered(rb),
        }
    }

    pub fn reset(&mut self) {
        self.raw_mw.iter_mut().for_each(|v| *v = 0.0);
        self.filters.iter_mut().for_each(ExponentialMean::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_add_then_subtract_cancels() {
        let mut table = InterferenceTable::new(25, 4.0, false);
        let rbs = RbBitmap::from_range(3, 5);
        table.add(&rbs, 1e-9);
        assert_eq!(table.raw(3), 1e-9);
        assert_eq!(table.raw(8), 0.0);
        table.subtract(&rbs, 1e-9);
        assert!((0..25).all(|rb| table.raw(rb) == 0.0));
    }

    #[test]
    fn test_subtract_clamps_at_zero() {
        let mut table = InterferenceTable::new(6, 4.0, false);
        table.subtract(&RbBitmap::from_range(0, 6), 1.0);
        assert!((0..6).all(|rb| table.raw(rb) == 0.0));
    }

    #[test]
    fn test_interleaved_signals_net_to_zero() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut table = InterferenceTable::new(50, 4.0, false);
        let signals: Vec<(RbBitmap, f64)> = (0..40)
            .map(|_| {
                let start = rng.gen_range(0..40);
                let len = rng.gen_range(1..10);
                (RbBitmap::from_range(start, len), rng.gen_range(1e-12..1e-6))
            })
            .collect();

        for (rbs, p) in &signals {
            table.add(rbs, *p);
        }
        for (rbs, p) in signals.iter().rev() {
            table.subtract(rbs, *p);
        }
        for rb in 0..50 {
            assert!(table.raw(rb).abs() < 1e-18, "RB {} left with {}", rb, table.raw(rb));
        }
    }

    #[test]
    fn test_filtered_tracks_raw_with_lag() {
        let mut table = InterferenceTable::new(2, 4.0, false);
        let rbs = RbBitmap::from_range(0, 1);
        table.snapshot_filter();
        table.add(&rbs, 8.0);
        table.snapshot_filter();
        // alpha = 0.5 for k = 4
        assert!((table.filtered(0) - 4.0).abs() < 1e-12);
        assert_eq!(table.get(0, InterferenceSource::Raw), 8.0);
        assert_eq!(table.filtered(1), 0.0);
    }

    #[test]
    fn test_filter_in_db_domain() {
        let mut table = InterferenceTable::new(1, 4.0, true);
        let rbs = RbBitmap::from_range(0, 1);
        table.add(&rbs, 1.0);
        table.snapshot_filter();
        table.subtract(&rbs, 1.0);
        table.add(&rbs, 100.0);
        table.snapshot_filter();
        // mean of 0 dB and 20 dB is 10 dB
        assert!((table.filtered(0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_filtered_before_first_snapshot_is_raw() {
        let mut table = InterferenceTable::new(1, 40.0, false);
        table.add(&RbBitmap::from_range(0, 1), 3.0);
        assert_eq!(table.filtered(0), 3.0);
    }
}
