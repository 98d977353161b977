//! Proportional-fair allocation
//!
//! Resource is handed out greedily, one allocation unit at a time. Each step
//! gives the free unit with the highest metric
//!
//!   (bits with the unit - bits already granted) / projected average
//!
//! to its station. The projected average is the station's throughput
//! history filtered together with what it has been granted so far in this
//! TTI, so a station that just won a unit drops in priority. Downlink units
//! are RB groups and any free group may go to any station. Uplink units are
//! single RBs of the PUSCH region and a station only grows its run at either
//! end, which keeps every uplink grant contiguous. Allocation stops when no
//! free unit adds a bit.
//!
//! The history is a layer-3 filtered throughput in bits per TTI, updated
//! for every connected station after each TTI, with 0 for stations that got
//! nothing.

use std::collections::HashMap;

use tracing::trace;

use super::{Allocation, AllocationPolicy, RateFn, SchedulingResult};
use crate::filter::ExponentialMean;
use crate::registry::{ConnectedStation, StationRegistry};
use crate::tables::rbg_size;
use crate::types::{Direction, RbBitmap, StationId};

/// Throughput history a newly seen station starts from, and the floor of
/// every projected average, bits per TTI
pub const MIN_AVERAGE_BITS: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct ProportionalFairPolicy {
    coefficient: f64,
    history_dl: HashMap<StationId, ExponentialMean>,
    history_ul: HashMap<StationId, ExponentialMean>,
}

/// What one candidate holds so far in the TTI being built
#[derive(Debug, Clone, Copy, Default)]
struct Holding {
    rbs: RbBitmap,
    bits: u32,
    /// First and last unit index of an uplink run
    run: Option<(usize, usize)>,
}

impl Holding {
    fn accepts(&self, unit: usize, contiguous: bool) -> bool {
        match (contiguous, self.run) {
            (true, Some((lo, hi))) => unit + 1 == lo || unit == hi + 1,
            _ => true,
        }
    }

    fn grow(&mut self, unit: usize) {
        self.run = Some(match self.run {
            None => (unit, unit),
            Some((lo, hi)) => (lo.min(unit), hi.max(unit)),
        });
    }
}

fn union(a: &RbBitmap, b: &RbBitmap) -> RbBitmap {
    RbBitmap::from_bits(a.bits() | b.bits())
}

impl ProportionalFairPolicy {
    /// `coefficient` is the layer-3 filter coefficient of the throughput
    /// history.
    pub fn new(coefficient: f64) -> Self {
        Self {
            coefficient,
            history_dl: HashMap::new(),
            history_ul: HashMap::new(),
        }
    }

    fn seeded(coefficient: f64) -> ExponentialMean {
        let mut mean = ExponentialMean::new(coefficient);
        mean.update(MIN_AVERAGE_BITS);
        mean
    }

    fn history(&self, direction: Direction) -> &HashMap<StationId, ExponentialMean> {
        match direction {
            Direction::Downlink => &self.history_dl,
            Direction::Uplink => &self.history_ul,
        }
    }

    /// Filtered throughput of `station`, bits per TTI
    pub fn average_bits(&self, direction: Direction, station: StationId) -> Option<f64> {
        self.history(direction).get(&station).and_then(|m| m.value())
    }

    fn allocate(
        &self,
        direction: Direction,
        candidates: &[&ConnectedStation],
        units: &[RbBitmap],
        contiguous: bool,
        rate: &RateFn<'_>,
    ) -> Vec<Allocation> {
        let history: Vec<ExponentialMean> = candidates
            .iter()
            .map(|s| {
                self.history(direction)
                    .get(&s.id)
                    .copied()
                    .unwrap_or_else(|| Self::seeded(self.coefficient))
            })
            .collect();
        let mut holdings = vec![Holding::default(); candidates.len()];
        let mut free = vec![true; units.len()];
        let mut metric = vec![vec![0.0; units.len()]; candidates.len()];

        let refresh = |i: usize, holding: &Holding, free: &[bool], row: &mut Vec<f64>| {
            let mut projected = history[i];
            let average = projected.update(holding.bits as f64).max(MIN_AVERAGE_BITS);
            for (u, unit) in units.iter().enumerate() {
                row[u] = if free[u] && holding.accepts(u, contiguous) {
                    let bits_if = rate(candidates[i], &union(&holding.rbs, unit));
                    bits_if.saturating_sub(holding.bits) as f64 / average
                } else {
                    0.0
                };
            }
        };

        for i in 0..candidates.len() {
            refresh(i, &holdings[i], &free, &mut metric[i]);
        }

        loop {
            let mut best: Option<(usize, usize, f64)> = None;
            for (i, row) in metric.iter().enumerate() {
                for (u, &m) in row.iter().enumerate() {
                    if free[u] && m > best.map_or(0.0, |(_, _, b)| b) {
                        best = Some((i, u, m));
                    }
                }
            }
            let Some((i, u, m)) = best else {
                break;
            };

            free[u] = false;
            let holding = &mut holdings[i];
            holding.rbs = union(&holding.rbs, &units[u]);
            holding.bits = rate(candidates[i], &holding.rbs);
            holding.grow(u);
            trace!(?direction, station = %candidates[i].id, unit = u, metric = m, bits = holding.bits, "pf unit");

            let holding = holdings[i];
            refresh(i, &holding, &free, &mut metric[i]);
        }

        candidates
            .iter()
            .zip(holdings)
            .filter(|(_, h)| !h.rbs.is_empty())
            .map(|(s, h)| Allocation { station: s.id, rbs: h.rbs })
            .collect()
    }
}

impl AllocationPolicy for ProportionalFairPolicy {
    fn allocate_downlink(
        &mut self,
        candidates: &[&ConnectedStation],
        num_rb: usize,
        rate: &RateFn<'_>,
    ) -> Vec<Allocation> {
        if candidates.is_empty() || num_rb == 0 {
            return Vec::new();
        }
        let group = rbg_size(num_rb);
        let units: Vec<RbBitmap> = (0..num_rb)
            .step_by(group)
            .map(|start| RbBitmap::from_range(start, group.min(num_rb - start)))
            .collect();
        self.allocate(Direction::Downlink, candidates, &units, false, rate)
    }

    fn allocate_uplink(
        &mut self,
        candidates: &[&ConnectedStation],
        num_rb: usize,
        pucch_overhead: usize,
        rate: &RateFn<'_>,
    ) -> Vec<Allocation> {
        let available = num_rb.saturating_sub(pucch_overhead);
        if candidates.is_empty() || available == 0 {
            return Vec::new();
        }
        let offset = pucch_overhead.div_ceil(2);
        let units: Vec<RbBitmap> = (offset..offset + available)
            .map(|rb| RbBitmap::from_range(rb, 1))
            .collect();
        self.allocate(Direction::Uplink, candidates, &units, true, rate)
    }

    fn record(&mut self, direction: Direction, stations: &StationRegistry, result: &SchedulingResult) {
        let coefficient = self.coefficient;
        let history = match direction {
            Direction::Downlink => &mut self.history_dl,
            Direction::Uplink => &mut self.history_ul,
        };
        history.retain(|id, _| stations.contains(*id));
        for station in stations.iter() {
            let bits: u64 = result
                .iter()
                .filter(|e| e.station == station.id)
                .map(|e| e.total_bytes() * 8)
                .sum();
            history
                .entry(station.id)
                .or_insert_with(|| Self::seeded(coefficient))
                .update(bits as f64);
        }
    }
}
