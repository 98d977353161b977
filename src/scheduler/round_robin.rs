//! Round-robin allocation
//!
//! Downlink: the band is cut into RB groups (type 0 allocation) which are
//! dealt out one at a time to at most one station per group. Uplink: the
//! PUSCH region between the two PUCCH edges is split into contiguous,
//! near-equal runs. In both directions the next TTI starts with the station
//! after the last one served.

use tracing::trace;

use super::{Allocation, AllocationPolicy, RateFn};
use crate::registry::ConnectedStation;
use crate::tables::rbg_size;
use crate::types::{RbBitmap, SimTime, StationId};

type StationKey = (SimTime, StationId);

#[derive(Debug, Clone, Default)]
pub struct RoundRobinPolicy {
    last_served_dl: Option<StationKey>,
    last_served_ul: Option<StationKey>,
}

fn key(s: &ConnectedStation) -> StationKey {
    (s.connected_at, s.id)
}

/// Candidates rotated so the first one follows `last`
fn rotate<'a>(candidates: &[&'a ConnectedStation], last: Option<StationKey>) -> Vec<&'a ConnectedStation> {
    let start = last
        .and_then(|last| candidates.iter().position(|s| key(s) > last))
        .unwrap_or(0);
    candidates[start..]
        .iter()
        .chain(&candidates[..start])
        .copied()
        .collect()
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AllocationPolicy for RoundRobinPolicy {
    fn allocate_downlink(
        &mut self,
        candidates: &[&ConnectedStation],
        num_rb: usize,
        _rate: &RateFn<'_>,
    ) -> Vec<Allocation> {
        if candidates.is_empty() || num_rb == 0 {
            return Vec::new();
        }
        let order = rotate(candidates, self.last_served_dl);

        let group = rbg_size(num_rb);
        let num_groups = num_rb.div_ceil(group);
        let served = num_groups.min(order.len());

        let mut maps = vec![RbBitmap::empty(); served];
        for g in 0..num_groups {
            let start = g * group;
            let len = group.min(num_rb - start);
            for rb in start..start + len {
                maps[g % served].set(rb);
            }
        }

        self.last_served_dl = Some(key(order[served - 1]));
        trace!(num_rb, group, served, "downlink round robin");

        order
            .iter()
            .zip(maps)
            .map(|(s, rbs)| Allocation { station: s.id, rbs })
            .collect()
    }

    fn allocate_uplink(
        &mut self,
        candidates: &[&ConnectedStation],
        num_rb: usize,
        pucch_overhead: usize,
        _rate: &RateFn<'_>,
    ) -> Vec<Allocation> {
        let available = num_rb.saturating_sub(pucch_overhead);
        if candidates.is_empty() || available == 0 {
            return Vec::new();
        }
        let order = rotate(candidates, self.last_served_ul);
        let targets = order.len();

        let offset = pucch_overhead.div_ceil(2);
        let large = available.div_ceil(targets);
        let small = large - 1;
        let num_small = targets * large - available;
        let num_large = targets - num_small;
        let served = num_large + if small > 0 { num_small } else { 0 };

        let mut allocations = Vec::with_capacity(served);
        let mut start = offset;
        for (i, s) in order.iter().take(served).enumerate() {
            let len = if i < num_large { large } else { small };
            allocations.push(Allocation {
                station: s.id,
                rbs: RbBitmap::from_range(start, len),
            });
            start += len;
        }

        self.last_served_ul = Some(key(order[served - 1]));
        trace!(num_rb, available, offset, served, "uplink round robin");
        allocations
    }
}
