//! Resource-block scheduling
//!
//! One [`Scheduler`] interface, two roles. [`EnbScheduler`] serves every
//! eligible station in both directions. [`UeScheduler`] only forwards the
//! terminal's own uplink grant; asking it for downlink scheduling is a
//! programming error and panics.
//!
//! Which station gets which RBs is decided by an [`AllocationPolicy`]
//! (round robin or proportional fair); the scheduler turns allocations into
//! entries (scheme, MCS, dequeue size), checks that no RB is handed out twice
//! and drops entries that carry no payload.

mod enb;
mod pf;
mod round_robin;
mod ue;

pub use enb::EnbScheduler;
pub use pf::ProportionalFairPolicy;
pub use round_robin::RoundRobinPolicy;
pub use ue::{UeScheduler, UplinkGrant};

use serde::Serialize;

use crate::config::{RrmConfig, SchedulerPolicy};
use crate::interference::InterferenceTable;
use crate::registry::{ConnectedStation, StationRegistry};
use crate::types::{Direction, RbBitmap, StationId, TxScheme};

/// How much of which bearer's queue a transport block may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DequeueInfo {
    pub bearer_id: u8,
    pub size_bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransportBlockGrant {
    pub mcs: u8,
    pub dequeue: DequeueInfo,
    /// SINR the MCS was chosen for
    pub sinr_db: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulingEntry {
    pub station: StationId,
    pub allocated_rbs: RbBitmap,
    pub tx_scheme: TxScheme,
    pub transport_blocks: Vec<TransportBlockGrant>,
}

impl SchedulingEntry {
    /// True when no transport block carries any byte
    pub fn is_empty(&self) -> bool {
        self.transport_blocks
            .iter()
            .all(|tb| tb.dequeue.size_bytes == 0)
    }

    pub fn total_bytes(&self) -> u64 {
        self.transport_blocks
            .iter()
            .map(|tb| tb.dequeue.size_bytes as u64)
            .sum()
    }
}

/// Entries for one TTI and direction
pub type SchedulingResult = Vec<SchedulingEntry>;

/// What a scheduler may look at when building one TTI
#[derive(Debug, Clone, Copy)]
pub struct SchedulingInput<'a> {
    pub tti: u64,
    pub stations: &'a StationRegistry,
    pub interference: &'a InterferenceTable,
}

pub trait Scheduler: Send {
    fn schedule_downlink(&mut self, input: &SchedulingInput<'_>) -> SchedulingResult;

    fn schedule_uplink(&mut self, input: &SchedulingInput<'_>) -> SchedulingResult;

    /// Remove entries without payload
    fn purge_invalid(&self, direction: Direction, result: &mut SchedulingResult);
}

/// RBs granted to one station by a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub station: StationId,
    pub rbs: RbBitmap,
}

/// Bits a station would carry on the given RBs, 0 when no MCS meets the
/// target BLER there
pub type RateFn<'a> = dyn Fn(&ConnectedStation, &RbBitmap) -> u32 + 'a;

/// Splits the RB pool among eligible stations. Candidates arrive ordered
/// by connection time.
pub trait AllocationPolicy: Send {
    fn allocate_downlink(
        &mut self,
        candidates: &[&ConnectedStation],
        num_rb: usize,
        rate: &RateFn<'_>,
    ) -> Vec<Allocation>;

    fn allocate_uplink(
        &mut self,
        candidates: &[&ConnectedStation],
        num_rb: usize,
        pucch_overhead: usize,
        rate: &RateFn<'_>,
    ) -> Vec<Allocation>;

    /// Sees the final result of every TTI, empty ones included
    fn record(&mut self, _direction: Direction, _stations: &StationRegistry, _result: &SchedulingResult) {}
}

/// Policy named by the configuration
pub fn allocation_policy(config: &RrmConfig) -> Box<dyn AllocationPolicy> {
    match config.scheduler {
        SchedulerPolicy::RoundRobin => Box::new(RoundRobinPolicy::new()),
        SchedulerPolicy::ProportionalFair => {
            Box::new(ProportionalFairPolicy::new(config.pf_filter_coefficient))
        }
    }
}

/// Owner of each RB. Panics if two entries claim the same RB.
pub fn rb_owner_map(result: &[SchedulingEntry], num_rb: usize) -> Vec<Option<StationId>> {
    let mut owners = vec![None; num_rb];
    for entry in result {
        for rb in entry.allocated_rbs.iter() {
            assert!(rb < num_rb, "RB {} beyond pool of {}", rb, num_rb);
            assert!(
                owners[rb].is_none(),
                "Resource block allocation is overlapped: RB {} given to {} and {}",
                rb,
                owners[rb].map(|s: StationId| s.to_string()).unwrap_or_default(),
                entry.station
            );
            owners[rb] = Some(entry.station);
        }
    }
    owners
}

/// Drop entries whose transport blocks are all empty
pub fn purge_empty(result: &mut SchedulingResult) {
    result.retain(|e| !e.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_BEARER_ID;

    fn entry(node: u32, rbs: RbBitmap, sizes: &[u32]) -> SchedulingEntry {
        SchedulingEntry {
            station: StationId::new(node, 0),
            allocated_rbs: rbs,
            tx_scheme: TxScheme::SingleAntenna,
            transport_blocks: sizes
                .iter()
                .map(|&s| TransportBlockGrant {
                    mcs: 0,
                    dequeue: DequeueInfo {
                        bearer_id: DEFAULT_BEARER_ID,
                        size_bytes: s,
                    },
                    sinr_db: 0.0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_owner_map() {
        let result = vec![
            entry(1, RbBitmap::from_range(0, 2), &[10]),
            entry(2, RbBitmap::from_range(4, 1), &[10]),
        ];
        let owners = rb_owner_map(&result, 6);
        assert_eq!(owners[1], Some(StationId::new(1, 0)));
        assert_eq!(owners[2], None);
        assert_eq!(owners[4], Some(StationId::new(2, 0)));
    }

    #[test]
    #[should_panic(expected = "Resource block allocation is overlapped")]
    fn test_owner_map_rejects_overlap() {
        let result = vec![
            entry(1, RbBitmap::from_range(0, 3), &[10]),
            entry(2, RbBitmap::from_range(2, 3), &[10]),
        ];
        rb_owner_map(&result, 6);
    }

    #[test]
    fn test_purge_is_idempotent() {
        let mut result = vec![
            entry(1, RbBitmap::from_range(0, 1), &[0, 0]),
            entry(2, RbBitmap::from_range(1, 1), &[0, 5]),
            entry(3, RbBitmap::from_range(2, 1), &[0]),
            entry(4, RbBitmap::from_range(3, 1), &[7]),
        ];
        purge_empty(&mut result);
        let once = result.clone();
        purge_empty(&mut result);
        assert_eq!(result, once);
        let kept: Vec<u32> = result.iter().map(|e| e.station.node_id).collect();
        assert_eq!(kept, vec![2, 4]);
        assert!(result.iter().all(|e| !e.is_empty()));
    }
}
