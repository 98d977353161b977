//! Terminal-side scheduler
//!
//! A terminal never decides for anyone else. Its uplink result is the
//! grant the base station signalled for it, if one is pending.

use tracing::{debug, warn};

use super::{purge_empty, DequeueInfo, Scheduler, SchedulingEntry, SchedulingInput, SchedulingResult, TransportBlockGrant};
use crate::tables::{dequeue_bytes, MAX_TBS_NUM_RB, REGULAR_MCS_INDEX_LEN};
use crate::types::{Direction, RbBitmap, StationId, TxScheme, DEFAULT_BEARER_ID};

/// Uplink grant signalled by the serving base station
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkGrant {
    pub start_rb: usize,
    pub num_rbs: usize,
    pub mcs: u8,
}

impl UplinkGrant {
    /// True when the grant fits a pool of `num_rb` RBs and names a regular MCS
    pub fn fits(&self, num_rb: usize) -> bool {
        self.num_rbs <= MAX_TBS_NUM_RB
            && self.start_rb.checked_add(self.num_rbs).is_some_and(|end| end <= num_rb)
            && (self.mcs as usize) < REGULAR_MCS_INDEX_LEN
    }
}

#[derive(Debug, Clone)]
pub struct UeScheduler {
    own_id: StationId,
    grant: Option<UplinkGrant>,
}

impl UeScheduler {
    pub fn new(own_id: StationId) -> Self {
        Self { own_id, grant: None }
    }

    /// Replaces any grant not yet used
    pub fn set_uplink_grant(&mut self, grant: UplinkGrant) {
        self.grant = Some(grant);
    }

    pub fn pending_grant(&self) -> Option<UplinkGrant> {
        self.grant
    }
}

impl Scheduler for UeScheduler {
    fn schedule_downlink(&mut self, _input: &SchedulingInput<'_>) -> SchedulingResult {
        panic!("downlink scheduling is not supported on a terminal");
    }

    fn schedule_uplink(&mut self, input: &SchedulingInput<'_>) -> SchedulingResult {
        let Some(grant) = self.grant.take() else {
            return Vec::new();
        };
        if grant.num_rbs == 0 {
            return Vec::new();
        }
        let num_rb = input.interference.num_rb();
        if !grant.fits(num_rb) {
            warn!(station = %self.own_id, tti = input.tti, ?grant, num_rb, "uplink grant outside RB pool dropped");
            return Vec::new();
        }
        let size_bytes = dequeue_bytes(Direction::Uplink, grant.mcs, grant.num_rbs);
        debug!(station = %self.own_id, tti = input.tti, ?grant, size_bytes, "uplink grant used");

        let mut result = vec![SchedulingEntry {
            station: self.own_id,
            allocated_rbs: RbBitmap::from_range(grant.start_rb, grant.num_rbs),
            tx_scheme: TxScheme::SingleAntenna,
            transport_blocks: vec![TransportBlockGrant {
                mcs: grant.mcs,
                dequeue: DequeueInfo {
                    bearer_id: DEFAULT_BEARER_ID,
                    size_bytes,
                },
                // chosen by the base station; no estimate on this side
                sinr_db: f64::NAN,
            }],
        }];
        self.purge_invalid(Direction::Uplink, &mut result);
        result
    }

    fn purge_invalid(&self, direction: Direction, result: &mut SchedulingResult) {
        match direction {
            Direction::Downlink => panic!("downlink purge is not supported on a terminal"),
            Direction::Uplink => purge_empty(result),
        }
    }
}
