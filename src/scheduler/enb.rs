//! Base-station scheduler

use tracing::debug;

use super::{
    purge_empty, rb_owner_map, AllocationPolicy, DequeueInfo, Scheduler, SchedulingEntry,
    SchedulingInput, SchedulingResult, TransportBlockGrant,
};
use crate::config::RrmConfig;
use crate::interference::InterferenceTable;
use crate::mcs::McsSelector;
use crate::registry::ConnectedStation;
use crate::sinr::LinkQualityEstimator;
use crate::tables::{dequeue_bytes, CQI_INDEX_LEN};
use crate::types::{Direction, RbBitmap, TxScheme, DEFAULT_BEARER_ID};
use crate::utils::{dbm_to_mw, linear_to_db};

/// Stand-in SINR for a transport block without a usable CQI. CQI 0 means
/// out of range and is treated the same way.
pub const NEGATIVE_INFINITY_DB: f64 = -1000.0;

/// Uplink transmit power from open-loop power control:
/// min(Pmax, 10 log10(M) + P0 + alpha * PL)
pub fn uplink_tx_power_dbm(max_dbm: f64, num_rb: usize, p0_dbm: f64, alpha: f64, pathloss_db: f64) -> f64 {
    (10.0 * (num_rb as f64).log10() + p0_dbm + alpha * pathloss_db).min(max_dbm)
}

/// Everything needed to turn an allocation into transport blocks
struct LinkAdaptation {
    num_tx_antennas: usize,
    p0_pusch_dbm: f64,
    tpc_alpha: f64,
    cqi_snr_table: [f64; CQI_INDEX_LEN],
    dl_selector: McsSelector,
    ul_selector: McsSelector,
    estimator: LinkQualityEstimator,
}

impl LinkAdaptation {
    fn cqi_sinr_db(&self, cqi: Option<u8>) -> f64 {
        match cqi {
            Some(c) if c > 0 && (c as usize) < CQI_INDEX_LEN => self.cqi_snr_table[c as usize],
            _ => NEGATIVE_INFINITY_DB,
        }
    }

    fn grant(&self, direction: Direction, sinr_db: f64, num_rb: usize) -> TransportBlockGrant {
        let selector = match direction {
            Direction::Downlink => &self.dl_selector,
            Direction::Uplink => &self.ul_selector,
        };
        let selection = selector.select(sinr_db, num_rb);
        let mcs = selection.index();
        // An exhausted search leaves nothing to send; purge drops the entry
        let size_bytes = if selection.meets_target() {
            dequeue_bytes(direction, mcs, num_rb)
        } else {
            0
        };
        TransportBlockGrant {
            mcs,
            dequeue: DequeueInfo {
                bearer_id: DEFAULT_BEARER_ID,
                size_bytes,
            },
            sinr_db,
        }
    }

    fn downlink_entry(&self, station: &ConnectedStation, rbs: RbBitmap) -> Option<SchedulingEntry> {
        let report = station.reports.report()?;
        let scheme = TxScheme::from_rank(report.rank, self.num_tx_antennas);
        let cqis = [Some(report.cqi0), report.cqi1];
        let num_rb = rbs.count();

        let transport_blocks = cqis
            .iter()
            .take(scheme.num_transport_blocks())
            .map(|&cqi| self.grant(Direction::Downlink, self.cqi_sinr_db(cqi), num_rb))
            .collect();

        Some(SchedulingEntry {
            station: station.id,
            allocated_rbs: rbs,
            tx_scheme: scheme,
            transport_blocks,
        })
    }

    fn uplink_sinr_db(&self, station: &ConnectedStation, rbs: &RbBitmap, interference: &InterferenceTable) -> f64 {
        let num_rb = rbs.count();
        let pathloss = station
            .filtered_ul_pathloss_db(0)
            .unwrap_or(f64::INFINITY);
        let tx_dbm = uplink_tx_power_dbm(
            station.max_tx_power_dbm,
            num_rb,
            self.p0_pusch_dbm,
            self.tpc_alpha,
            pathloss,
        );
        let per_rb_mw = dbm_to_mw(tx_dbm) / num_rb as f64;
        let sinr = self.estimator.estimate_uplink(
            per_rb_mw,
            &station.instant_ul_pathloss_linear(),
            rbs,
            interference,
        );
        linear_to_db(sinr)
    }

    fn uplink_entry(&self, station: &ConnectedStation, rbs: RbBitmap, interference: &InterferenceTable) -> SchedulingEntry {
        let sinr_db = self.uplink_sinr_db(station, &rbs, interference);
        SchedulingEntry {
            station: station.id,
            allocated_rbs: rbs,
            tx_scheme: TxScheme::SingleAntenna,
            transport_blocks: vec![self.grant(Direction::Uplink, sinr_db, rbs.count())],
        }
    }
}

fn entry_bits(entry: Option<SchedulingEntry>) -> u32 {
    entry.map_or(0, |e| (e.total_bytes() * 8) as u32)
}

pub struct EnbScheduler {
    num_rb: usize,
    pucch_overhead: usize,
    link: LinkAdaptation,
    policy: Box<dyn AllocationPolicy>,
}

impl EnbScheduler {
    pub fn new(config: &RrmConfig, estimator: LinkQualityEstimator, policy: Box<dyn AllocationPolicy>) -> Self {
        Self {
            num_rb: config.num_rb(),
            pucch_overhead: config.pucch_overhead,
            link: LinkAdaptation {
                num_tx_antennas: config.num_tx_antennas,
                p0_pusch_dbm: config.p0_pusch_dbm,
                tpc_alpha: config.tpc_alpha,
                cqi_snr_table: config.cqi_snr_table,
                dl_selector: McsSelector::new(Direction::Downlink, config.target_bler),
                ul_selector: McsSelector::new(Direction::Uplink, config.target_bler),
                estimator,
            },
            policy,
        }
    }

    pub fn is_downlink_candidate(station: &ConnectedStation) -> bool {
        station.queue_bytes(DEFAULT_BEARER_ID) > 0 && station.reports.is_valid()
    }

    pub fn is_uplink_candidate(station: &ConnectedStation) -> bool {
        station.bsr_level > 0 && station.filtered_ul_pathloss_db(0).is_some()
    }

    /// Estimated uplink SINR of `station` transmitting on `rbs`, dB
    pub fn estimate_uplink_sinr_db(
        &self,
        station: &ConnectedStation,
        rbs: &RbBitmap,
        input: &SchedulingInput<'_>,
    ) -> f64 {
        self.link.uplink_sinr_db(station, rbs, input.interference)
    }

    fn log_result(direction: Direction, tti: u64, result: &SchedulingResult) {
        for e in result {
            debug!(
                ?direction,
                tti,
                station = %e.station,
                rbs = e.allocated_rbs.count(),
                scheme = ?e.tx_scheme,
                mcs = ?e.transport_blocks.iter().map(|tb| tb.mcs).collect::<Vec<_>>(),
                bytes = e.total_bytes(),
                "scheduled"
            );
        }
    }

    fn finish(&mut self, direction: Direction, input: &SchedulingInput<'_>, mut result: SchedulingResult) -> SchedulingResult {
        rb_owner_map(&result, self.num_rb);
        Self::log_result(direction, input.tti, &result);
        self.purge_invalid(direction, &mut result);
        self.policy.record(direction, input.stations, &result);
        result
    }
}

impl Scheduler for EnbScheduler {
    fn schedule_downlink(&mut self, input: &SchedulingInput<'_>) -> SchedulingResult {
        let candidates: Vec<&ConnectedStation> = input
            .stations
            .by_connected_time()
            .into_iter()
            .filter(|s| Self::is_downlink_candidate(s))
            .collect();

        let link = &self.link;
        let rate = |s: &ConnectedStation, rbs: &RbBitmap| entry_bits(link.downlink_entry(s, *rbs));
        let allocations = self.policy.allocate_downlink(&candidates, self.num_rb, &rate);
        let result: SchedulingResult = allocations
            .into_iter()
            .filter(|a| !a.rbs.is_empty())
            .filter_map(|a| {
                let station = input.stations.get(a.station)?;
                link.downlink_entry(station, a.rbs)
            })
            .collect();

        self.finish(Direction::Downlink, input, result)
    }

    fn schedule_uplink(&mut self, input: &SchedulingInput<'_>) -> SchedulingResult {
        let candidates: Vec<&ConnectedStation> = input
            .stations
            .by_connected_time()
            .into_iter()
            .filter(|s| Self::is_uplink_candidate(s))
            .collect();

        let link = &self.link;
        let rate = |s: &ConnectedStation, rbs: &RbBitmap| {
            entry_bits(Some(link.uplink_entry(s, *rbs, input.interference)))
        };
        let allocations = self
            .policy
            .allocate_uplink(&candidates, self.num_rb, self.pucch_overhead, &rate);
        let result: SchedulingResult = allocations
            .into_iter()
            .filter(|a| !a.rbs.is_empty())
            .filter_map(|a| {
                let station = input.stations.get(a.station)?;
                Some(link.uplink_entry(station, a.rbs, input.interference))
            })
            .collect();

        self.finish(Direction::Uplink, input, result)
    }

    fn purge_invalid(&self, _direction: Direction, result: &mut SchedulingResult) {
        purge_empty(result);
    }
}
