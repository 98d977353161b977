//! Network elements
//!
//! [`BaseStation`] owns everything one eNB needs per TTI: the attached
//! stations, the receiver with its interference table, the channel model,
//! the scheduler and the periodic timers (interference filter snapshot and
//! connection liveness). [`Terminal`] is the UE side: it computes CQI/RI
//! feedback from its view of the serving cell and forwards uplink grants.

use tracing::{debug, info};

use crate::channel::{ChannelMatrix, ChannelModel, LinkEnd};
use crate::config::RrmConfig;
use crate::feedback::{CqiReport, FeedbackGenerator, FeedbackUpdate};
use crate::interference::{InterferenceSource, InterferenceTable};
use crate::receiver::{SignalArrival, SignalReceiver};
use crate::registry::StationRegistry;
use crate::scheduler::{
    allocation_policy, EnbScheduler, Scheduler, SchedulingEntry, SchedulingInput, SchedulingResult,
    UeScheduler, UplinkGrant,
};
use crate::sinr::{LinkQualityEstimator, SinrVector};
use crate::timer::TimerQueue;
use crate::types::{Direction, RbBitmap, SimTime, StationId, TxScheme, TTI_NS};
use crate::utils::{db_to_linear, dbm_to_mw, mix64};

fn interference_source(config: &RrmConfig) -> InterferenceSource {
    if config.interference_filtering {
        InterferenceSource::Filtered
    } else {
        InterferenceSource::Raw
    }
}

fn estimator(config: &RrmConfig) -> LinkQualityEstimator {
    LinkQualityEstimator::new(config.noise_mw_per_rb(), interference_source(config))
}

fn interference_table(config: &RrmConfig) -> InterferenceTable {
    InterferenceTable::new(
        config.num_rb(),
        config.interference_filter_coefficient,
        config.interference_filter_in_db,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellTimer {
    InterferenceSnapshot,
    ConnectionCheck,
}

/// Both scheduling results of one TTI
#[derive(Debug, Clone, PartialEq)]
pub struct TtiResult {
    pub tti: u64,
    pub downlink: SchedulingResult,
    pub uplink: SchedulingResult,
}

pub struct BaseStation {
    id: StationId,
    config: RrmConfig,
    registry: StationRegistry,
    receiver: SignalReceiver,
    channel: ChannelModel,
    scheduler: EnbScheduler,
    timers: TimerQueue<CellTimer>,
    tti: u64,
    now: SimTime,
    powered: bool,
}

impl BaseStation {
    pub fn new(id: StationId, config: RrmConfig, channel_index: u32) -> Self {
        let scheduler = EnbScheduler::new(&config, estimator(&config), allocation_policy(&config));
        let receiver = SignalReceiver::new(
            interference_table(&config),
            estimator(&config),
            mix64(config.global_seed ^ id.as_u64()),
        );
        let mut bs = Self {
            id,
            registry: StationRegistry::new(config.pathloss_filter_coefficient),
            receiver,
            channel: ChannelModel::new(config.global_seed, channel_index, config.fading.as_ref()),
            scheduler,
            timers: TimerQueue::new(),
            tti: 0,
            now: 0,
            powered: false,
            config,
        };
        bs.power_on(0);
        bs
    }

    pub fn id(&self) -> StationId {
        self.id
    }

    pub fn config(&self) -> &RrmConfig {
        &self.config
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    pub fn receiver(&self) -> &SignalReceiver {
        &self.receiver
    }

    pub fn receiver_mut(&mut self) -> &mut SignalReceiver {
        &mut self.receiver
    }

    pub fn channel(&self) -> &ChannelModel {
        &self.channel
    }

    pub fn tti(&self) -> u64 {
        self.tti
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Start the periodic timers. A no-op when already on.
    pub fn power_on(&mut self, now: SimTime) {
        if self.powered {
            return;
        }
        self.powered = true;
        self.now = now;
        self.timers.schedule(now + TTI_NS / 2, CellTimer::InterferenceSnapshot);
        self.timers
            .schedule(now + self.config.connection_check_interval, CellTimer::ConnectionCheck);
        info!(cell = %self.id, now, "base station powered on");
    }

    /// Cancel every timer and drop all in-flight receive state
    pub fn power_off(&mut self) {
        if !self.powered {
            return;
        }
        let cancelled = self.timers.clear();
        self.receiver.clear();
        self.powered = false;
        info!(cell = %self.id, cancelled, "base station powered off");
    }

    pub fn attach(&mut self, station: StationId, now: SimTime, max_tx_power_dbm: f64) -> bool {
        self.registry.attach(station, now, max_tx_power_dbm)
    }

    pub fn detach(&mut self, station: StationId) -> bool {
        self.registry.detach(station).is_some()
    }

    pub fn set_queue_depth(&mut self, station: StationId, bearer: u8, bytes: u64) -> bool {
        self.registry.set_queue_depth(station, bearer, bytes)
    }

    pub fn set_buffer_status(&mut self, station: StationId, level: u8, now: SimTime) -> bool {
        self.registry.set_buffer_status(station, level, now)
    }

    pub fn report_ul_pathloss(&mut self, station: StationId, pathloss_db: &[f64], now: SimTime) -> bool {
        self.registry.report_ul_pathloss(station, pathloss_db, now)
    }

    pub fn deliver_feedback(&mut self, station: StationId, update: FeedbackUpdate, now: SimTime) -> bool {
        self.registry.apply_feedback(station, update, now)
    }

    /// Fire every timer due at or before `now`
    pub fn advance_to(&mut self, now: SimTime) {
        while let Some((at, timer)) = self.timers.pop_due(now) {
            match timer {
                CellTimer::InterferenceSnapshot => {
                    self.receiver.interference_mut().snapshot_filter();
                    self.timers.schedule(at + TTI_NS, CellTimer::InterferenceSnapshot);
                }
                CellTimer::ConnectionCheck => {
                    let cutoff = at.saturating_sub(self.config.connection_check_interval);
                    let expired = self.registry.expire_silent(cutoff);
                    if !expired.is_empty() {
                        info!(cell = %self.id, ?expired, "connections timed out");
                    }
                    self.timers
                        .schedule(at + self.config.connection_check_interval, CellTimer::ConnectionCheck);
                }
            }
        }
        self.now = self.now.max(now);
    }

    /// Schedule both directions for the next TTI
    pub fn on_tti(&mut self, now: SimTime) -> TtiResult {
        self.advance_to(now);
        let tti = self.tti;
        self.tti += 1;

        if !self.powered {
            return TtiResult {
                tti,
                downlink: Vec::new(),
                uplink: Vec::new(),
            };
        }

        let input = SchedulingInput {
            tti,
            stations: &self.registry,
            interference: self.receiver.interference(),
        };
        let downlink = self.scheduler.schedule_downlink(&input);
        let uplink = self.scheduler.schedule_uplink(&input);
        debug!(cell = %self.id, tti, dl = downlink.len(), ul = uplink.len(), "TTI scheduled");
        TtiResult { tti, downlink, uplink }
    }

    /// Describe an uplink transmission arriving at this cell.
    ///
    /// `desired` is false for transmissions scheduled by another cell.
    pub fn uplink_arrival(
        &self,
        from: LinkEnd,
        entry: &SchedulingEntry,
        pathloss_db: f64,
        tx_power_dbm: f64,
        desired: bool,
    ) -> SignalArrival {
        let rx = LinkEnd::new(self.id, self.config.num_rx_antennas);
        let num_rb = entry.allocated_rbs.count().max(1);
        SignalArrival {
            source: from.station,
            desired,
            direction: Direction::Uplink,
            rbs: entry.allocated_rbs,
            scheme: entry.tx_scheme,
            fading: self.channel.fading_matrix(from, rx, self.now),
            geometry: 1.0 / db_to_linear(pathloss_db),
            tx_power_mw_per_rb: dbm_to_mw(tx_power_dbm) / num_rb as f64,
            mcs: if desired {
                entry.transport_blocks.iter().map(|tb| tb.mcs).collect()
            } else {
                Vec::new()
            },
            duration: TTI_NS,
        }
    }
}

/// The serving cell's whole-band downlink as seen by a terminal at one instant
struct DownlinkView {
    fading: ChannelMatrix,
    geometry: f64,
    tx_mw_per_rb: f64,
    band: RbBitmap,
}

impl DownlinkView {
    fn estimate(
        &self,
        estimator: &LinkQualityEstimator,
        interference: &InterferenceTable,
        scheme: TxScheme,
    ) -> SinrVector {
        estimator.estimate(scheme, &self.fading, self.geometry, self.tx_mw_per_rb, &self.band, interference)
    }
}

/// UE side of one radio link
pub struct Terminal {
    id: StationId,
    config: RrmConfig,
    channel: ChannelModel,
    estimator: LinkQualityEstimator,
    interference: InterferenceTable,
    feedback: FeedbackGenerator,
    scheduler: UeScheduler,
    /// Holds the serving cell only
    registry: StationRegistry,
    serving: Option<(LinkEnd, f64)>,
}

impl Terminal {
    pub fn new(id: StationId, config: RrmConfig, channel_index: u32) -> Self {
        Self {
            id,
            channel: ChannelModel::new(config.global_seed, channel_index, config.fading.as_ref()),
            estimator: estimator(&config),
            interference: interference_table(&config),
            feedback: Self::generator(&config),
            scheduler: UeScheduler::new(id),
            registry: StationRegistry::new(config.pathloss_filter_coefficient),
            serving: None,
            config,
        }
    }

    fn generator(config: &RrmConfig) -> FeedbackGenerator {
        FeedbackGenerator::new(
            config.cqi_interval,
            config.cqi_offset,
            config.ri_interval,
            config.ri_offset,
            config.num_tx_antennas,
            config.num_rx_antennas,
            config.cqi_snr_table,
        )
    }

    pub fn id(&self) -> StationId {
        self.id
    }

    pub fn serving_cell(&self) -> Option<StationId> {
        self.serving.map(|(cell, _)| cell.station)
    }

    pub fn interference_mut(&mut self) -> &mut InterferenceTable {
        &mut self.interference
    }

    /// Connect to a cell transmitting the configured `tx_power_dbm` over
    /// the whole band. Feedback starts from scratch.
    pub fn connect(&mut self, cell: StationId, now: SimTime) {
        self.disconnect();
        let end = LinkEnd::new(cell, self.config.num_tx_antennas);
        let tx_power_dbm = self.config.tx_power_dbm;
        self.registry.attach(cell, now, tx_power_dbm);
        self.serving = Some((end, tx_power_dbm));
        info!(station = %self.id, %cell, tx_power_dbm, "connected");
    }

    pub fn disconnect(&mut self) {
        if let Some((cell, _)) = self.serving.take() {
            self.registry.detach(cell.station);
            self.feedback = Self::generator(&self.config);
            info!(station = %self.id, cell = %cell.station, "disconnected");
        }
    }

    /// Latest valid CQI/RI pair
    pub fn report(&self) -> Option<CqiReport> {
        self.feedback.report()
    }

    fn downlink_view(&self, now: SimTime, pathloss_db: f64) -> Option<DownlinkView> {
        let (cell, tx_power_dbm) = self.serving?;
        let num_rb = self.config.num_rb();
        let me = LinkEnd::new(self.id, self.config.num_rx_antennas);
        Some(DownlinkView {
            fading: self.channel.fading_matrix(cell, me, now),
            geometry: 1.0 / db_to_linear(pathloss_db),
            tx_mw_per_rb: dbm_to_mw(tx_power_dbm) / num_rb as f64,
            band: RbBitmap::from_range(0, num_rb),
        })
    }

    /// Wideband downlink SINR per transport block for `scheme`
    pub fn estimate_downlink(&self, scheme: TxScheme, now: SimTime, pathloss_db: f64) -> Option<SinrVector> {
        let view = self.downlink_view(now, pathloss_db)?;
        Some(view.estimate(&self.estimator, &self.interference, scheme))
    }

    /// Run the feedback schedule for `tti`. Nothing is produced while
    /// unconnected.
    pub fn on_tti(&mut self, tti: u64, now: SimTime, pathloss_db: f64) -> Option<FeedbackUpdate> {
        let view = self.downlink_view(now, pathloss_db)?;
        let estimator = self.estimator;
        let interference = &self.interference;
        self.feedback
            .on_tti(tti, |scheme| view.estimate(&estimator, interference, scheme))
    }

    pub fn set_uplink_grant(&mut self, grant: UplinkGrant) {
        self.scheduler.set_uplink_grant(grant);
    }

    pub fn schedule_uplink(&mut self, tti: u64) -> SchedulingResult {
        let input = SchedulingInput {
            tti,
            stations: &self.registry,
            interference: &self.interference,
        };
        self.scheduler.schedule_uplink(&input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelBandwidth, DEFAULT_BEARER_ID, NANOS_PER_SEC};

    const CELL: StationId = StationId::new(1, 0);

    fn config() -> RrmConfig {
        RrmConfig {
            bandwidth: ChannelBandwidth::Mhz5,
            num_tx_antennas: 2,
            num_rx_antennas: 2,
            ..RrmConfig::default()
        }
    }

    fn ue(n: u32) -> StationId {
        StationId::new(100 + n, 0)
    }

    #[test]
    fn test_terminal_feedback_reaches_scheduler() {
        let cfg = config();
        let mut bs = BaseStation::new(CELL, cfg.clone(), 0);
        let mut term = Terminal::new(ue(1), cfg, 0);
        term.connect(CELL, 0);
        bs.attach(ue(1), 0, 23.0);
        bs.set_queue_depth(ue(1), DEFAULT_BEARER_ID, 50_000);

        for tti in 0..=10 {
            let now = tti * TTI_NS;
            if let Some(update) = term.on_tti(tti, now, 110.0) {
                bs.deliver_feedback(ue(1), update, now);
            }
        }
        assert!(term.report().is_some());
        assert_eq!(bs.registry().get(ue(1)).and_then(|s| s.reports.report()), term.report());

        let result = bs.on_tti(11 * TTI_NS);
        assert_eq!(result.downlink.len(), 1);
        assert_eq!(result.downlink[0].station, ue(1));
        assert!(result.downlink[0].total_bytes() > 0);
    }

    #[test]
    fn test_downlink_estimate_follows_configured_power() {
        let mut low = Terminal::new(ue(1), config(), 0);
        let mut high = Terminal::new(
            ue(1),
            RrmConfig {
                tx_power_dbm: 33.0,
                ..config()
            },
            0,
        );
        assert_eq!(high.estimate_downlink(TxScheme::Diversity, 0, 100.0), None);

        low.connect(CELL, 0);
        high.connect(CELL, 0);
        let lo = low.estimate_downlink(TxScheme::Diversity, 0, 100.0).unwrap();
        let hi = high.estimate_downlink(TxScheme::Diversity, 0, 100.0).unwrap();
        // noise limited: 10 dB more power is 10 dB more SINR
        assert!((crate::utils::linear_to_db(hi[0] / lo[0]) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_unconnected_terminal_is_silent() {
        let mut term = Terminal::new(ue(1), config(), 0);
        for tti in 0..20 {
            assert_eq!(term.on_tti(tti, tti * TTI_NS, 100.0), None);
        }
        term.connect(CELL, 0);
        term.disconnect();
        assert_eq!(term.serving_cell(), None);
        assert_eq!(term.report(), None);
    }

    #[test]
    fn test_terminal_uplink_grant() {
        let mut term = Terminal::new(ue(1), config(), 0);
        term.connect(CELL, 0);
        term.set_uplink_grant(UplinkGrant { start_rb: 0, num_rbs: 4, mcs: 6 });
        let result = term.schedule_uplink(3);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].station, ue(1));
        assert!(term.schedule_uplink(4).is_empty());
    }

    #[test]
    fn test_silent_station_expires() {
        let mut bs = BaseStation::new(CELL, config(), 0);
        bs.attach(ue(1), 0, 23.0);
        bs.attach(ue(2), 0, 23.0);
        bs.set_buffer_status(ue(2), 1, NANOS_PER_SEC / 2);
        // first check at 1 s removes nobody, the second at 2 s removes ue 1
        bs.advance_to(NANOS_PER_SEC);
        assert_eq!(bs.registry().len(), 2);
        bs.set_buffer_status(ue(2), 1, NANOS_PER_SEC + 1);
        bs.advance_to(2 * NANOS_PER_SEC);
        assert!(!bs.registry().contains(ue(1)));
        assert!(bs.registry().contains(ue(2)));
    }

    #[test]
    fn test_long_check_interval_keeps_silent_stations() {
        let cfg = RrmConfig {
            connection_check_interval: u64::MAX / 2,
            ..config()
        };
        let mut bs = BaseStation::new(CELL, cfg, 0);
        bs.attach(ue(1), 0, 23.0);
        bs.set_queue_depth(ue(1), DEFAULT_BEARER_ID, 1 << 20);
        bs.deliver_feedback(ue(1), FeedbackUpdate::Ri(1), 0);
        bs.deliver_feedback(ue(1), FeedbackUpdate::Cqi { cqi0: 9, cqi1: None }, 0);
        for tti in 1..=3000 {
            bs.on_tti(tti * TTI_NS);
        }
        assert!(bs.registry().contains(ue(1)));
        assert_eq!(bs.on_tti(3001 * TTI_NS).downlink.len(), 1);
    }

    #[test]
    fn test_power_off_cancels_timers() {
        let mut bs = BaseStation::new(CELL, config(), 0);
        assert_eq!(bs.pending_timers(), 2);
        bs.attach(ue(1), 0, 23.0);
        bs.power_off();
        assert_eq!(bs.pending_timers(), 0);
        bs.advance_to(10 * NANOS_PER_SEC);
        assert!(bs.registry().contains(ue(1)));
        assert!(bs.on_tti(10 * NANOS_PER_SEC).downlink.is_empty());

        bs.power_on(10 * NANOS_PER_SEC);
        assert_eq!(bs.pending_timers(), 2);
    }

    #[test]
    fn test_interference_snapshot_every_tti() {
        let cfg = RrmConfig {
            interference_filtering: true,
            ..config()
        };
        let mut bs = BaseStation::new(CELL, cfg, 0);
        bs.receiver_mut()
            .interference_mut()
            .add(&RbBitmap::from_range(0, 25), 2e-12);
        bs.advance_to(TTI_NS / 2);
        assert_eq!(bs.receiver().interference().filtered(0), 2e-12);
        assert_eq!(bs.pending_timers(), 2);
    }

    #[test]
    fn test_scheduler_reads_db_filtered_interference() {
        let band = RbBitmap::from_range(0, 25);
        let cell = |cfg: RrmConfig, interference_mw: f64| {
            let mut bs = BaseStation::new(CELL, cfg, 0);
            bs.attach(ue(1), 0, 23.0);
            bs.set_buffer_status(ue(1), 3, 0);
            bs.report_ul_pathloss(ue(1), &[80.0, 80.0], 0);
            bs.receiver_mut().interference_mut().add(&band, interference_mw);
            bs
        };
        let ul_sinr_db = |bs: &mut BaseStation| bs.on_tti(TTI_NS).uplink[0].transport_blocks[0].sinr_db;

        let mut filtered = cell(
            RrmConfig {
                interference_filtering: true,
                interference_filter_in_db: true,
                interference_filter_coefficient: 4.0,
                ..config()
            },
            1e-12,
        );
        // the half-TTI snapshot sees -120 dBm, then the raw level jumps to -100 dBm
        filtered.advance_to(TTI_NS / 2);
        filtered.receiver_mut().interference_mut().add(&band, 9.9e-11);
        assert!((filtered.receiver().interference().raw(0) - 1e-10).abs() < 1e-20);

        let from_snapshot = ul_sinr_db(&mut cell(config(), 1e-12));
        let from_raw = ul_sinr_db(&mut cell(config(), 1e-10));
        let scheduled = ul_sinr_db(&mut filtered);
        assert!((scheduled - from_snapshot).abs() < 1e-6, "{} vs {}", scheduled, from_snapshot);
        assert!(scheduled > from_raw + 10.0);

        // next snapshot averages in dB: (-120 + -100) / 2 = -110 dBm
        filtered.advance_to(3 * TTI_NS / 2);
        let mw = filtered.receiver().interference().filtered(0);
        assert!((mw / 1e-11 - 1.0).abs() < 1e-9, "{}", mw);
    }

    #[test]
    fn test_uplink_arrival_from_scheduled_entry() {
        let mut bs = BaseStation::new(CELL, config(), 0);
        bs.attach(ue(1), 0, 23.0);
        bs.set_buffer_status(ue(1), 3, 0);
        bs.report_ul_pathloss(ue(1), &[90.0, 90.0], 0);
        let result = bs.on_tti(TTI_NS);
        let entry = &result.uplink[0];

        let arrival = bs.uplink_arrival(LinkEnd::new(ue(1), 1), entry, 90.0, 23.0, true);
        assert_eq!(arrival.fading.rows(), 2);
        assert_eq!(arrival.mcs.len(), 1);
        let rx = bs.receiver_mut();
        let handle = rx.on_arrival(TTI_NS, arrival);
        let outcome = rx.on_departure(2 * TTI_NS, handle).unwrap();
        assert_eq!(outcome.source, ue(1));
        assert_eq!(outcome.tb_errors.len(), 1);
    }
}
