//! Connected-station registry
//!
//! Owned by one base station. Everything the scheduler needs to know about
//! an attached station lives here: queue depths, buffer status, feedback
//! state and uplink pathloss.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::feedback::{FeedbackUpdate, ReportTracker};
use crate::filter::ExponentialMean;
use crate::types::{SimTime, StationId};
use crate::utils::db_to_linear;

#[derive(Debug, Clone)]
struct PathlossState {
    instant_db: f64,
    filtered: ExponentialMean,
}

#[derive(Debug, Clone)]
pub struct ConnectedStation {
    pub id: StationId,
    pub connected_at: SimTime,
    pub last_heard: SimTime,
    pub max_tx_power_dbm: f64,
    /// Buffer status report level, 0 when the terminal has nothing queued
    pub bsr_level: u8,
    pub reports: ReportTracker,
    queue_bytes: HashMap<u8, u64>,
    ul_pathloss: Vec<PathlossState>,
}

impl ConnectedStation {
    fn new(id: StationId, now: SimTime, max_tx_power_dbm: f64) -> Self {
        Self {
            id,
            connected_at: now,
            last_heard: now,
            max_tx_power_dbm,
            bsr_level: 0,
            reports: ReportTracker::new(),
            queue_bytes: HashMap::new(),
            ul_pathloss: Vec::new(),
        }
    }

    pub fn queue_bytes(&self, bearer: u8) -> u64 {
        self.queue_bytes.get(&bearer).copied().unwrap_or(0)
    }

    pub fn has_ul_pathloss(&self) -> bool {
        !self.ul_pathloss.is_empty()
    }

    /// Filtered uplink pathloss on one receive antenna, dB
    pub fn filtered_ul_pathloss_db(&self, antenna: usize) -> Option<f64> {
        self.ul_pathloss.get(antenna).and_then(|p| p.filtered.value())
    }

    /// Latest unfiltered uplink pathloss per receive antenna, linear
    pub fn instant_ul_pathloss_linear(&self) -> Vec<f64> {
        self.ul_pathloss
            .iter()
            .map(|p| db_to_linear(p.instant_db))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct StationRegistry {
    stations: BTreeMap<StationId, ConnectedStation>,
    pathloss_filter_coefficient: f64,
}

impl StationRegistry {
    pub fn new(pathloss_filter_coefficient: f64) -> Self {
        Self {
            stations: BTreeMap::new(),
            pathloss_filter_coefficient,
        }
    }

    /// Returns false when the station was already attached
    pub fn attach(&mut self, id: StationId, now: SimTime, max_tx_power_dbm: f64) -> bool {
        if self.stations.contains_key(&id) {
            return false;
        }
        info!(station = %id, now, "station attached");
        self.stations
            .insert(id, ConnectedStation::new(id, now, max_tx_power_dbm));
        true
    }

    pub fn detach(&mut self, id: StationId) -> Option<ConnectedStation> {
        let removed = self.stations.remove(&id);
        if removed.is_some() {
            info!(station = %id, "station detached");
        }
        removed
    }

    pub fn get(&self, id: StationId) -> Option<&ConnectedStation> {
        self.stations.get(&id)
    }

    pub fn get_mut(&mut self, id: StationId) -> Option<&mut ConnectedStation> {
        self.stations.get_mut(&id)
    }

    pub fn contains(&self, id: StationId) -> bool {
        self.stations.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectedStation> {
        self.stations.values()
    }

    /// Stations ordered by connection time, ties broken by id
    pub fn by_connected_time(&self) -> Vec<&ConnectedStation> {
        let mut list: Vec<&ConnectedStation> = self.stations.values().collect();
        list.sort_by_key(|s| (s.connected_at, s.id));
        list
    }

    pub fn set_queue_depth(&mut self, id: StationId, bearer: u8, bytes: u64) -> bool {
        match self.stations.get_mut(&id) {
            Some(s) => {
                s.queue_bytes.insert(bearer, bytes);
                true
            }
            None => false,
        }
    }

    pub fn set_buffer_status(&mut self, id: StationId, level: u8, now: SimTime) -> bool {
        match self.stations.get_mut(&id) {
            Some(s) => {
                s.bsr_level = level;
                s.last_heard = now;
                true
            }
            None => false,
        }
    }

    /// Record a per-receive-antenna uplink pathloss measurement
    pub fn report_ul_pathloss(&mut self, id: StationId, pathloss_db: &[f64], now: SimTime) -> bool {
        let coefficient = self.pathloss_filter_coefficient;
        let Some(s) = self.stations.get_mut(&id) else {
            return false;
        };
        if s.ul_pathloss.len() != pathloss_db.len() {
            s.ul_pathloss = pathloss_db
                .iter()
                .map(|_| PathlossState {
                    instant_db: 0.0,
                    filtered: ExponentialMean::new(coefficient),
                })
                .collect();
        }
        for (state, &pl) in s.ul_pathloss.iter_mut().zip(pathloss_db) {
            state.instant_db = pl;
            state.filtered.update(pl);
        }
        s.last_heard = now;
        true
    }

    pub fn apply_feedback(&mut self, id: StationId, update: FeedbackUpdate, now: SimTime) -> bool {
        match self.stations.get_mut(&id) {
            Some(s) => {
                s.reports.apply(update);
                s.last_heard = now;
                debug!(station = %id, ?update, state = ?s.reports.state(), "feedback delivered");
                true
            }
            None => false,
        }
    }

    /// Detach every station not heard from since `cutoff`
    pub fn expire_silent(&mut self, cutoff: SimTime) -> Vec<StationId> {
        let stale: Vec<StationId> = self
            .stations
            .values()
            .filter(|s| s.last_heard < cutoff)
            .map(|s| s.id)
            .collect();
        for id in &stale {
            self.detach(*id);
        }
        stale
    }
}
