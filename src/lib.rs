//! LTE radio resource management NIF
//!
//! Link-level core of an LTE cell: channel model, interference accumulation,
//! SINR estimation, CQI/RI feedback, MCS selection and resource-block
//! scheduling. Base stations live in a global slab and are driven TTI by
//! TTI from Elixir.

pub mod cell;
pub mod channel;
pub mod config;
pub mod error;
pub mod feedback;
pub mod filter;
pub mod interference;
pub mod logging;
pub mod mcs;
pub mod nif_types;
pub mod receiver;
pub mod registry;
pub mod scheduler;
pub mod sinr;
pub mod slab;
pub mod tables;
pub mod timer;
pub mod types;
pub mod utils;

use rustler::{Env, NifResult, Term};
use tracing::{debug, warn};

use cell::BaseStation;
use nif_types::{feedback_update, BaseStationParams, SchedulingEntryTerm, TtiResultTerm};
use slab::SharedSlab;
use types::{SimTime, StationId};

// Each base station sits behind its own slot lock
lazy_static::lazy_static! {
    static ref BASE_STATIONS: SharedSlab<BaseStation> = SharedSlab::new(1024);
}

mod atoms {
    rustler::atoms! {
        ok,
        ri,
        cqi,
    }
}

fn on_load(_env: Env, _info: Term) -> bool {
    match logging::init_logging(logging::DEFAULT_FILTER) {
        Ok(()) => debug!("tracing subscriber installed"),
        // the host or an earlier load already set one; keep it
        Err(e) => debug!(error = %e, "keeping existing tracing subscriber"),
    }
    true
}

rustler::init!("Elixir.LteRrm.Nif", load = on_load);

fn term_error(reason: &'static str) -> rustler::Error {
    rustler::Error::Term(Box::new(reason))
}

fn with_cell<R>(id: u64, f: impl FnOnce(&mut BaseStation) -> R) -> NifResult<R> {
    BASE_STATIONS
        .with_mut(id, f)
        .ok_or_else(|| term_error("base_station_not_found"))
}

fn found(ok: bool) -> NifResult<rustler::Atom> {
    if ok {
        Ok(atoms::ok())
    } else {
        Err(term_error("station_not_found"))
    }
}

/// Creates a base station and returns its slab handle.
#[rustler::nif]
fn create_base_station(params: BaseStationParams) -> NifResult<(rustler::Atom, u64)> {
    let config = params.to_config().map_err(|e| {
        warn!(error = %e, "rejected base station configuration");
        rustler::Error::Term(Box::new(e.to_string()))
    })?;
    let bs = BaseStation::new(params.station_id(), config, params.channel_index);

    match BASE_STATIONS.insert(bs) {
        Some(id) => Ok((atoms::ok(), id)),
        None => Err(term_error("slab_full")),
    }
}

/// Powers a base station off and frees its slot.
#[rustler::nif]
fn destroy_base_station(id: u64) -> NifResult<rustler::Atom> {
    if let Some(mut bs) = BASE_STATIONS.remove(id) {
        bs.power_off();
    }
    Ok(atoms::ok())
}

#[rustler::nif]
fn attach_station(
    id: u64,
    node_id: u32,
    interface_index: u32,
    now: SimTime,
    max_tx_power_dbm: f64,
) -> NifResult<rustler::Atom> {
    let station = StationId::new(node_id, interface_index);
    if with_cell(id, |bs| bs.attach(station, now, max_tx_power_dbm))? {
        Ok(atoms::ok())
    } else {
        Err(term_error("already_attached"))
    }
}

#[rustler::nif]
fn detach_station(id: u64, node_id: u32, interface_index: u32) -> NifResult<rustler::Atom> {
    let station = StationId::new(node_id, interface_index);
    found(with_cell(id, |bs| bs.detach(station))?)
}

#[rustler::nif]
fn set_queue_depth(
    id: u64,
    node_id: u32,
    interface_index: u32,
    bearer_id: u8,
    bytes: u64,
) -> NifResult<rustler::Atom> {
    let station = StationId::new(node_id, interface_index);
    found(with_cell(id, |bs| bs.set_queue_depth(station, bearer_id, bytes))?)
}

#[rustler::nif]
fn set_buffer_status(
    id: u64,
    node_id: u32,
    interface_index: u32,
    level: u8,
    now: SimTime,
) -> NifResult<rustler::Atom> {
    let station = StationId::new(node_id, interface_index);
    found(with_cell(id, |bs| bs.set_buffer_status(station, level, now))?)
}

/// Uplink pathloss per receive antenna, dB
#[rustler::nif]
fn report_ul_pathloss(
    id: u64,
    node_id: u32,
    interface_index: u32,
    pathloss_db: Vec<f64>,
    now: SimTime,
) -> NifResult<rustler::Atom> {
    if pathloss_db.is_empty() {
        return Err(term_error("invalid_pathloss"));
    }
    let station = StationId::new(node_id, interface_index);
    found(with_cell(id, |bs| bs.report_ul_pathloss(station, &pathloss_db, now))?)
}

/// `kind` is `:ri` with `[rank]` or `:cqi` with `[cqi0]` / `[cqi0, cqi1]`.
#[rustler::nif]
fn deliver_feedback(
    id: u64,
    node_id: u32,
    interface_index: u32,
    kind: rustler::Atom,
    values: Vec<u8>,
    now: SimTime,
) -> NifResult<rustler::Atom> {
    let is_rank = if kind == atoms::ri() {
        true
    } else if kind == atoms::cqi() {
        false
    } else {
        return Err(term_error("unknown_feedback_kind"));
    };
    let update = feedback_update(is_rank, &values).ok_or_else(|| term_error("invalid_feedback"))?;
    let station = StationId::new(node_id, interface_index);
    found(with_cell(id, |bs| bs.deliver_feedback(station, update, now))?)
}

/// Runs one TTI and returns both scheduling results.
#[rustler::nif]
fn schedule_tti(id: u64, now: SimTime) -> NifResult<(rustler::Atom, TtiResultTerm)> {
    let result = with_cell(id, |bs| bs.on_tti(now))?;
    Ok((
        atoms::ok(),
        TtiResultTerm {
            tti: result.tti,
            downlink: result.downlink.iter().map(SchedulingEntryTerm::from).collect(),
            uplink: result.uplink.iter().map(SchedulingEntryTerm::from).collect(),
        },
    ))
}

#[rustler::nif]
fn station_count(id: u64) -> NifResult<u64> {
    with_cell(id, |bs| bs.registry().len() as u64)
}

/// Returns the number of live base stations in the slab.
#[rustler::nif]
fn base_station_count() -> NifResult<u64> {
    Ok(BASE_STATIONS.count() as u64)
}
