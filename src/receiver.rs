//! Signal reception
//!
//! Receive state of every in-flight signal is owned here, in a slab keyed
//! by the handle returned on arrival and released on departure. Arrival and
//! departure also drive the interference table and transport-block error
//! evaluation:
//!
//! - before any change to the interference table, every in-flight desired
//!   signal is evaluated over the interval since its last evaluation, so it
//!   sees the interference that was actually present during that interval
//! - a non-desired signal adds its received power on arrival and removes
//!   exactly the same amount on departure
//! - a desired signal draws its transport-block errors on departure

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::channel::ChannelMatrix;
use crate::interference::InterferenceTable;
use crate::mcs::block_error_rate;
use crate::sinr::LinkQualityEstimator;
use crate::slab::Slab;
use crate::types::{Direction, RbBitmap, SimTime, StationId, TxScheme};
use crate::utils::linear_to_db;

/// Everything known about a signal when it reaches the receiver
#[derive(Debug, Clone)]
pub struct SignalArrival {
    pub source: StationId,
    /// Addressed to this receiver; otherwise it is interference
    pub desired: bool,
    pub direction: Direction,
    pub rbs: RbBitmap,
    pub scheme: TxScheme,
    /// Fading-only matrix, rx x tx
    pub fading: ChannelMatrix,
    /// Inverse pathloss, linear
    pub geometry: f64,
    pub tx_power_mw_per_rb: f64,
    /// One MCS per transport block; empty for interferers
    pub mcs: Vec<u8>,
    pub duration: SimTime,
}

impl SignalArrival {
    /// Mean received power per RB and receive antenna
    pub fn received_power_mw_per_rb(&self) -> f64 {
        let entries = (self.fading.rows() * self.fading.cols()) as f64;
        let frobenius: f64 = (0..self.fading.cols())
            .map(|c| self.fading.column_norm_sqr(c))
            .sum();
        self.tx_power_mw_per_rb * self.geometry * frobenius / entries
    }
}

#[derive(Debug, Clone)]
struct RxSignal {
    arrival: SignalArrival,
    interference_mw: f64,
    last_eval: SimTime,
    /// Probability each transport block is still intact
    survival: Vec<f64>,
    sinr_db: Vec<f64>,
}

/// Result for a desired signal once it has fully arrived
#[derive(Debug, Clone, PartialEq)]
pub struct RxOutcome {
    pub source: StationId,
    pub tb_errors: Vec<bool>,
    /// Estimated SINR of each transport block at its last evaluation
    pub sinr_db: Vec<f64>,
}

impl RxOutcome {
    pub fn is_ok(&self) -> bool {
        self.tb_errors.iter().all(|e| !e)
    }
}

#[derive(Debug)]
pub struct SignalReceiver {
    signals: Slab<RxSignal>,
    interference: InterferenceTable,
    estimator: LinkQualityEstimator,
    rng: ChaCha8Rng,
}

impl SignalReceiver {
    pub fn new(interference: InterferenceTable, estimator: LinkQualityEstimator, seed: u64) -> Self {
        Self {
            signals: Slab::new(),
            interference,
            estimator,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn interference(&self) -> &InterferenceTable {
        &self.interference
    }

    pub fn interference_mut(&mut self) -> &mut InterferenceTable {
        &mut self.interference
    }

    pub fn estimator(&self) -> &LinkQualityEstimator {
        &self.estimator
    }

    pub fn in_flight(&self) -> usize {
        self.signals.len()
    }

    /// Register a signal; returns the handle its departure must quote
    pub fn on_arrival(&mut self, now: SimTime, arrival: SignalArrival) -> u64 {
        assert!(arrival.duration > 0, "signal with zero duration");
        self.evaluate_in_flight(now);

        let interference_mw = if arrival.desired {
            0.0
        } else {
            let p = arrival.received_power_mw_per_rb();
            self.interference.add(&arrival.rbs, p);
            p
        };

        trace!(source = %arrival.source, desired = arrival.desired, now, "signal arrived");
        let num_tb = arrival.mcs.len();
        self.signals.insert(RxSignal {
            arrival,
            interference_mw,
            last_eval: now,
            survival: vec![1.0; num_tb],
            sinr_db: vec![f64::NEG_INFINITY; num_tb],
        })
    }

    /// Finish a signal. Returns the outcome for desired signals.
    ///
    /// Panics if `handle` has no matching arrival.
    pub fn on_departure(&mut self, now: SimTime, handle: u64) -> Option<RxOutcome> {
        assert!(
            self.signals.contains(handle),
            "departure of signal {} without a matching arrival",
            handle
        );
        self.evaluate_in_flight(now);

        let signal = self.signals.remove(handle)?;
        if !signal.arrival.desired {
            self.interference
                .subtract(&signal.arrival.rbs, signal.interference_mw);
            return None;
        }

        let tb_errors: Vec<bool> = signal
            .survival
            .iter()
            .map(|&p| self.rng.gen::<f64>() >= p)
            .collect();
        let outcome = RxOutcome {
            source: signal.arrival.source,
            tb_errors,
            sinr_db: signal.sinr_db,
        };
        debug!(source = %outcome.source, errors = ?outcome.tb_errors, sinr_db = ?outcome.sinr_db, "signal received");
        Some(outcome)
    }

    /// Drop every in-flight signal without evaluating it
    pub fn clear(&mut self) {
        self.signals.drain();
        self.interference.reset();
    }

    fn evaluate_in_flight(&mut self, now: SimTime) {
        let estimator = self.estimator;
        let interference = &self.interference;
        for (_, signal) in self.signals.iter_mut() {
            if !signal.arrival.desired || now <= signal.last_eval {
                continue;
            }
            let a = &signal.arrival;
            let fraction = ((now - signal.last_eval) as f64 / a.duration as f64).min(1.0);
            let sinr = estimator.estimate(a.scheme, &a.fading, a.geometry, a.tx_power_mw_per_rb, &a.rbs, interference);
            let num_rb = a.rbs.count();

            for (k, (&mcs, &s)) in a.mcs.iter().zip(&sinr).enumerate() {
                let sinr_db = linear_to_db(s);
                let bler = block_error_rate(a.direction, mcs, sinr_db, num_rb);
                signal.survival[k] *= 1.0 - fraction * bler;
                signal.sinr_db[k] = sinr_db;
            }
            signal.last_eval = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interference::InterferenceSource;
    use num_complex::Complex64;

    const N: f64 = 1e-12;

    fn receiver() -> SignalReceiver {
        SignalReceiver::new(
            InterferenceTable::new(25, 4.0, false),
            LinkQualityEstimator::new(N, InterferenceSource::Raw),
            1,
        )
    }

    fn arrival(source: u32, desired: bool, rbs: RbBitmap, power: f64, mcs: Vec<u8>) -> SignalArrival {
        SignalArrival {
            source: StationId::new(source, 0),
            desired,
            direction: Direction::Downlink,
            rbs,
            scheme: TxScheme::SingleAntenna,
            fading: ChannelMatrix::from_vec(1, 1, vec![Complex64::new(1.0, 0.0)]),
            geometry: 1.0,
            tx_power_mw_per_rb: power,
            mcs,
            duration: 1_000_000,
        }
    }

    #[test]
    fn test_interferer_adds_and_removes_same_power() {
        let mut rx = receiver();
        let h = rx.on_arrival(0, arrival(2, false, RbBitmap::from_range(0, 5), 3e-12, vec![]));
        assert_eq!(rx.interference().raw(0), 3e-12);
        assert_eq!(rx.on_departure(1_000_000, h), None);
        assert_eq!(rx.interference().raw(0), 0.0);
        assert_eq!(rx.in_flight(), 0);
    }

    #[test]
    fn test_strong_desired_signal_is_received() {
        let mut rx = receiver();
        let h = rx.on_arrival(0, arrival(1, true, RbBitmap::from_range(0, 10), 1e-6, vec![5]));
        let out = rx.on_departure(1_000_000, h).unwrap();
        assert!(out.is_ok());
        assert!((out.sinr_db[0] - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_weak_desired_signal_fails() {
        let mut rx = receiver();
        let h = rx.on_arrival(0, arrival(1, true, RbBitmap::from_range(0, 10), 1e-14, vec![28]));
        let out = rx.on_departure(1_000_000, h).unwrap();
        assert_eq!(out.tb_errors, vec![true]);
    }

    #[test]
    fn test_interference_counts_only_from_its_arrival() {
        let mut rx = receiver();
        let rbs = RbBitmap::from_range(0, 10);
        let wanted = rx.on_arrival(0, arrival(1, true, rbs, 1e-10, vec![10]));
        // A strong interferer shows up at the very end of the desired signal
        let jam = rx.on_arrival(999_999, arrival(2, false, rbs, 1e-6, vec![]));
        let out = rx.on_departure(1_000_000, wanted).unwrap();
        rx.on_departure(1_000_000, jam);
        // The first evaluation saw a clean channel: 1e-10 / 1e-12 = 20 dB
        assert!(out.is_ok());
        assert!(out.sinr_db[0] < 0.0);
    }

    #[test]
    fn test_overlapping_signals_see_interference_only_while_present() {
        let mut rx = receiver();
        let survival = |rx: &SignalReceiver, h: u64| rx.signals.get(h).map(|s| s.survival[0]).unwrap();
        let sinr = |rx: &SignalReceiver, h: u64| rx.signals.get(h).map(|s| s.sinr_db[0]).unwrap();

        let first = rx.on_arrival(0, arrival(1, true, RbBitmap::from_range(0, 10), 1e-10, vec![10]));
        let second = rx.on_arrival(250_000, arrival(3, true, RbBitmap::from_range(10, 10), 1e-10, vec![10]));

        // Both desired signals are brought up to date on the clean channel
        // before the jammer's power lands in the table
        let jam = rx.on_arrival(500_000, arrival(2, false, RbBitmap::from_range(0, 20), 1e-8, vec![]));
        for h in [first, second] {
            assert!((sinr(&rx, h) - 20.0).abs() < 1e-9);
            assert!(survival(&rx, h) > 1.0 - 1e-9);
        }
        assert_eq!(rx.interference().raw(0), 1e-8);

        // 100 us under the jammer: a tenth of the block is lost
        rx.on_departure(600_000, jam);
        for h in [first, second] {
            assert!(sinr(&rx, h) < -19.9);
            assert!((survival(&rx, h) - 0.9).abs() < 1e-6);
        }
        assert_eq!(rx.interference().raw(0), 0.0);

        let out = rx.on_departure(1_000_000, first).unwrap();
        assert!((out.sinr_db[0] - 20.0).abs() < 1e-9);
        assert!((survival(&rx, second) - 0.9).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "without a matching arrival")]
    fn test_departure_without_arrival_panics() {
        let mut rx = receiver();
        rx.on_departure(0, 42);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut rx = receiver();
        rx.on_arrival(0, arrival(2, false, RbBitmap::from_range(0, 5), 1.0, vec![]));
        rx.clear();
        assert_eq!(rx.in_flight(), 0);
        assert_eq!(rx.interference().raw(0), 0.0);
    }
}
