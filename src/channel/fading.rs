//! Rayleigh fading table
//!
//! One table of unit-power complex fading samples is generated per element
//! from the global seed. Every antenna pair of every link reads the same
//! table from its own starting offset, so two elements that share a global
//! seed see identical fading on a link without exchanging any state.
//!
//! Samples come from a Gaussian-weighted sum of sinusoids:
//!
//!   h(t) = (1/√(2N)) Σ A_n · exp(j(2π f_n t + φ_n))
//!
//! with A_n complex Gaussian, f_n = f_d·cos(α_n) for a uniform angle of
//! arrival α_n and uniform phase φ_n. I/Q are Gaussian, the envelope is
//! Rayleigh and the spectrum follows Jakes.

use num_complex::Complex64;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::f64::consts::PI;

use crate::config::FadingConfig;
use crate::types::{SimTime, StationId, NANOS_PER_SEC};
use crate::utils::mix64;

const NUM_SINUSOIDS: usize = 64;

/// Domain separator so table generation and offset draws never share a stream
const TABLE_SEED_SALT: u64 = 0x6661_6469_6e67_5f74;

#[derive(Debug, Clone)]
pub struct FadingTable {
    samples: Vec<Complex64>,
    sample_rate_hz: f64,
}

impl FadingTable {
    pub fn generate(config: &FadingConfig, global_seed: u64) -> Self {
        assert!(config.table_len > 0, "fading table length must be > 0");
        assert!(config.sample_rate_hz > 0.0, "fading sample rate must be > 0");

        let mut rng = ChaCha8Rng::seed_from_u64(mix64(global_seed ^ TABLE_SEED_SALT));

        if config.max_doppler_hz == 0.0 {
            return Self {
                samples: vec![Complex64::new(1.0, 0.0); config.table_len],
                sample_rate_hz: config.sample_rate_hz,
            };
        }

        let mut amp = [Complex64::new(0.0, 0.0); NUM_SINUSOIDS];
        let mut freq = [0.0; NUM_SINUSOIDS];
        let mut phase = [0.0; NUM_SINUSOIDS];

        for n in 0..NUM_SINUSOIDS {
            // Box-Muller, a_n, b_n ~ N(0, 1)
            let u1: f64 = rng.gen::<f64>().max(1e-10);
            let u2: f64 = rng.gen();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * PI * u2;
            amp[n] = Complex64::new(r * theta.cos(), r * theta.sin());

            let alpha = rng.gen::<f64>() * 2.0 * PI - PI;
            freq[n] = config.max_doppler_hz * alpha.cos();
            phase[n] = rng.gen::<f64>() * 2.0 * PI;
        }

        // E[|A_n|^2] = 2, so 1/sqrt(2N) gives unit power
        let scale = (1.0 / (2.0 * NUM_SINUSOIDS as f64)).sqrt();
        let dt = 1.0 / config.sample_rate_hz;

        let samples = (0..config.table_len)
            .map(|i| {
                let t = i as f64 * dt;
                let sum: Complex64 = (0..NUM_SINUSOIDS)
                    .map(|n| amp[n] * Complex64::from_polar(1.0, 2.0 * PI * freq[n] * t + phase[n]))
                    .sum();
                sum * scale
            })
            .collect();

        Self {
            samples,
            sample_rate_hz: config.sample_rate_hz,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample seen at `time` by a link starting at `offset`
    pub fn sample(&self, offset: usize, time: SimTime) -> Complex64 {
        let len = self.samples.len();
        assert!(len > 0, "division by zero: empty fading table");
        let ticks = (time as f64 / NANOS_PER_SEC as f64 * self.sample_rate_hz).floor() as u64;
        let idx = ((offset as u64 + ticks) % len as u64) as usize;
        self.samples[idx]
    }
}

/// Starting offset into a fading table of `table_len` samples.
///
/// Pure function of its inputs and symmetric in the link: swapping the two
/// stations together with their antennas yields the same offset. The larger
/// station id goes first and carries its own antenna with it; a station
/// linked to itself orders the antennas larger first.
pub fn fading_offset(
    global_seed: u64,
    station_a: StationId,
    station_b: StationId,
    antenna_a: usize,
    antenna_b: usize,
    channel: u32,
    table_len: usize,
) -> usize {
    assert!(table_len > 0, "division by zero: fading table length is 0");

    let ((hi, hi_ant), (lo, lo_ant)) = if (station_a, antenna_a) >= (station_b, antenna_b) {
        ((station_a, antenna_a), (station_b, antenna_b))
    } else {
        ((station_b, antenna_b), (station_a, antenna_a))
    };

    let mut seed = mix64(global_seed);
    for word in [
        hi.as_u64(),
        lo.as_u64(),
        hi_ant as u64,
        lo_ant as u64,
        channel as u64,
    ] {
        seed = mix64(seed ^ word);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.gen_range(0..table_len)
}
