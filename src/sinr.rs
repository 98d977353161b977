//! Link-quality estimation
//!
//! Per-transport-block SINR from a fading matrix, the link geometry
//! (inverse pathloss, linear), per-RB transmit power, thermal noise and the
//! receiver's interference table. Every RB in the allocation is evaluated
//! separately and the linear per-RB values are averaged.
//!
//! Transmission schemes:
//! - single antenna: maximum-ratio combining over the receive antennas
//! - transmit diversity (SFBC): power split over two transmit antennas,
//!   both columns of the channel combine coherently
//! - open-loop spatial multiplexing: two layers through a fixed precoder,
//!   linear MMSE receiver, one SINR per layer

use num_complex::Complex64;
use std::f64::consts::FRAC_1_SQRT_2;

use crate::channel::ChannelMatrix;
use crate::interference::{InterferenceSource, InterferenceTable};
use crate::types::{RbBitmap, TxScheme};

/// One SINR per transport block, linear
pub type SinrVector = Vec<f64>;

#[derive(Debug, Clone, Copy)]
pub struct LinkQualityEstimator {
    noise_mw_per_rb: f64,
    source: InterferenceSource,
}

impl LinkQualityEstimator {
    pub fn new(noise_mw_per_rb: f64, source: InterferenceSource) -> Self {
        assert!(noise_mw_per_rb > 0.0, "thermal noise must be positive");
        Self {
            noise_mw_per_rb,
            source,
        }
    }

    pub fn noise_mw_per_rb(&self) -> f64 {
        self.noise_mw_per_rb
    }

    pub fn source(&self) -> InterferenceSource {
        self.source
    }

    /// Noise plus interference on one RB
    #[inline]
    fn impairment(&self, interference: &InterferenceTable, rb: usize) -> f64 {
        self.noise_mw_per_rb + interference.get(rb, self.source)
    }

    /// SINR per transport block, averaged over the used RBs.
    ///
    /// `channel` is the fading-only matrix (rx x tx), `geometry` the linear
    /// inverse pathloss and `tx_power_mw_per_rb` the total transmit power
    /// on each RB before it is split over antennas or layers.
    ///
    /// Panics when the allocation is empty or the matrix shape does not fit
    /// the scheme.
    pub fn estimate(
        &self,
        scheme: TxScheme,
        channel: &ChannelMatrix,
        geometry: f64,
        tx_power_mw_per_rb: f64,
        allocation: &RbBitmap,
        interference: &InterferenceTable,
    ) -> SinrVector {
        let num_used = allocation.count();
        assert!(num_used > 0, "division by zero: allocation uses no RB");

        let num_tb = scheme.num_transport_blocks();
        let mut sum = vec![0.0; num_tb];

        match scheme {
            TxScheme::SingleAntenna => {
                let gain = geometry * channel.column_norm_sqr(0);
                for rb in allocation.iter() {
                    sum[0] += tx_power_mw_per_rb * gain / self.impairment(interference, rb);
                }
            }
            TxScheme::Diversity => {
                assert!(channel.cols() >= 2, "transmit diversity needs two transmit antennas");
                let per_antenna = tx_power_mw_per_rb / 2.0;
                let gain = geometry * (channel.column_norm_sqr(0) + channel.column_norm_sqr(1));
                for rb in allocation.iter() {
                    sum[0] += per_antenna * gain / self.impairment(interference, rb);
                }
            }
            TxScheme::OpenLoopSpatialMultiplexing => {
                assert!(
                    channel.rows() == 2 && channel.cols() == 2,
                    "spatial multiplexing needs a 2x2 channel, got {}x{}",
                    channel.rows(),
                    channel.cols()
                );
                let effective = &channel.scale(geometry.sqrt()) * &precoder();
                let layer_power = tx_power_mw_per_rb / 2.0;
                for rb in allocation.iter() {
                    let sigma2 = self.impairment(interference, rb) / layer_power;
                    let layers = mmse_layer_sinr(&effective, sigma2);
                    for (acc, v) in sum.iter_mut().zip(layers) {
                        *acc += v;
                    }
                }
            }
        }

        sum.into_iter().map(|s| s / num_used as f64).collect()
    }

    /// Uplink SINR seen by a multi-antenna receiver from a single-antenna
    /// transmitter, using per-receive-antenna pathloss only.
    pub fn estimate_uplink(
        &self,
        tx_power_mw_per_rb: f64,
        pathloss_linear: &[f64],
        allocation: &RbBitmap,
        interference: &InterferenceTable,
    ) -> f64 {
        let num_used = allocation.count();
        assert!(num_used > 0, "division by zero: allocation uses no RB");

        let mut sum = 0.0;
        for rb in allocation.iter() {
            let denom = self.impairment(interference, rb);
            for pl in pathloss_linear {
                sum += tx_power_mw_per_rb / pl / denom;
            }
        }
        sum / num_used as f64
    }
}

/// Fixed two-layer precoder, unit total power per column
fn precoder() -> ChannelMatrix {
    let a = Complex64::new(FRAC_1_SQRT_2, 0.0);
    ChannelMatrix::from_vec(2, 2, vec![a, a, a, -a])
}

/// Per-layer post-MMSE SINR for effective channel `h` and normalized noise
/// variance `sigma2` (impairment over per-layer power).
fn mmse_layer_sinr(h: &ChannelMatrix, sigma2: f64) -> [f64; 2] {
    let hh = h.conj_transpose();
    let r = ChannelMatrix::diagonal(&[sigma2, sigma2]);
    let gram = &(&hh * h) + &r;
    let Some(inv) = gram.inverse() else {
        return [0.0, 0.0];
    };
    let w = &inv * &hh;
    let g = &w * h;

    let mut out = [0.0; 2];
    for (k, slot) in out.iter_mut().enumerate() {
        let desired = g.get(k, k).norm_sqr();
        let cross: f64 = (0..2).filter(|&j| j != k).map(|j| g.get(k, j).norm_sqr()).sum();
        let noise = sigma2 * w.row_norm_sqr(k);
        let denom = cross + noise;
        *slot = if denom > 0.0 { desired / denom } else { 0.0 };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: f64 = 1e-12;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn quiet(num_rb: usize) -> InterferenceTable {
        InterferenceTable::new(num_rb, 4.0, false)
    }

    #[test]
    fn test_receive_diversity_doubles_sinr() {
        let est = LinkQualityEstimator::new(N, InterferenceSource::Raw);
        let h = ChannelMatrix::from_vec(2, 1, vec![c(1.0, 0.0), c(0.0, 1.0)]);
        let p = 1e-9;
        let sinr = est.estimate(
            TxScheme::SingleAntenna,
            &h,
            1.0,
            p,
            &RbBitmap::from_range(0, 10),
            &quiet(25),
        );
        assert_eq!(sinr.len(), 1);
        assert!((sinr[0] - 2.0 * p / N).abs() / (2.0 * p / N) < 1e-12);
    }

    #[test]
    fn test_interference_lowers_sinr() {
        let est = LinkQualityEstimator::new(N, InterferenceSource::Raw);
        let h = ChannelMatrix::from_vec(1, 1, vec![c(1.0, 0.0)]);
        let mut table = quiet(4);
        table.add(&RbBitmap::from_range(0, 2), N);
        let alloc = RbBitmap::from_range(0, 4);
        let sinr = est.estimate(TxScheme::SingleAntenna, &h, 1.0, N, &alloc, &table);
        // two RBs at 0.5, two at 1.0
        assert!((sinr[0] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_filtered_source_ignores_unsnapshotted_changes() {
        let est = LinkQualityEstimator::new(N, InterferenceSource::Filtered);
        let h = ChannelMatrix::from_vec(1, 1, vec![c(1.0, 0.0)]);
        let mut table = quiet(1);
        table.snapshot_filter();
        table.add(&RbBitmap::from_range(0, 1), 9.0 * N);
        let sinr = est.estimate(TxScheme::SingleAntenna, &h, 1.0, N, &RbBitmap::from_range(0, 1), &table);
        assert!((sinr[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_geometry_scales_linearly() {
        let est = LinkQualityEstimator::new(N, InterferenceSource::Raw);
        let h = ChannelMatrix::from_vec(1, 1, vec![c(1.0, 0.0)]);
        let alloc = RbBitmap::from_range(0, 1);
        let a = est.estimate(TxScheme::SingleAntenna, &h, 1e-6, 1.0, &alloc, &quiet(1))[0];
        let b = est.estimate(TxScheme::SingleAntenna, &h, 1e-7, 1.0, &alloc, &quiet(1))[0];
        assert!((a / b - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_diversity_splits_power() {
        let est = LinkQualityEstimator::new(N, InterferenceSource::Raw);
        let h = ChannelMatrix::from_vec(1, 2, vec![c(1.0, 0.0), c(1.0, 0.0)]);
        let p = 4e-12;
        let sinr = est.estimate(TxScheme::Diversity, &h, 1.0, p, &RbBitmap::from_range(0, 3), &quiet(3));
        // (p/2) * (1 + 1) / N
        assert!((sinr[0] - p / N).abs() < 1e-9);
    }

    #[test]
    fn test_spatial_multiplexing_orthogonal_channel() {
        let est = LinkQualityEstimator::new(N, InterferenceSource::Raw);
        // H = F^H makes the effective channel the identity
        let a = FRAC_1_SQRT_2;
        let h = ChannelMatrix::from_vec(2, 2, vec![c(a, 0.0), c(a, 0.0), c(a, 0.0), c(-a, 0.0)]);
        let p = 2e-10;
        let sinr = est.estimate(
            TxScheme::OpenLoopSpatialMultiplexing,
            &h,
            1.0,
            p,
            &RbBitmap::from_range(0, 5),
            &quiet(5),
        );
        assert_eq!(sinr.len(), 2);
        // no inter-layer leakage: MMSE collapses to matched filter, SINR = (p/2)/N
        let expected = (p / 2.0) / N;
        for s in sinr {
            assert!((s - expected).abs() / expected < 1e-9, "{} vs {}", s, expected);
        }
    }

    #[test]
    fn test_spatial_multiplexing_rank_deficient_channel() {
        let est = LinkQualityEstimator::new(N, InterferenceSource::Raw);
        let h = ChannelMatrix::from_vec(2, 2, vec![c(1.0, 0.0); 4]);
        let sinr = est.estimate(
            TxScheme::OpenLoopSpatialMultiplexing,
            &h,
            1.0,
            1e-9,
            &RbBitmap::from_range(0, 1),
            &quiet(1),
        );
        // Every column of H*F equals (sqrt2, sqrt2) or zero: one layer is lost
        assert!(sinr[1] < 1e-6);
        assert!(sinr[0] > 100.0);
    }

    #[test]
    #[should_panic(expected = "division by zero")]
    fn test_empty_allocation_panics() {
        let est = LinkQualityEstimator::new(N, InterferenceSource::Raw);
        let h = ChannelMatrix::from_vec(1, 1, vec![c(1.0, 0.0)]);
        est.estimate(TxScheme::SingleAntenna, &h, 1.0, 1.0, &RbBitmap::empty(), &quiet(1));
    }

    #[test]
    #[should_panic(expected = "needs a 2x2 channel")]
    fn test_spatial_multiplexing_shape_checked() {
        let est = LinkQualityEstimator::new(N, InterferenceSource::Raw);
        let h = ChannelMatrix::from_vec(1, 2, vec![c(1.0, 0.0); 2]);
        est.estimate(
            TxScheme::OpenLoopSpatialMultiplexing,
            &h,
            1.0,
            1.0,
            &RbBitmap::from_range(0, 1),
            &quiet(1),
        );
    }

    #[test]
    fn test_uplink_sums_receive_antennas() {
        let est = LinkQualityEstimator::new(N, InterferenceSource::Raw);
        let sinr = est.estimate_uplink(1e-3, &[1e8, 1e8], &RbBitmap::from_range(0, 4), &quiet(4));
        assert!((sinr - 2.0 * 1e-11 / N).abs() < 1e-9);
    }
}
