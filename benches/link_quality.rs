//! Link-quality benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lte_rrm::channel::{ChannelModel, LinkEnd};
use lte_rrm::config::FadingConfig;
use lte_rrm::interference::{InterferenceSource, InterferenceTable};
use lte_rrm::sinr::LinkQualityEstimator;
use lte_rrm::types::{RbBitmap, StationId, TxScheme, TTI_NS};

fn benchmark_olsm_estimate(c: &mut Criterion) {
    let fading = FadingConfig {
        max_doppler_hz: 5.0,
        table_len: 4096,
        sample_rate_hz: 1000.0,
    };
    let model = ChannelModel::new(7, 0, Some(&fading));
    let tx = LinkEnd::new(StationId::new(1, 0), 2);
    let rx = LinkEnd::new(StationId::new(2, 0), 2);
    let estimator = LinkQualityEstimator::new(1e-12, InterferenceSource::Raw);
    let mut table = InterferenceTable::new(100, 4.0, false);
    table.add(&RbBitmap::from_range(0, 50), 1e-12);
    let band = RbBitmap::from_range(0, 100);
    let mut now = 0;

    c.bench_function("olsm_sinr_100rb", |b| {
        b.iter(|| {
            now += TTI_NS;
            let h = model.fading_matrix(tx, rx, now);
            black_box(estimator.estimate(TxScheme::OpenLoopSpatialMultiplexing, &h, 1e-10, 2e-1, &band, &table))
        })
    });
}

fn benchmark_fading_matrix(c: &mut Criterion) {
    let fading = FadingConfig {
        max_doppler_hz: 70.0,
        table_len: 8192,
        sample_rate_hz: 1000.0,
    };
    let model = ChannelModel::new(3, 1, Some(&fading));
    let tx = LinkEnd::new(StationId::new(1, 0), 2);
    let rx = LinkEnd::new(StationId::new(9, 1), 2);

    c.bench_function("fading_matrix_2x2", |b| {
        b.iter(|| black_box(model.fading_matrix(tx, rx, black_box(123_000_000))))
    });
}

criterion_group!(benches, benchmark_olsm_estimate, benchmark_fading_matrix);
criterion_main!(benches);
