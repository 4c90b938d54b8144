use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;

use atsc_core::adapter::test_support::SimVehicleWorld;
use atsc_core::adapter::FaultTolerantAdapter;
use atsc_core::memory::ExperienceMemory;
use atsc_core::metrics::RoadMetrics;
use atsc_core::predictor::{CongestionLevel, Prediction, QueueTrend};
use atsc_core::types::Approach;
use atsc_core::{Config, DecisionController};

fn metrics_fixture() -> HashMap<Approach, RoadMetrics> {
    Approach::ALL
        .into_iter()
        .enumerate()
        .map(|(i, a)| {
            (
                a,
                RoadMetrics {
                    waiting_count: (i as u32) * 5,
                    avg_wait_time: i as f64 * 3.0,
                    cleared_last_interval: 1,
                    arrival_rate_vpm: 20.0,
                    departure_rate_vpm: 15.0,
                    time_since_last_green: (i as u64) * 10,
                    congestion_percent: (i as f64) * 20.0,
                    eta_clear_seconds: i as f64 * 2.0,
                },
            )
        })
        .collect()
}

fn predictions_fixture() -> HashMap<Approach, Prediction> {
    Approach::ALL
        .into_iter()
        .map(|a| {
            (
                a,
                Prediction {
                    queue_trend: QueueTrend::Stable,
                    arrivals_10s: 3.0,
                    arrivals_30s: 10.0,
                    heavy_traffic_probability: 40.0,
                    congestion_level: CongestionLevel::Medium,
                    predicted_eta_clear_seconds: 5.0,
                },
            )
        })
        .collect()
}

fn bench_decide(c: &mut Criterion) {
    let metrics = metrics_fixture();
    let predictions = predictions_fixture();
    let memory = ExperienceMemory::new();

    c.bench_function("decide_fallback_path", |b| {
        let mut adapter = FaultTolerantAdapter::new(SimVehicleWorld::new());
        let mut controller = DecisionController::new(&Config::default());
        b.iter(|| {
            let decision = controller.decide(
                black_box(1),
                &mut adapter,
                black_box(&metrics),
                black_box(&predictions),
                black_box(&memory),
            );
            black_box(decision);
        });
    });
}

criterion_group!(benches, bench_decide);
criterion_main!(benches);
