//! Performance benchmarks for the backtest engine.
//!
//! Run with: cargo bench

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fundex::config::BacktestConfig;
use fundex::engine::BacktestEngine;
use fundex::optimizer::WeightOptimizer;
use fundex::signals::MeanVarianceSignal;
use fundex::types::PricePanel;
use nalgebra::DMatrix;

/// Generate a synthetic daily panel for benchmarking.
fn generate_panel(days: usize, tickers: usize) -> PricePanel {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let dates: Vec<NaiveDate> = (0..days).map(|i| start + Duration::days(i as i64)).collect();
    let rows: Vec<Vec<f64>> = (0..days)
        .map(|i| {
            let t = i as f64;
            (0..tickers)
                .map(|k| {
                    let wobble = ((t * 0.7 + k as f64).sin() + (t * 1.3).cos()) * 0.4;
                    (100.0 + t * 0.05 * (k + 1) as f64 + wobble).max(1.0)
                })
                .collect()
        })
        .collect();
    PricePanel::new(
        dates,
        (0..tickers).map(|k| format!("T{}", k)).collect(),
        rows,
    )
    .unwrap()
}

fn bench_walk_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("walk_forward");
    for days in [252, 756] {
        let panel = generate_panel(days, 8);
        let engine = BacktestEngine::new(BacktestConfig {
            max_weight: 0.4,
            ..Default::default()
        });
        group.bench_with_input(BenchmarkId::new("mean_variance", days), &panel, |b, panel| {
            b.iter(|| {
                let weight_fn = engine.mean_variance_weight_fn();
                let run = engine
                    .run(black_box(panel), &MeanVarianceSignal::new(), weight_fn)
                    .unwrap();
                black_box(run.returns.len())
            })
        });
    }
    group.finish();
}

fn bench_optimizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimizer");
    for n in [5, 20, 50] {
        let tickers: Vec<String> = (0..n).map(|i| format!("T{}", i)).collect();
        let scores: Vec<f64> = (0..n).map(|i| 0.01 + i as f64 * 1e-4).collect();
        let risk = DMatrix::identity(n, n) * 0.04;
        let optimizer = WeightOptimizer::new(0.1, 2.0 / n as f64);
        group.bench_with_input(BenchmarkId::new("projected_gradient", n), &n, |b, _| {
            b.iter(|| {
                let w = optimizer
                    .optimize(
                        black_box(&tickers),
                        black_box(&scores),
                        black_box(&risk),
                        None,
                    )
                    .unwrap();
                black_box(w.len())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_walk_forward, bench_optimizer);
criterion_main!(benches);
