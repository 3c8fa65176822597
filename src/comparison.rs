//! Side-by-side evaluation of weighting schemes on one universe.
//!
//! Runs each scheme through the same walk-forward engine and compares the
//! resulting index series against an optional external benchmark.

use crate::analytics::{BenchmarkComparison, PerformanceMetrics};
use crate::engine::BacktestEngine;
use crate::error::{BacktestError, Result};
use crate::signals::SignalSource;
use crate::turnover::average_turnover;
use crate::types::PricePanel;
use crate::weighting::{scheme_weight_fn, WeightingScheme};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};
use tracing::{debug, warn};

/// Results for one weighting scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemeResult {
    pub scheme: WeightingScheme,
    pub metrics: PerformanceMetrics,
    /// Average turnover; `None` with fewer than two rebalances.
    pub turnover: Option<f64>,
    /// Comparison against the external benchmark, when one was supplied and
    /// the series overlap.
    pub benchmark: Option<BenchmarkComparison>,
    /// Cumulative index level per return date, base 1.0.
    pub index_levels: Vec<(NaiveDate, f64)>,
    /// Number of recorded rebalances.
    pub rebalances: usize,
}

/// Aggregate comparison across schemes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub results: Vec<SchemeResult>,
}

impl ComparisonResult {
    /// Render all schemes as one table.
    pub fn summary_table(&self) -> String {
        let fmt = |x: f64| {
            if x.is_finite() {
                format!("{:.4}", x)
            } else {
                "n/a".to_string()
            }
        };
        let mut builder = Builder::new();
        builder.push_record([
            "Scheme",
            "CAGR",
            "Volatility",
            "Sharpe",
            "Max DD",
            "Turnover",
            "Benchmark Corr",
            "Tracking Err",
        ]);
        for r in &self.results {
            builder.push_record([
                r.scheme.label().to_string(),
                fmt(r.metrics.cagr),
                fmt(r.metrics.volatility),
                fmt(r.metrics.sharpe_ratio),
                fmt(r.metrics.max_drawdown),
                r.turnover.map(fmt).unwrap_or_else(|| "n/a".to_string()),
                r.benchmark
                    .as_ref()
                    .map(|b| fmt(b.correlation))
                    .unwrap_or_else(|| "n/a".to_string()),
                r.benchmark
                    .as_ref()
                    .map(|b| fmt(b.tracking_error))
                    .unwrap_or_else(|| "n/a".to_string()),
            ]);
        }
        builder.build().with(Style::rounded()).to_string()
    }
}

/// Run every scheme over the same panel and collect comparable results.
///
/// Schemes whose runs fail terminally are reported and dropped; the call
/// fails only when every scheme fails.
pub fn compare_schemes(
    engine: &BacktestEngine,
    prices: &PricePanel,
    signals: &dyn SignalSource,
    schemes: &[WeightingScheme],
    benchmark: Option<(&str, &[(NaiveDate, f64)])>,
) -> Result<ComparisonResult> {
    let mut results = Vec::with_capacity(schemes.len());
    for &scheme in schemes {
        let weight_fn = scheme_weight_fn(scheme, engine);
        let run = match engine.run(prices, signals, weight_fn) {
            Ok(run) => run,
            Err(err) => {
                warn!(scheme = scheme.label(), error = %err, "scheme failed; dropped from comparison");
                continue;
            }
        };

        let metrics = PerformanceMetrics::from_returns(&run.returns);
        let turnover = match average_turnover(&run.weights) {
            Ok(turnover) => Some(turnover),
            Err(err) => {
                debug!(scheme = scheme.label(), error = %err, "turnover unavailable");
                None
            }
        };
        let index_levels = run.returns.index_levels();
        let benchmark_comparison = benchmark
            .and_then(|(name, levels)| BenchmarkComparison::calculate(name, &index_levels, levels));

        results.push(SchemeResult {
            scheme,
            metrics,
            turnover,
            benchmark: benchmark_comparison,
            index_levels,
            rebalances: run.weights.len(),
        });
    }

    if results.is_empty() {
        return Err(BacktestError::EmptyResult(
            "every weighting scheme failed".to_string(),
        ));
    }
    Ok(ComparisonResult { results })
}
