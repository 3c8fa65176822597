//! Performance analytics and reporting.

use crate::types::PortfolioReturnSeries;
use chrono::NaiveDate;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};

/// Trading periods per year used for annualization.
pub const PERIODS_PER_YEAR: f64 = 252.0;

/// Reporting precision, in decimal places.
const REPORT_DECIMALS: i32 = 4;

fn round_report(x: f64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let scale = 10f64.powi(REPORT_DECIMALS);
    (x * scale).round() / scale
}

/// Standard portfolio statistics over a finalized realized-return series.
///
/// Computed once, rounded to 4 decimal places for reporting stability, and
/// immutable thereafter. `sharpe_ratio` is NaN when volatility is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Compound annual growth rate.
    pub cagr: f64,
    /// Annualized standard deviation of periodic returns.
    pub volatility: f64,
    /// CAGR / volatility; NaN sentinel when volatility is zero.
    pub sharpe_ratio: f64,
    /// Largest peak-to-trough decline of the cumulative return curve (<= 0).
    pub max_drawdown: f64,
}

impl PerformanceMetrics {
    /// Calculate all four statistics from a return series.
    ///
    /// Returns are assumed to be in trading-period units (252 periods/year).
    /// An empty series yields NaN across the board.
    pub fn from_returns(series: &PortfolioReturnSeries) -> Self {
        let returns: Vec<f64> = series.values().collect();
        if returns.is_empty() {
            return Self {
                cagr: f64::NAN,
                volatility: f64::NAN,
                sharpe_ratio: f64::NAN,
                max_drawdown: f64::NAN,
            };
        }

        let n = returns.len() as f64;
        let terminal: f64 = returns.iter().fold(1.0, |acc, r| acc * (1.0 + r));
        let cagr = terminal.powf(PERIODS_PER_YEAR / n) - 1.0;

        let mean = returns.iter().sum::<f64>() / n;
        let volatility = if returns.len() > 1 {
            let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
            var.sqrt() * PERIODS_PER_YEAR.sqrt()
        } else {
            0.0
        };

        let sharpe_ratio = if volatility > 0.0 {
            cagr / volatility
        } else {
            f64::NAN
        };

        let mut cumulative = 1.0;
        let mut peak = f64::MIN;
        let mut max_drawdown = 0.0_f64;
        for r in &returns {
            cumulative *= 1.0 + r;
            peak = peak.max(cumulative);
            max_drawdown = max_drawdown.min(cumulative / peak - 1.0);
        }

        Self {
            cagr: round_report(cagr),
            volatility: round_report(volatility),
            sharpe_ratio: round_report(sharpe_ratio),
            max_drawdown: round_report(max_drawdown),
        }
    }
}

/// Comparison of a portfolio index series against an external benchmark series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkComparison {
    /// Benchmark name.
    pub benchmark_name: String,
    /// Pearson correlation of the date-aligned index levels.
    pub correlation: f64,
    /// Root-mean-square gap between the aligned levels.
    pub tracking_error: f64,
    /// Number of dates both series cover.
    pub aligned_points: usize,
}

impl BenchmarkComparison {
    /// Inner-join the two level series on date and compute comparison stats.
    ///
    /// Returns `None` when fewer than two dates overlap.
    pub fn calculate(
        benchmark_name: impl Into<String>,
        portfolio_levels: &[(NaiveDate, f64)],
        benchmark_levels: &[(NaiveDate, f64)],
    ) -> Option<Self> {
        let mut aligned: Vec<(f64, f64)> = Vec::new();
        let mut bi = 0;
        for (date, level) in portfolio_levels {
            while bi < benchmark_levels.len() && benchmark_levels[bi].0 < *date {
                bi += 1;
            }
            if bi < benchmark_levels.len() && benchmark_levels[bi].0 == *date {
                aligned.push((*level, benchmark_levels[bi].1));
            }
        }
        if aligned.len() < 2 {
            return None;
        }

        let n = aligned.len() as f64;
        let mean_p = aligned.iter().map(|(p, _)| p).sum::<f64>() / n;
        let mean_b = aligned.iter().map(|(_, b)| b).sum::<f64>() / n;
        let mut cov = 0.0;
        let mut var_p = 0.0;
        let mut var_b = 0.0;
        let mut sq_gap = 0.0;
        for (p, b) in &aligned {
            cov += (p - mean_p) * (b - mean_b);
            var_p += (p - mean_p).powi(2);
            var_b += (b - mean_b).powi(2);
            sq_gap += (p - b).powi(2);
        }
        let correlation = if var_p > 0.0 && var_b > 0.0 {
            cov / (var_p.sqrt() * var_b.sqrt())
        } else {
            f64::NAN
        };

        Some(Self {
            benchmark_name: benchmark_name.into(),
            correlation: round_report(correlation),
            tracking_error: round_report((sq_gap / n).sqrt()),
            aligned_points: aligned.len(),
        })
    }
}

/// Formats metrics for terminal output.
pub struct ResultFormatter;

impl ResultFormatter {
    fn format_value(value: f64, as_pct: bool) -> String {
        if !value.is_finite() {
            return "n/a".to_string();
        }
        if as_pct {
            format!("{:.2}%", value * 100.0)
        } else {
            format!("{:.4}", value)
        }
    }

    /// Render one strategy's metrics as a two-column table.
    pub fn metrics_table(metrics: &PerformanceMetrics, turnover: Option<f64>) -> String {
        let mut builder = Builder::new();
        builder.push_record(["Metric".to_string(), "Value".to_string()]);
        builder.push_record(["CAGR".to_string(), Self::format_value(metrics.cagr, true)]);
        builder.push_record([
            "Volatility".to_string(),
            Self::format_value(metrics.volatility, true),
        ]);
        builder.push_record([
            "Sharpe Ratio".to_string(),
            Self::format_value(metrics.sharpe_ratio, false),
        ]);
        builder.push_record([
            "Max Drawdown".to_string(),
            Self::format_value(metrics.max_drawdown, true),
        ]);
        if let Some(turnover) = turnover {
            builder.push_record([
                "Avg Turnover".to_string(),
                Self::format_value(turnover, false),
            ]);
        }
        builder.build().with(Style::rounded()).to_string()
    }

    /// Print a full report for one run.
    pub fn print_report(
        name: &str,
        metrics: &PerformanceMetrics,
        turnover: Option<f64>,
        benchmark: Option<&BenchmarkComparison>,
    ) {
        println!();
        println!("{}", "═".repeat(48).blue());
        println!("{}", format!(" {} ", name).bold().blue());
        println!("{}", "═".repeat(48).blue());
        println!("{}", Self::metrics_table(metrics, turnover));
        if let Some(benchmark) = benchmark {
            println!();
            println!(
                "{}",
                format!("vs {}", benchmark.benchmark_name).bold().underline()
            );
            println!(
                "  Correlation:     {:>10}",
                Self::format_value(benchmark.correlation, false)
            );
            println!(
                "  Tracking Error:  {:>10}",
                Self::format_value(benchmark.tracking_error, false)
            );
            println!("  Aligned Dates:   {:>10}", benchmark.aligned_points);
        }
    }
}
