//! Command-line interface for the backtester.

use crate::analytics::{BenchmarkComparison, PerformanceMetrics, ResultFormatter};
use crate::comparison::compare_schemes;
use crate::config::{BacktestConfig, BacktestFileConfig, RebalanceFrequency};
use crate::data::{load_benchmark_series, load_price_panel};
use crate::engine::BacktestEngine;
use crate::error::Result;
use crate::signals::MeanVarianceSignal;
use crate::turnover::average_turnover;
use crate::weighting::{scheme_weight_fn, WeightingScheme};

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Fundex - a walk-forward backtester for fundamental-index strategies.
#[derive(Parser)]
#[command(name = "fundex")]
#[command(version)]
#[command(about = "Walk-forward backtesting with constrained mean-variance weighting")]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one weighting scheme and print its metrics
    Run {
        /// Path to the wide-format price CSV (Date,TICK1,TICK2,...)
        #[arg(short, long)]
        prices: PathBuf,

        /// Optional TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Weighting scheme
        #[arg(short = 'S', long, value_enum, default_value = "mean-variance")]
        scheme: SchemeArg,

        /// Optional two-column benchmark CSV (Date,Value)
        #[arg(short, long)]
        benchmark: Option<PathBuf>,

        /// Per-asset weight cap
        #[arg(long, default_value = "0.1")]
        max_weight: f64,

        /// Per-sector aggregate cap
        #[arg(long, default_value = "0.25")]
        sector_cap: f64,

        /// Mean-variance risk aversion
        #[arg(long, default_value = "0.1")]
        risk_aversion: f64,

        /// Minimum trailing observations per rebalance
        #[arg(long, default_value = "21")]
        lookback: usize,

        /// Maximum forward observations per rebalance period
        #[arg(long, default_value = "30")]
        horizon: usize,

        /// Rebalance cadence
        #[arg(short, long, value_enum, default_value = "monthly")]
        frequency: FrequencyArg,

        /// Evaluate rebalance periods on the thread pool
        #[arg(long)]
        parallel: bool,

        /// Date format in the CSVs (chrono syntax)
        #[arg(long)]
        date_format: Option<String>,

        /// Emit metrics as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run all weighting schemes and print a comparison table
    Compare {
        /// Path to the wide-format price CSV
        #[arg(short, long)]
        prices: PathBuf,

        /// Optional two-column benchmark CSV (Date,Value)
        #[arg(short, long)]
        benchmark: Option<PathBuf>,

        /// Per-asset weight cap
        #[arg(long, default_value = "0.1")]
        max_weight: f64,

        /// Rebalance cadence
        #[arg(short, long, value_enum, default_value = "monthly")]
        frequency: FrequencyArg,

        /// Date format in the CSVs (chrono syntax)
        #[arg(long)]
        date_format: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SchemeArg {
    EqualWeight,
    ScoreBased,
    MeanVariance,
}

impl From<SchemeArg> for WeightingScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::EqualWeight => WeightingScheme::EqualWeight,
            SchemeArg::ScoreBased => WeightingScheme::ScoreBased,
            SchemeArg::MeanVariance => WeightingScheme::MeanVariance,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FrequencyArg {
    Weekly,
    Monthly,
    Quarterly,
}

impl From<FrequencyArg> for RebalanceFrequency {
    fn from(arg: FrequencyArg) -> Self {
        match arg {
            FrequencyArg::Weekly => RebalanceFrequency::Weekly,
            FrequencyArg::Monthly => RebalanceFrequency::Monthly,
            FrequencyArg::Quarterly => RebalanceFrequency::Quarterly,
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Parse arguments and dispatch.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            prices,
            config,
            scheme,
            benchmark,
            max_weight,
            sector_cap,
            risk_aversion,
            lookback,
            horizon,
            frequency,
            parallel,
            date_format,
            json,
        } => {
            let backtest_config = match config {
                Some(path) => BacktestFileConfig::from_file(path)?.backtest,
                None => BacktestConfig {
                    max_weight,
                    sector_cap,
                    risk_aversion,
                    lookback_min: lookback,
                    forward_horizon: horizon,
                    frequency: frequency.into(),
                    parallel,
                    show_progress: !json,
                    ..Default::default()
                },
            };
            backtest_config.validate()?;

            let panel = load_price_panel(&prices, date_format.as_deref())?;
            let benchmark_series = benchmark
                .map(|path| load_benchmark_series(path, date_format.as_deref()))
                .transpose()?;

            let scheme: WeightingScheme = scheme.into();
            let engine = BacktestEngine::new(backtest_config);
            let signals = MeanVarianceSignal::new();
            let weight_fn = scheme_weight_fn(scheme, &engine);
            let run = engine.run(&panel, &signals, weight_fn)?;

            let metrics = PerformanceMetrics::from_returns(&run.returns);
            let turnover = average_turnover(&run.weights).ok();
            let benchmark_comparison = benchmark_series.as_ref().and_then(|levels| {
                BenchmarkComparison::calculate("benchmark", &run.returns.index_levels(), levels)
            });

            info!(
                rebalances = run.weights.len(),
                observations = run.returns.len(),
                "run finished"
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else {
                ResultFormatter::print_report(
                    scheme.label(),
                    &metrics,
                    turnover,
                    benchmark_comparison.as_ref(),
                );
            }
        }

        Commands::Compare {
            prices,
            benchmark,
            max_weight,
            frequency,
            date_format,
        } => {
            let config = BacktestConfig {
                max_weight,
                frequency: frequency.into(),
                ..Default::default()
            };
            config.validate()?;

            let panel = load_price_panel(&prices, date_format.as_deref())?;
            let benchmark_series = benchmark
                .map(|path| load_benchmark_series(path, date_format.as_deref()))
                .transpose()?;

            let engine = BacktestEngine::new(config);
            let signals = MeanVarianceSignal::new();
            let schemes = [
                WeightingScheme::EqualWeight,
                WeightingScheme::ScoreBased,
                WeightingScheme::MeanVariance,
            ];
            let result = compare_schemes(
                &engine,
                &panel,
                &signals,
                &schemes,
                benchmark_series
                    .as_ref()
                    .map(|levels| ("benchmark", levels.as_slice())),
            )?;
            println!("{}", result.summary_table());
        }
    }

    Ok(())
}
