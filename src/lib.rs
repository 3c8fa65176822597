//! Fundex - a walk-forward backtester for rules-based index portfolios.
//!
//! # Overview
//!
//! Fundex simulates a periodically rebalanced portfolio over historical
//! closing prices: at each rebalance date it derives target weights under
//! risk and exposure constraints, measures forward realized performance, and
//! aggregates the results into standard portfolio statistics.
//!
//! - **Walk-forward engine**: calendar-cadence rebalances, trailing-window
//!   sufficiency checks, non-overlapping forward-return attribution, and
//!   inspectable per-period skip reasons
//! - **Constrained optimizer**: mean-variance objective over the capped
//!   simplex with per-sector caps, behind a swappable solver trait
//! - **Analytics**: CAGR, annualized volatility, Sharpe, max drawdown, and
//!   benchmark correlation/tracking error
//! - **Turnover**: average per-rebalance absolute weight change
//! - **Weighting schemes**: equal, score-based, market-cap, free-float, and
//!   optimizer-backed, comparable side by side
//!
//! # Quick Start
//!
//! ```no_run
//! use fundex::config::BacktestConfig;
//! use fundex::data::load_price_panel;
//! use fundex::engine::BacktestEngine;
//! use fundex::signals::MeanVarianceSignal;
//! use fundex::analytics::PerformanceMetrics;
//!
//! let panel = load_price_panel("data/prices.csv", None).unwrap();
//! let engine = BacktestEngine::new(BacktestConfig::default());
//! let weight_fn = engine.mean_variance_weight_fn();
//!
//! let run = engine
//!     .run(&panel, &MeanVarianceSignal::new(), weight_fn)
//!     .unwrap();
//!
//! let metrics = PerformanceMetrics::from_returns(&run.returns);
//! println!("CAGR: {:.2}%", metrics.cagr * 100.0);
//! println!("Sharpe: {:.2}", metrics.sharpe_ratio);
//! ```
//!
//! # Modules
//!
//! - [`types`]: price/return panels, weight vectors, run outputs
//! - [`config`]: run configuration and TOML file support
//! - [`engine`]: the walk-forward rebalance loop
//! - [`optimizer`]: constrained mean-variance weight optimization
//! - [`signals`]: deterministic per-period input collaborators
//! - [`weighting`]: rules-based weighting schemes
//! - [`analytics`]: performance metrics and benchmark comparison
//! - [`turnover`]: turnover statistics
//! - [`comparison`]: side-by-side scheme evaluation
//! - [`data`]: CSV ingestion

pub mod analytics;
pub mod cli;
pub mod comparison;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod optimizer;
pub mod signals;
pub mod turnover;
pub mod types;
pub mod weighting;

// Re-exports for convenience
pub use analytics::{BenchmarkComparison, PerformanceMetrics, ResultFormatter};
pub use comparison::{compare_schemes, ComparisonResult, SchemeResult};
pub use config::{BacktestConfig, BacktestFileConfig, RebalanceFrequency};
pub use engine::{BacktestEngine, BacktestRun, PeriodOutcome, PeriodStatus, SkipReason};
pub use error::{BacktestError, Result};
pub use optimizer::{
    precondition_risk_matrix, ProjectedGradientSolver, QuadraticProgram, QuadraticProgramSolver,
    WeightOptimizer,
};
pub use signals::{MeanVarianceSignal, PeriodInputs, SectorClassifier, SignalSource, StaticSectorMap};
pub use turnover::average_turnover;
pub use types::{
    PortfolioReturnSeries, PricePanel, ReturnPanel, SectorMatrix, WeightHistory, WeightVector,
};
pub use weighting::{
    equal_weight, free_float_weight, market_cap_weight, scheme_weight_fn, score_weight,
    WeightingScheme,
};
