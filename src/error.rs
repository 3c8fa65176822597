//! Error types for the backtest engine.

use thiserror::Error;

/// Main error type for the backtest engine.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error(
        "Optimization infeasible for {assets} assets (max_weight {max_weight}, sector_cap {sector_cap:?}): {detail}"
    )]
    Infeasible {
        /// Number of assets in the universe that could not be weighted.
        assets: usize,
        /// Per-asset cap in force when the program failed.
        max_weight: f64,
        /// Per-sector cap, if a sector matrix was supplied.
        sector_cap: Option<f64>,
        /// What went wrong (constraint-set contradiction or solver failure).
        detail: String,
    },

    #[error("Backtest produced no portfolio returns: {0}")]
    EmptyResult(String),

    #[error("Turnover requires at least two weight vectors, got {periods}")]
    InsufficientTurnoverHistory { periods: usize },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for backtest operations.
pub type Result<T> = std::result::Result<T, BacktestError>;
