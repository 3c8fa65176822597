//! Backtest configuration, including TOML file support for reproducible runs.

use crate::error::{BacktestError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Calendar cadence at which target weights are recomputed.
///
/// A rebalance candidate is the first trading date observed in each period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceFrequency {
    Weekly,
    #[default]
    Monthly,
    Quarterly,
}

impl RebalanceFrequency {
    /// Period key for a date; two dates share a key iff they fall in the same
    /// rebalance period.
    pub fn period_key(&self, date: NaiveDate) -> (i32, u32) {
        match self {
            RebalanceFrequency::Weekly => {
                let week = date.iso_week();
                (week.year(), week.week())
            }
            RebalanceFrequency::Monthly => (date.year(), date.month()),
            RebalanceFrequency::Quarterly => (date.year(), (date.month0()) / 3),
        }
    }
}

fn default_max_weight() -> f64 {
    0.1
}
fn default_sector_cap() -> f64 {
    0.25
}
fn default_risk_aversion() -> f64 {
    0.1
}
fn default_lookback_min() -> usize {
    21
}
fn default_forward_horizon() -> usize {
    30
}
fn default_min_forward_obs() -> usize {
    5
}

/// Configuration for a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Per-asset weight cap, in (0, 1].
    #[serde(default = "default_max_weight")]
    pub max_weight: f64,
    /// Per-sector aggregate weight cap, in (0, 1].
    #[serde(default = "default_sector_cap")]
    pub sector_cap: f64,
    /// Mean-variance trade-off scalar, >= 0.
    #[serde(default = "default_risk_aversion")]
    pub risk_aversion: f64,
    /// Minimum trailing observations required to rebalance.
    #[serde(default = "default_lookback_min")]
    pub lookback_min: usize,
    /// Maximum forward observations attributed to one rebalance period.
    #[serde(default = "default_forward_horizon")]
    pub forward_horizon: usize,
    /// Minimum forward observations for a period to contribute returns.
    #[serde(default = "default_min_forward_obs")]
    pub min_forward_obs: usize,
    /// Rebalance cadence.
    #[serde(default)]
    pub frequency: RebalanceFrequency,
    /// Evaluate period bodies on the rayon pool (date order is restored at merge).
    #[serde(default)]
    pub parallel: bool,
    /// Show a progress bar during the run.
    #[serde(default)]
    pub show_progress: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            max_weight: default_max_weight(),
            sector_cap: default_sector_cap(),
            risk_aversion: default_risk_aversion(),
            lookback_min: default_lookback_min(),
            forward_horizon: default_forward_horizon(),
            min_forward_obs: default_min_forward_obs(),
            frequency: RebalanceFrequency::Monthly,
            parallel: false,
            show_progress: false,
        }
    }
}

impl BacktestConfig {
    /// Validate the universe-independent parameter ranges.
    ///
    /// Universe-dependent feasibility (`max_weight * n >= 1`) is checked by the
    /// optimizer once the active ticker set is known.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_weight > 0.0 && self.max_weight <= 1.0) {
            return Err(BacktestError::ConfigError(format!(
                "max_weight must be in (0, 1], got {}",
                self.max_weight
            )));
        }
        if !(self.sector_cap > 0.0 && self.sector_cap <= 1.0) {
            return Err(BacktestError::ConfigError(format!(
                "sector_cap must be in (0, 1], got {}",
                self.sector_cap
            )));
        }
        if self.risk_aversion < 0.0 || !self.risk_aversion.is_finite() {
            return Err(BacktestError::ConfigError(format!(
                "risk_aversion must be >= 0, got {}",
                self.risk_aversion
            )));
        }
        if self.lookback_min < 21 {
            return Err(BacktestError::ConfigError(format!(
                "lookback_min must be at least 21 observations, got {}",
                self.lookback_min
            )));
        }
        if self.forward_horizon == 0 || self.forward_horizon > 30 {
            return Err(BacktestError::ConfigError(format!(
                "forward_horizon must be in 1..=30, got {}",
                self.forward_horizon
            )));
        }
        if self.min_forward_obs == 0 {
            return Err(BacktestError::ConfigError(
                "min_forward_obs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete run configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestFileConfig {
    /// Engine settings.
    #[serde(default)]
    pub backtest: BacktestConfig,
    /// Data settings.
    #[serde(default)]
    pub data: DataSettings,
    /// Weighting-scheme settings.
    #[serde(default)]
    pub strategy: StrategySettings,
}

/// Data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Path to the wide-format price CSV.
    pub prices: Option<String>,
    /// Path to an optional two-column benchmark CSV.
    pub benchmark: Option<String>,
    /// Date format in the CSV (chrono syntax); `%Y-%m-%d` when omitted.
    pub date_format: Option<String>,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            prices: None,
            benchmark: None,
            date_format: None,
        }
    }
}

fn default_scheme() -> String {
    "mean-variance".to_string()
}

/// Weighting-scheme settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySettings {
    /// Scheme name: equal-weight, score-based, market-cap, free-float, mean-variance.
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
        }
    }
}

impl BacktestFileConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)?;
        let config: BacktestFileConfig = toml::from_str(&contents)?;
        config.backtest.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn monthly_period_keys() {
        let f = RebalanceFrequency::Monthly;
        assert_eq!(f.period_key(d(2024, 1, 2)), f.period_key(d(2024, 1, 31)));
        assert_ne!(f.period_key(d(2024, 1, 31)), f.period_key(d(2024, 2, 1)));
    }

    #[test]
    fn quarterly_period_keys() {
        let f = RebalanceFrequency::Quarterly;
        assert_eq!(f.period_key(d(2024, 1, 2)), f.period_key(d(2024, 3, 29)));
        assert_ne!(f.period_key(d(2024, 3, 29)), f.period_key(d(2024, 4, 1)));
    }

    #[test]
    fn weekly_period_keys_split_on_iso_week() {
        let f = RebalanceFrequency::Weekly;
        // 2024-01-05 is a Friday, 2024-01-08 the following Monday.
        assert_ne!(f.period_key(d(2024, 1, 5)), f.period_key(d(2024, 1, 8)));
    }

    #[test]
    fn default_config_is_valid() {
        BacktestConfig::default().validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let mut config = BacktestConfig::default();
        config.max_weight = 0.0;
        assert!(config.validate().is_err());

        let mut config = BacktestConfig::default();
        config.sector_cap = 1.5;
        assert!(config.validate().is_err());

        let mut config = BacktestConfig::default();
        config.lookback_min = 5;
        assert!(config.validate().is_err());

        let mut config = BacktestConfig::default();
        config.forward_horizon = 31;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_roundtrip_with_defaults() {
        let toml_src = r#"
            [backtest]
            max_weight = 0.2
            frequency = "quarterly"

            [strategy]
            scheme = "equal-weight"
        "#;
        let config: BacktestFileConfig = toml::from_str(toml_src).unwrap();
        assert!((config.backtest.max_weight - 0.2).abs() < 1e-12);
        assert_eq!(config.backtest.frequency, RebalanceFrequency::Quarterly);
        assert_eq!(config.backtest.lookback_min, 21);
        assert_eq!(config.strategy.scheme, "equal-weight");
    }
}
