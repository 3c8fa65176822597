//! Walk-forward rebalancing engine.
//!
//! For each candidate rebalance date (the first trading date of every
//! `frequency` period) the engine builds the trailing window, asks the signal
//! collaborator for period inputs, invokes the weight function, and evaluates
//! realized portfolio returns over a non-overlapping forward window. Data
//! shortfalls and optimizer failures skip the period; only an entirely empty
//! result is fatal.

use crate::config::BacktestConfig;
use crate::error::{BacktestError, Result};
use crate::optimizer::WeightOptimizer;
use crate::signals::{PeriodInputs, SignalSource};
use crate::types::{PortfolioReturnSeries, PricePanel, WeightHistory, WeightVector};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Why a candidate rebalance date produced no weight or no return contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Trailing window shorter than `lookback_min`.
    InsufficientHistory { available: usize, required: usize },
    /// Signal collaborator could not derive period inputs.
    SignalFailed(String),
    /// Weight function failed (typically an infeasible or failed optimization).
    OptimizerFailed(String),
}

/// Outcome of one candidate rebalance date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeriodStatus {
    /// Weight recorded and `forward_obs` realized returns contributed.
    Rebalanced { forward_obs: usize },
    /// Weight recorded, but the forward window was shorter than
    /// `min_forward_obs` so no returns were contributed.
    WeightOnly { forward_obs: usize },
    /// Period skipped wholesale.
    Skipped(SkipReason),
}

/// Per-period record of what the engine decided and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodOutcome {
    pub date: NaiveDate,
    pub status: PeriodStatus,
}

/// Output of a completed backtest run.
#[derive(Debug, Clone, Default)]
pub struct BacktestRun {
    /// Chronological concatenation of per-period realized portfolio returns.
    pub returns: PortfolioReturnSeries,
    /// Weight vectors in rebalance order.
    pub weights: WeightHistory,
    /// One entry per candidate rebalance date, in date order.
    pub outcomes: Vec<PeriodOutcome>,
}

struct PeriodRecord {
    date: NaiveDate,
    status: PeriodStatus,
    weights: Option<WeightVector>,
    contributions: Vec<(NaiveDate, f64)>,
}

/// The walk-forward backtest engine.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(BacktestConfig::default())
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Weight function backed by the mean-variance optimizer configured from
    /// this engine's constraints.
    pub fn mean_variance_weight_fn(&self) -> impl Fn(&PeriodInputs) -> Result<WeightVector> + Sync {
        let optimizer = WeightOptimizer::new(self.config.risk_aversion, self.config.max_weight)
            .with_sector_cap(self.config.sector_cap);
        move |inputs: &PeriodInputs| {
            optimizer.optimize(
                &inputs.tickers,
                &inputs.scores,
                &inputs.risk_matrix,
                inputs.sectors.as_ref(),
            )
        }
    }

    /// Run the walk-forward loop over `prices`.
    ///
    /// `weight_fn` receives the period inputs derived by `signals` and must
    /// return a weight vector satisfying the configured constraints; any error
    /// it returns skips that period. Fails with
    /// [`BacktestError::EmptyResult`] when no period contributes returns.
    pub fn run<F>(
        &self,
        prices: &PricePanel,
        signals: &dyn SignalSource,
        weight_fn: F,
    ) -> Result<BacktestRun>
    where
        F: Fn(&PeriodInputs) -> Result<WeightVector> + Sync,
    {
        self.config.validate()?;
        if prices.is_empty() {
            return Err(BacktestError::DataError("empty price panel".to_string()));
        }

        let candidates = self.candidate_indices(prices);
        // A candidate is *chosen* when it passes the lookback gate; forward
        // windows are truncated at the next chosen date regardless of whether
        // its own optimization later succeeds, so period bodies stay
        // independent of each other.
        let chosen: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&idx| idx + 1 >= self.config.lookback_min)
            .collect();

        info!(
            dates = prices.len(),
            tickers = prices.tickers().len(),
            candidates = candidates.len(),
            chosen = chosen.len(),
            signal = signals.name(),
            "running walk-forward backtest"
        );

        let progress = if self.config.show_progress {
            let bar = ProgressBar::new(chosen.len() as u64);
            if let Ok(style) =
                ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len}")
            {
                bar.set_style(style.progress_chars("#>-"));
            }
            Some(bar)
        } else {
            None
        };

        let body = |k: usize| -> PeriodRecord {
            let record = self.evaluate_period(prices, signals, &weight_fn, &chosen, k);
            if let Some(bar) = &progress {
                bar.inc(1);
            }
            record
        };

        let records: Vec<PeriodRecord> = if self.config.parallel {
            (0..chosen.len()).into_par_iter().map(body).collect()
        } else {
            (0..chosen.len()).map(body).collect()
        };
        if let Some(bar) = progress {
            bar.finish_and_clear();
        }

        // Ordered merge: candidate outcomes, weight history, and the return
        // series are all assembled in date order, not completion order.
        let mut run = BacktestRun::default();
        let mut record_iter = records.into_iter();
        for &idx in &candidates {
            let date = prices.dates()[idx];
            if idx + 1 < self.config.lookback_min {
                debug!(%date, available = idx + 1, "skipping rebalance: insufficient history");
                run.outcomes.push(PeriodOutcome {
                    date,
                    status: PeriodStatus::Skipped(SkipReason::InsufficientHistory {
                        available: idx + 1,
                        required: self.config.lookback_min,
                    }),
                });
                continue;
            }
            let record = record_iter
                .next()
                .expect("one record per chosen rebalance date");
            if let Some(weights) = record.weights {
                run.weights.push(record.date, weights);
            }
            run.returns.extend(record.contributions);
            run.outcomes.push(PeriodOutcome {
                date: record.date,
                status: record.status,
            });
        }

        if run.returns.is_empty() {
            return Err(BacktestError::EmptyResult(
                "no rebalance period produced forward returns".to_string(),
            ));
        }
        info!(
            rebalances = run.weights.len(),
            observations = run.returns.len(),
            "backtest complete"
        );
        Ok(run)
    }

    /// Indices of the first trading date in each `frequency` period.
    fn candidate_indices(&self, prices: &PricePanel) -> Vec<usize> {
        let mut candidates = Vec::new();
        let mut last_key = None;
        for (idx, date) in prices.dates().iter().enumerate() {
            let key = self.config.frequency.period_key(*date);
            if last_key != Some(key) {
                candidates.push(idx);
                last_key = Some(key);
            }
        }
        candidates
    }

    fn evaluate_period<F>(
        &self,
        prices: &PricePanel,
        signals: &dyn SignalSource,
        weight_fn: &F,
        chosen: &[usize],
        k: usize,
    ) -> PeriodRecord
    where
        F: Fn(&PeriodInputs) -> Result<WeightVector> + Sync,
    {
        let idx = chosen[k];
        let date = prices.dates()[idx];

        let window = prices.window_through(idx);
        let inputs = match signals.period_inputs(&window) {
            Ok(inputs) => inputs,
            Err(err) => {
                warn!(%date, error = %err, "skipping rebalance: signal failure");
                return PeriodRecord {
                    date,
                    status: PeriodStatus::Skipped(SkipReason::SignalFailed(err.to_string())),
                    weights: None,
                    contributions: Vec::new(),
                };
            }
        };

        let weights = match weight_fn(&inputs) {
            Ok(weights) => weights,
            Err(err) => {
                warn!(%date, error = %err, "skipping rebalance: optimization failure");
                return PeriodRecord {
                    date,
                    status: PeriodStatus::Skipped(SkipReason::OptimizerFailed(err.to_string())),
                    weights: None,
                    contributions: Vec::new(),
                };
            }
        };

        // Forward window: price dates strictly after the rebalance date, at
        // most `forward_horizon` of them, and never past the next chosen
        // rebalance date (each trading day accrues to the most recent
        // rebalance).
        let last_idx = prices.len() - 1;
        let bound = (idx + self.config.forward_horizon)
            .min(chosen.get(k + 1).copied().unwrap_or(usize::MAX))
            .min(last_idx);
        let available = bound.saturating_sub(idx);

        if available < self.config.min_forward_obs {
            debug!(
                %date,
                available,
                required = self.config.min_forward_obs,
                "weight recorded but forward window too short to contribute"
            );
            return PeriodRecord {
                date,
                status: PeriodStatus::WeightOnly {
                    forward_obs: available,
                },
                weights: Some(weights),
                contributions: Vec::new(),
            };
        }

        let contributions = self.forward_returns(prices, &weights, idx, bound);
        PeriodRecord {
            date,
            status: PeriodStatus::Rebalanced {
                forward_obs: contributions.len(),
            },
            weights: Some(weights),
            contributions,
        }
    }

    /// Realized portfolio returns for price dates `idx+1 ..= bound` under
    /// `weights`, dropping entries left undefined by ticker misalignment.
    fn forward_returns(
        &self,
        prices: &PricePanel,
        weights: &WeightVector,
        idx: usize,
        bound: usize,
    ) -> Vec<(NaiveDate, f64)> {
        let columns: Vec<(usize, f64)> = weights
            .iter()
            .filter_map(|(ticker, w)| match prices.ticker_index(ticker) {
                Some(col) => Some((col, *w)),
                None => {
                    warn!(ticker = %ticker, "weighted ticker missing from panel; period returns undefined");
                    None
                }
            })
            .collect();
        if columns.len() != weights.len() {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(bound - idx);
        for j in idx + 1..=bound {
            let prev = prices.row(j - 1);
            let cur = prices.row(j);
            let ret: f64 = columns
                .iter()
                .map(|&(col, w)| w * (cur[col] / prev[col] - 1.0))
                .sum();
            if ret.is_finite() {
                out.push((prices.dates()[j], ret));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::MeanVarianceSignal;
    use crate::types::WeightVector;
    use chrono::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Daily panel: asset A rises linearly, asset B stays flat.
    fn trending_panel(days: usize) -> PricePanel {
        let dates: Vec<NaiveDate> = (0..days)
            .map(|i| d(2024, 1, 1) + Duration::days(i as i64))
            .collect();
        let rows: Vec<Vec<f64>> = (0..days)
            .map(|i| vec![100.0 + i as f64, 50.0])
            .collect();
        PricePanel::new(dates, vec!["UP".to_string(), "FLAT".to_string()], rows).unwrap()
    }

    fn equal_weight_fn(inputs: &PeriodInputs) -> Result<WeightVector> {
        let w = 1.0 / inputs.tickers.len() as f64;
        Ok(WeightVector::from_pairs(
            inputs.tickers.iter().map(|t| (t.clone(), w)),
        ))
    }

    fn test_config() -> BacktestConfig {
        BacktestConfig {
            max_weight: 0.6,
            show_progress: false,
            ..Default::default()
        }
    }

    #[test]
    fn forty_day_two_asset_scenario() {
        // 40 daily observations, monthly rebalance, lookback 21: only the
        // February 1st candidate has enough trailing history.
        let engine = BacktestEngine::new(test_config());
        let panel = trending_panel(40);
        let run = engine
            .run(&panel, &MeanVarianceSignal::new(), equal_weight_fn)
            .unwrap();

        assert_eq!(run.weights.len(), 1);
        assert_eq!(run.weights.last().unwrap().0, d(2024, 2, 1));
        assert!(!run.returns.is_empty());

        let metrics = crate::analytics::PerformanceMetrics::from_returns(&run.returns);
        assert!(metrics.max_drawdown <= 0.0);
    }

    #[test]
    fn insufficient_history_skips_first_candidate() {
        let engine = BacktestEngine::new(test_config());
        let panel = trending_panel(40);
        let run = engine
            .run(&panel, &MeanVarianceSignal::new(), equal_weight_fn)
            .unwrap();

        assert_eq!(run.outcomes.len(), 2);
        assert!(matches!(
            run.outcomes[0].status,
            PeriodStatus::Skipped(SkipReason::InsufficientHistory {
                available: 1,
                required: 21
            })
        ));
        assert!(matches!(
            run.outcomes[1].status,
            PeriodStatus::Rebalanced { .. }
        ));
    }

    #[test]
    fn forward_windows_do_not_overlap() {
        // 90 days from Jan 1: chosen rebalances on Feb 1 (idx 31) and Mar 1
        // (idx 60). February's window must stop at Mar 1; March's starts
        // strictly after it.
        let engine = BacktestEngine::new(test_config());
        let panel = trending_panel(90);
        let run = engine
            .run(&panel, &MeanVarianceSignal::new(), equal_weight_fn)
            .unwrap();

        assert_eq!(run.weights.len(), 2);
        let dates: Vec<NaiveDate> = run.returns.dates().collect();
        let unique: std::collections::BTreeSet<NaiveDate> = dates.iter().copied().collect();
        assert_eq!(unique.len(), dates.len(), "each day attributed once");
        assert!(dates.windows(2).all(|w| w[0] < w[1]), "series is chronological");
        // Feb 1 contributes Feb 2 ..= Mar 1 (29 obs, cut by the next chosen
        // date); Mar 1 contributes Mar 2 ..= Mar 30 (29 obs, cut by the end
        // of data).
        assert_eq!(dates.first().copied(), Some(d(2024, 2, 2)));
        assert_eq!(run.returns.len(), 29 + 29);
    }

    #[test]
    fn optimizer_failure_skips_period_not_run() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let engine = BacktestEngine::new(test_config());
        let panel = trending_panel(90);
        let calls = AtomicUsize::new(0);
        let weight_fn = |inputs: &PeriodInputs| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BacktestError::Infeasible {
                    assets: inputs.tickers.len(),
                    max_weight: 0.1,
                    sector_cap: None,
                    detail: "forced failure".to_string(),
                })
            } else {
                equal_weight_fn(inputs)
            }
        };
        let run = engine
            .run(&panel, &MeanVarianceSignal::new(), weight_fn)
            .unwrap();

        // February is skipped with an inspectable reason; March still runs.
        assert_eq!(run.weights.len(), 1);
        assert_eq!(run.weights.last().unwrap().0, d(2024, 3, 1));
        assert!(matches!(
            run.outcomes[1].status,
            PeriodStatus::Skipped(SkipReason::OptimizerFailed(_))
        ));
        assert_eq!(run.returns.dates().next(), Some(d(2024, 3, 2)));
    }

    #[test]
    fn short_forward_window_keeps_weight_but_not_returns() {
        // 95 days: Apr 1 (idx 91) is chosen but only 3 forward days remain.
        let engine = BacktestEngine::new(test_config());
        let panel = trending_panel(95);
        let run = engine
            .run(&panel, &MeanVarianceSignal::new(), equal_weight_fn)
            .unwrap();

        assert_eq!(run.weights.len(), 3);
        let last = run.outcomes.last().unwrap();
        assert_eq!(last.date, d(2024, 4, 1));
        assert!(matches!(
            last.status,
            PeriodStatus::WeightOnly { forward_obs: 3 }
        ));
        // No return entry postdates the truncated April window's start.
        assert!(run.returns.dates().all(|date| date <= d(2024, 4, 1)));
    }

    #[test]
    fn empty_result_is_fatal() {
        // 25 days, all in January: the only monthly candidate is Jan 1,
        // which fails the lookback gate, so nothing contributes.
        let engine = BacktestEngine::new(test_config());
        let panel = trending_panel(25);
        let err = engine
            .run(&panel, &MeanVarianceSignal::new(), equal_weight_fn)
            .unwrap_err();
        assert!(matches!(err, BacktestError::EmptyResult(_)));
    }

    #[test]
    fn parallel_run_matches_sequential() {
        let mut config = test_config();
        let panel = trending_panel(120);
        let sequential = BacktestEngine::new(config.clone())
            .run(&panel, &MeanVarianceSignal::new(), equal_weight_fn)
            .unwrap();
        config.parallel = true;
        let parallel = BacktestEngine::new(config)
            .run(&panel, &MeanVarianceSignal::new(), equal_weight_fn)
            .unwrap();

        assert_eq!(sequential.returns, parallel.returns);
        assert_eq!(sequential.weights, parallel.weights);
        assert_eq!(sequential.outcomes, parallel.outcomes);
    }

    #[test]
    fn misaligned_tickers_drop_contributions() {
        let engine = BacktestEngine::new(test_config());
        let panel = trending_panel(60);
        let weight_fn = |_inputs: &PeriodInputs| {
            Ok(WeightVector::from_pairs([("GHOST", 1.0)]))
        };
        let err = engine
            .run(&panel, &MeanVarianceSignal::new(), weight_fn)
            .unwrap_err();
        // Weights recorded but every contribution dropped -> empty result.
        assert!(matches!(err, BacktestError::EmptyResult(_)));
    }

    #[test]
    fn mean_variance_weight_fn_respects_caps() {
        let engine = BacktestEngine::new(test_config());
        let panel = trending_panel(60);
        let weight_fn = engine.mean_variance_weight_fn();
        let run = engine
            .run(&panel, &MeanVarianceSignal::new(), weight_fn)
            .unwrap();
        for (_, weights) in run.weights.iter() {
            assert!((weights.sum() - 1.0).abs() < 1e-6);
            for (_, w) in weights.iter() {
                assert!(*w >= -1e-9 && *w <= 0.6 + 1e-9);
            }
        }
    }
}
