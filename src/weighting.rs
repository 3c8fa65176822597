//! Rules-based weighting schemes.
//!
//! Alternatives to the optimizer for deriving target weights: equal weight,
//! score-proportional, market-cap, and free-float market-cap. Every scheme
//! normalizes to a unit sum and guards against a zero-mass universe.

use crate::error::{BacktestError, Result};
use crate::signals::PeriodInputs;
use crate::types::WeightVector;
use serde::{Deserialize, Serialize};

/// Named weighting scheme, for configuration and CLI selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeightingScheme {
    EqualWeight,
    ScoreBased,
    MeanVariance,
}

impl WeightingScheme {
    pub fn label(&self) -> &'static str {
        match self {
            WeightingScheme::EqualWeight => "Equal Weight",
            WeightingScheme::ScoreBased => "Score Based",
            WeightingScheme::MeanVariance => "Mean-Variance Optimized",
        }
    }
}

fn normalized(tickers: &[String], raw: &[f64]) -> Result<WeightVector> {
    if tickers.len() != raw.len() {
        return Err(BacktestError::DataError(format!(
            "{} tickers but {} raw weights",
            tickers.len(),
            raw.len()
        )));
    }
    if raw.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(BacktestError::DataError(
            "raw weights must be finite and non-negative".to_string(),
        ));
    }
    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        return Err(BacktestError::DataError(
            "raw weights sum to zero; cannot normalize".to_string(),
        ));
    }
    Ok(WeightVector::from_pairs(
        tickers.iter().cloned().zip(raw.iter().map(|w| w / total)),
    ))
}

/// `1/n` across the universe.
pub fn equal_weight(tickers: &[String]) -> Result<WeightVector> {
    normalized(tickers, &vec![1.0; tickers.len()])
}

/// Weights proportional to non-negative scores.
pub fn score_weight(tickers: &[String], scores: &[f64]) -> Result<WeightVector> {
    normalized(tickers, scores)
}

/// Weights proportional to market capitalization.
pub fn market_cap_weight(tickers: &[String], market_caps: &[f64]) -> Result<WeightVector> {
    normalized(tickers, market_caps)
}

/// Weights proportional to free-float-adjusted market capitalization.
pub fn free_float_weight(
    tickers: &[String],
    market_caps: &[f64],
    float_factors: &[f64],
) -> Result<WeightVector> {
    if market_caps.len() != float_factors.len() {
        return Err(BacktestError::DataError(format!(
            "{} market caps but {} float factors",
            market_caps.len(),
            float_factors.len()
        )));
    }
    let adjusted: Vec<f64> = market_caps
        .iter()
        .zip(float_factors.iter())
        .map(|(cap, ff)| cap * ff)
        .collect();
    normalized(tickers, &adjusted)
}

/// Weight function for a scheme, suitable for [`crate::engine::BacktestEngine::run`].
///
/// Score-based weighting shifts scores so the smallest becomes zero when any
/// are negative (the linear objective sign is opaque, but proportional
/// weights need non-negative mass).
pub fn scheme_weight_fn(
    scheme: WeightingScheme,
    engine: &crate::engine::BacktestEngine,
) -> Box<dyn Fn(&PeriodInputs) -> Result<WeightVector> + Sync + '_> {
    match scheme {
        WeightingScheme::EqualWeight => Box::new(|inputs| equal_weight(&inputs.tickers)),
        WeightingScheme::ScoreBased => Box::new(|inputs| {
            let floor = inputs.scores.iter().copied().fold(f64::INFINITY, f64::min);
            let shifted: Vec<f64> = if floor < 0.0 {
                inputs.scores.iter().map(|s| s - floor).collect()
            } else {
                inputs.scores.clone()
            };
            score_weight(&inputs.tickers, &shifted)
        }),
        WeightingScheme::MeanVariance => {
            let weight_fn = engine.mean_variance_weight_fn();
            Box::new(move |inputs| weight_fn(inputs))
        }
    }
}
