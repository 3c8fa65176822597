//! Per-period input collaborators for the rebalance loop.
//!
//! The engine never computes scores or sector assignments itself; a
//! [`SignalSource`] derives them deterministically from the trailing price
//! window. Sign and scale of the scores are opaque to the engine and the
//! optimizer treats them as linear objective coefficients.

use crate::error::{BacktestError, Result};
use crate::types::{PricePanel, SectorMatrix};
use nalgebra::DMatrix;
use std::collections::BTreeMap;

/// Inputs for one rebalance decision, derived from the trailing window's
/// latest cross-section.
#[derive(Debug, Clone)]
pub struct PeriodInputs {
    /// Active universe, in panel column order.
    pub tickers: Vec<String>,
    /// Expected-return scores, one per ticker.
    pub scores: Vec<f64>,
    /// Risk (covariance or exposure) matrix over the universe.
    pub risk_matrix: DMatrix<f64>,
    /// Sector classification, when the source provides one.
    pub sectors: Option<SectorMatrix>,
}

/// Derives period inputs from a trailing price window.
pub trait SignalSource: Send + Sync {
    fn name(&self) -> &str;

    fn period_inputs(&self, window: &PricePanel) -> Result<PeriodInputs>;
}

/// Assigns a sector to each ticker in a universe.
pub trait SectorClassifier: Send + Sync {
    fn classify(&self, tickers: &[String]) -> Result<SectorMatrix>;
}

/// Classifier backed by a fixed ticker → sector table.
#[derive(Debug, Clone, Default)]
pub struct StaticSectorMap {
    assignments: BTreeMap<String, String>,
}

impl StaticSectorMap {
    pub fn new(assignments: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            assignments: assignments.into_iter().collect(),
        }
    }
}

impl SectorClassifier for StaticSectorMap {
    fn classify(&self, tickers: &[String]) -> Result<SectorMatrix> {
        let pairs: Vec<(String, String)> = tickers
            .iter()
            .map(|t| {
                self.assignments
                    .get(t)
                    .map(|s| (t.clone(), s.clone()))
                    .ok_or_else(|| {
                        BacktestError::SignalError(format!("no sector assignment for {}", t))
                    })
            })
            .collect::<Result<_>>()?;
        SectorMatrix::from_assignments(&pairs)
    }
}

/// Mean-variance inputs: scores are trailing mean daily returns, the risk
/// matrix is the sample covariance of the same window.
pub struct MeanVarianceSignal {
    classifier: Option<Box<dyn SectorClassifier>>,
}

impl MeanVarianceSignal {
    pub fn new() -> Self {
        Self { classifier: None }
    }

    /// Attach a sector classifier so period inputs carry a sector matrix.
    pub fn with_classifier(mut self, classifier: Box<dyn SectorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }
}

impl Default for MeanVarianceSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSource for MeanVarianceSignal {
    fn name(&self) -> &str {
        "mean-variance"
    }

    fn period_inputs(&self, window: &PricePanel) -> Result<PeriodInputs> {
        let returns = window.returns();
        if returns.is_empty() {
            return Err(BacktestError::SignalError(
                "trailing window too short to derive returns".to_string(),
            ));
        }
        let tickers = window.tickers().to_vec();
        let sectors = match &self.classifier {
            Some(classifier) => Some(classifier.classify(&tickers)?),
            None => None,
        };
        Ok(PeriodInputs {
            scores: returns.mean_returns(),
            risk_matrix: returns.covariance(),
            tickers,
            sectors,
        })
    }
}
