//! Turnover statistics over a recorded weight history.

use crate::error::{BacktestError, Result};
use crate::types::WeightHistory;
use std::collections::BTreeSet;

/// Average per-rebalance sum of absolute weight changes.
///
/// For each consecutive pair of rebalance dates the change is summed over the
/// union of tickers held at either date (absent entries count as zero); the
/// per-pair sums are then averaged. Fewer than two recorded vectors is an
/// error, never a silent zero.
pub fn average_turnover(history: &WeightHistory) -> Result<f64> {
    if history.len() < 2 {
        return Err(BacktestError::InsufficientTurnoverHistory {
            periods: history.len(),
        });
    }

    let entries: Vec<_> = history.iter().collect();
    let mut total = 0.0;
    for pair in entries.windows(2) {
        let prev = &pair[0].1;
        let next = &pair[1].1;
        let tickers: BTreeSet<&String> = prev
            .iter()
            .map(|(t, _)| t)
            .chain(next.iter().map(|(t, _)| t))
            .collect();
        total += tickers
            .iter()
            .map(|t| {
                (next.get(t.as_str()).unwrap_or(0.0) - prev.get(t.as_str()).unwrap_or(0.0)).abs()
            })
            .sum::<f64>();
    }
    Ok(total / (entries.len() - 1) as f64)
}
