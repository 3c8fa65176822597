//! Core data types: price/return panels, weight vectors, and run outputs.

use crate::error::{BacktestError, Result};
use chrono::NaiveDate;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dense closing-price table: one row per trading date, one column per ticker.
///
/// Invariants enforced at construction:
/// - dates strictly increasing
/// - every row has one positive, finite price per ticker (no gaps)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePanel {
    dates: Vec<NaiveDate>,
    tickers: Vec<String>,
    /// Row-major: `rows[d][t]` is the close of `tickers[t]` on `dates[d]`.
    rows: Vec<Vec<f64>>,
}

impl PricePanel {
    /// Build a panel, validating the density and ordering invariants.
    pub fn new(dates: Vec<NaiveDate>, tickers: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        if tickers.is_empty() {
            return Err(BacktestError::DataError("panel has no tickers".to_string()));
        }
        if dates.len() != rows.len() {
            return Err(BacktestError::DataError(format!(
                "panel has {} dates but {} rows",
                dates.len(),
                rows.len()
            )));
        }
        for pair in dates.windows(2) {
            if pair[1] <= pair[0] {
                return Err(BacktestError::DataError(format!(
                    "dates not strictly increasing at {}",
                    pair[1]
                )));
            }
        }
        for (d, row) in rows.iter().enumerate() {
            if row.len() != tickers.len() {
                return Err(BacktestError::DataError(format!(
                    "row {} has {} prices for {} tickers",
                    dates[d],
                    row.len(),
                    tickers.len()
                )));
            }
            for (t, px) in row.iter().enumerate() {
                if !px.is_finite() || *px <= 0.0 {
                    return Err(BacktestError::DataError(format!(
                        "non-positive price {} for {} on {}",
                        px, tickers[t], dates[d]
                    )));
                }
            }
        }
        Ok(Self {
            dates,
            tickers,
            rows,
        })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    /// Number of trading dates.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Column index of a ticker, if present.
    pub fn ticker_index(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    /// Price row for a date index.
    pub fn row(&self, idx: usize) -> &[f64] {
        &self.rows[idx]
    }

    /// Sub-panel of all observations up to and including `idx` (the trailing window).
    pub fn window_through(&self, idx: usize) -> PricePanel {
        PricePanel {
            dates: self.dates[..=idx].to_vec(),
            tickers: self.tickers.clone(),
            rows: self.rows[..=idx].to_vec(),
        }
    }

    /// Date-over-date relative changes; one row shorter, first date dropped.
    pub fn returns(&self) -> ReturnPanel {
        let mut rows = Vec::with_capacity(self.rows.len().saturating_sub(1));
        for pair in self.rows.windows(2) {
            let row: Vec<f64> = pair[0]
                .iter()
                .zip(pair[1].iter())
                .map(|(prev, cur)| cur / prev - 1.0)
                .collect();
            rows.push(row);
        }
        ReturnPanel {
            dates: self.dates.iter().skip(1).copied().collect(),
            tickers: self.tickers.clone(),
            rows,
        }
    }
}

/// Per-asset daily returns derived from a [`PricePanel`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnPanel {
    dates: Vec<NaiveDate>,
    tickers: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl ReturnPanel {
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn row(&self, idx: usize) -> &[f64] {
        &self.rows[idx]
    }

    /// Mean daily return per ticker.
    pub fn mean_returns(&self) -> Vec<f64> {
        let n = self.rows.len().max(1) as f64;
        let mut means = vec![0.0; self.tickers.len()];
        for row in &self.rows {
            for (m, r) in means.iter_mut().zip(row.iter()) {
                *m += r;
            }
        }
        for m in &mut means {
            *m /= n;
        }
        means
    }

    /// Sample covariance matrix of the ticker return columns.
    ///
    /// Uses the n-1 denominator; with fewer than two rows the result is all zeros.
    pub fn covariance(&self) -> DMatrix<f64> {
        let k = self.tickers.len();
        let n = self.rows.len();
        let mut cov = DMatrix::zeros(k, k);
        if n < 2 {
            return cov;
        }
        let means = self.mean_returns();
        for row in &self.rows {
            for i in 0..k {
                for j in i..k {
                    let v = (row[i] - means[i]) * (row[j] - means[j]);
                    cov[(i, j)] += v;
                }
            }
        }
        let denom = (n - 1) as f64;
        for i in 0..k {
            for j in i..k {
                cov[(i, j)] /= denom;
                cov[(j, i)] = cov[(i, j)];
            }
        }
        cov
    }
}

/// Ticker → sector binary indicator; exactly one sector flag per ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorMatrix {
    tickers: Vec<String>,
    sectors: Vec<String>,
    /// `membership[t]` is the sector index of `tickers[t]`.
    membership: Vec<usize>,
}

impl SectorMatrix {
    /// Build from a per-ticker sector assignment.
    pub fn from_assignments(assignments: &[(String, String)]) -> Result<Self> {
        if assignments.is_empty() {
            return Err(BacktestError::DataError(
                "sector matrix has no tickers".to_string(),
            ));
        }
        let mut sectors: Vec<String> = Vec::new();
        let mut tickers = Vec::with_capacity(assignments.len());
        let mut membership = Vec::with_capacity(assignments.len());
        for (ticker, sector) in assignments {
            let idx = match sectors.iter().position(|s| s == sector) {
                Some(i) => i,
                None => {
                    sectors.push(sector.clone());
                    sectors.len() - 1
                }
            };
            tickers.push(ticker.clone());
            membership.push(idx);
        }
        Ok(Self {
            tickers,
            sectors,
            membership,
        })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn sectors(&self) -> &[String] {
        &self.sectors
    }

    /// Sector index of the ticker at column `t`.
    pub fn sector_of(&self, t: usize) -> usize {
        self.membership[t]
    }

    /// Asset indices belonging to each sector, in sector order.
    pub fn groups(&self) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.sectors.len()];
        for (t, &s) in self.membership.iter().enumerate() {
            groups[s].push(t);
        }
        groups
    }
}

/// Non-negative target weights for one rebalance date, keyed by ticker.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeightVector(pub BTreeMap<String, f64>);

impl WeightVector {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self(pairs.into_iter().map(|(t, w)| (t.into(), w)).collect())
    }

    pub fn get(&self, ticker: &str) -> Option<f64> {
        self.0.get(ticker).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }
}

/// Chronologically ordered weight vectors, one per successful rebalance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightHistory {
    entries: Vec<(NaiveDate, WeightVector)>,
}

impl WeightHistory {
    pub fn push(&mut self, date: NaiveDate, weights: WeightVector) {
        debug_assert!(
            self.entries.last().map_or(true, |(d, _)| *d < date),
            "weight history must stay chronological"
        );
        self.entries.push((date, weights));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(NaiveDate, WeightVector)> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&(NaiveDate, WeightVector)> {
        self.entries.last()
    }
}

/// Date-indexed realized portfolio returns; the authoritative engine output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioReturnSeries {
    entries: Vec<(NaiveDate, f64)>,
}

impl PortfolioReturnSeries {
    pub fn push(&mut self, date: NaiveDate, ret: f64) {
        debug_assert!(
            self.entries.last().map_or(true, |(d, _)| *d < date),
            "return series must stay chronological"
        );
        self.entries.push((date, ret));
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = (NaiveDate, f64)>) {
        for (date, ret) in other {
            self.push(date, ret);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.entries.iter().map(|(d, _)| *d)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|(_, r)| *r)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(NaiveDate, f64)> {
        self.entries.iter()
    }

    /// Cumulative index level, base 1.0: `prod(1 + r)` per date.
    pub fn index_levels(&self) -> Vec<(NaiveDate, f64)> {
        let mut level = 1.0;
        self.entries
            .iter()
            .map(|(d, r)| {
                level *= 1.0 + r;
                (*d, level)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn two_asset_panel() -> PricePanel {
        PricePanel::new(
            vec![d(2024, 1, 1), d(2024, 1, 2), d(2024, 1, 3)],
            vec!["AAA".to_string(), "BBB".to_string()],
            vec![
                vec![100.0, 50.0],
                vec![110.0, 50.0],
                vec![121.0, 25.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn panel_rejects_unsorted_dates() {
        let err = PricePanel::new(
            vec![d(2024, 1, 2), d(2024, 1, 1)],
            vec!["AAA".to_string()],
            vec![vec![1.0], vec![2.0]],
        );
        assert!(err.is_err());
    }

    #[test]
    fn panel_rejects_gaps_and_bad_prices() {
        assert!(PricePanel::new(
            vec![d(2024, 1, 1)],
            vec!["AAA".to_string(), "BBB".to_string()],
            vec![vec![1.0]],
        )
        .is_err());
        assert!(PricePanel::new(
            vec![d(2024, 1, 1)],
            vec!["AAA".to_string()],
            vec![vec![-1.0]],
        )
        .is_err());
        assert!(PricePanel::new(
            vec![d(2024, 1, 1)],
            vec!["AAA".to_string()],
            vec![vec![f64::NAN]],
        )
        .is_err());
    }

    #[test]
    fn returns_drop_first_row() {
        let panel = two_asset_panel();
        let returns = panel.returns();
        assert_eq!(returns.len(), 2);
        assert_eq!(returns.dates()[0], d(2024, 1, 2));
        assert!((returns.row(0)[0] - 0.10).abs() < 1e-12);
        assert!((returns.row(1)[1] + 0.50).abs() < 1e-12);
    }

    #[test]
    fn covariance_is_symmetric() {
        let returns = two_asset_panel().returns();
        let cov = returns.covariance();
        assert_eq!(cov.nrows(), 2);
        assert!((cov[(0, 1)] - cov[(1, 0)]).abs() < 1e-15);
    }

    #[test]
    fn sector_matrix_groups_by_sector() {
        let sm = SectorMatrix::from_assignments(&[
            ("AAA".to_string(), "Tech".to_string()),
            ("BBB".to_string(), "Energy".to_string()),
            ("CCC".to_string(), "Tech".to_string()),
        ])
        .unwrap();
        assert_eq!(sm.sectors().len(), 2);
        let groups = sm.groups();
        assert_eq!(groups[0], vec![0, 2]);
        assert_eq!(groups[1], vec![1]);
        assert_eq!(sm.sector_of(2), 0);
    }

    #[test]
    fn index_levels_compound() {
        let mut series = PortfolioReturnSeries::default();
        series.push(d(2024, 1, 2), 0.10);
        series.push(d(2024, 1, 3), 0.10);
        let levels = series.index_levels();
        assert!((levels[1].1 - 1.21).abs() < 1e-12);
    }
}
