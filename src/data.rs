//! Price-panel and benchmark CSV ingestion.
//!
//! Prices arrive in wide format: a `Date` column followed by one column per
//! ticker. Ticker columns with missing or non-positive cells are dropped
//! before the panel invariant is enforced, mirroring how callers pre-filter
//! incomplete securities.

use crate::error::{BacktestError, Result};
use crate::types::PricePanel;
use chrono::NaiveDate;
use csv::ReaderBuilder;
use std::path::Path;
use tracing::{debug, info, warn};

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_date(raw: &str, format: Option<&str>) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(
        raw.trim(),
        format.unwrap_or(DEFAULT_DATE_FORMAT),
    )?)
}

/// Load a wide-format price CSV into a [`PricePanel`].
///
/// Cells that are empty or fail to parse mark their whole ticker column as
/// incomplete; incomplete columns are dropped with a warning rather than
/// poking holes in the panel.
pub fn load_price_panel(path: impl AsRef<Path>, date_format: Option<&str>) -> Result<PricePanel> {
    let path = path.as_ref();
    info!("Loading price panel from: {}", path.display());

    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(BacktestError::DataError(
            "price CSV needs a Date column and at least one ticker column".to_string(),
        ));
    }
    let tickers: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();

    let mut dates: Vec<NaiveDate> = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); tickers.len()];
    let mut incomplete = vec![false; tickers.len()];

    for (row_num, record) in reader.records().enumerate() {
        let record = record?;
        let raw_date = record.get(0).ok_or_else(|| {
            BacktestError::DataError(format!("row {}: missing date cell", row_num + 1))
        })?;
        dates.push(parse_date(raw_date, date_format)?);

        for (t, column) in columns.iter_mut().enumerate() {
            let cell = record.get(t + 1).unwrap_or("").trim();
            match cell.parse::<f64>() {
                Ok(px) if px.is_finite() && px > 0.0 => column.push(px),
                _ => {
                    if !incomplete[t] {
                        debug!(
                            ticker = %tickers[t],
                            row = row_num + 1,
                            "unusable price cell; dropping ticker column"
                        );
                    }
                    incomplete[t] = true;
                    column.push(f64::NAN);
                }
            }
        }
    }

    let kept: Vec<usize> = (0..tickers.len()).filter(|&t| !incomplete[t]).collect();
    let dropped: Vec<&String> = (0..tickers.len())
        .filter(|&t| incomplete[t])
        .map(|t| &tickers[t])
        .collect();
    if !dropped.is_empty() {
        warn!(?dropped, "dropped incomplete ticker columns");
    }
    if kept.is_empty() {
        return Err(BacktestError::DataError(
            "no complete ticker columns in price CSV".to_string(),
        ));
    }

    let kept_tickers: Vec<String> = kept.iter().map(|&t| tickers[t].clone()).collect();
    let rows: Vec<Vec<f64>> = (0..dates.len())
        .map(|d| kept.iter().map(|&t| columns[t][d]).collect())
        .collect();

    let panel = PricePanel::new(dates, kept_tickers, rows)?;
    info!(
        dates = panel.len(),
        tickers = panel.tickers().len(),
        "price panel loaded"
    );
    Ok(panel)
}

/// Load a two-column `Date,Value` benchmark CSV, sorted by date.
pub fn load_benchmark_series(
    path: impl AsRef<Path>,
    date_format: Option<&str>,
) -> Result<Vec<(NaiveDate, f64)>> {
    let path = path.as_ref();
    info!("Loading benchmark series from: {}", path.display());

    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut series: Vec<(NaiveDate, f64)> = Vec::new();
    for (row_num, record) in reader.records().enumerate() {
        let record = record?;
        let raw_date = record.get(0).ok_or_else(|| {
            BacktestError::DataError(format!("row {}: missing date cell", row_num + 1))
        })?;
        let raw_value = record.get(1).ok_or_else(|| {
            BacktestError::DataError(format!("row {}: missing value cell", row_num + 1))
        })?;
        let value: f64 = raw_value.trim().parse().map_err(|_| {
            BacktestError::DataError(format!("row {}: unparseable value {:?}", row_num + 1, raw_value))
        })?;
        series.push((parse_date(raw_date, date_format)?, value));
    }
    if series.is_empty() {
        return Err(BacktestError::DataError(
            "benchmark CSV contains no rows".to_string(),
        ));
    }
    series.sort_by_key(|(date, _)| *date);
    Ok(series)
}
