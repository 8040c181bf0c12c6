//! CSV snapshot provider
//!
//! Reads `<data_dir>/<TICKER>_<interval>.csv` with the columns
//! `datetime,open,high,low,close,volume`. Timestamps may be RFC 3339,
//! `YYYY-MM-DD HH:MM:SS` (taken as UTC) or unix seconds.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{clean_series, BarProvider, BarRequest, ProviderError};
use crate::{Bar, Ticker};

#[derive(Debug, Clone)]
pub struct CsvBarProvider {
    data_dir: PathBuf,
}

impl CsvBarProvider {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Snapshot path for a ticker and request
    pub fn path_for(&self, ticker: &Ticker, request: &BarRequest) -> PathBuf {
        self.data_dir
            .join(format!("{}_{}.csv", ticker.as_str(), request.interval))
    }
}

#[async_trait]
impl BarProvider for CsvBarProvider {
    fn name(&self) -> &str {
        "csv"
    }

    async fn fetch_bars(
        &self,
        ticker: &Ticker,
        request: &BarRequest,
    ) -> Result<Vec<Bar>, ProviderError> {
        let path = self.path_for(ticker, request);
        debug!(ticker = %ticker, path = %path.display(), "Reading CSV snapshot");
        let content = tokio::fs::read(&path).await?;
        parse_bars(&content, ticker)
    }
}

/// Parse CSV content into bars, skipping rows that fail validation
pub fn parse_bars(content: &[u8], ticker: &Ticker) -> Result<Vec<Bar>, ProviderError> {
    let mut reader = ::csv::Reader::from_reader(content);
    let mut bars = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result?;
        let field = |i: usize, name: &str| {
            record
                .get(i)
                .map(str::trim)
                .ok_or_else(|| ProviderError::Parse(format!("row {}: missing {}", row_idx + 1, name)))
        };

        let timestamp = parse_timestamp(field(0, "datetime")?).ok_or_else(|| {
            ProviderError::Parse(format!("row {}: bad datetime", row_idx + 1))
        })?;
        let number = |i: usize, name: &str| -> Result<f64, ProviderError> {
            field(i, name)?
                .parse::<f64>()
                .map_err(|e| ProviderError::Parse(format!("row {}: {}: {}", row_idx + 1, name, e)))
        };

        match Bar::new(
            timestamp,
            number(1, "open")?,
            number(2, "high")?,
            number(3, "low")?,
            number(4, "close")?,
            number(5, "volume")?,
        ) {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                invalid_count += 1;
                debug!(ticker = %ticker, row = row_idx + 1, error = %e, "Skipping invalid bar");
            }
        }
    }

    if invalid_count > 0 {
        warn!(ticker = %ticker, invalid_count, "Skipped invalid bars in CSV snapshot");
    }

    Ok(clean_series(bars))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(ndt.and_utc());
    }
    s.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
