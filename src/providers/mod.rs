//! Market data providers
//!
//! Two seams feed the scanner:
//! - [`ListProvider`] supplies the ticker universe (see [`crate::universe`])
//! - [`BarProvider`] supplies one instrument's intraday bars
//!
//! Implementations:
//! - [`YahooBarProvider`]: Yahoo Finance chart API
//! - [`ZerodhaBarProvider`]: Kite Connect historical candles
//! - [`CsvBarProvider`]: local CSV snapshots

pub mod csv;
pub mod yahoo;
pub mod zerodha;

pub use self::csv::CsvBarProvider;
pub use self::yahoo::YahooBarProvider;
pub use self::zerodha::{ZerodhaBarProvider, ZerodhaCredentials};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::{Bar, Ticker};

/// Errors raised while fetching tickers or bars
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Circuit breaker is open, provider temporarily unavailable")]
    CircuitBreakerOpen,

    #[error("Interval {0} is not supported by this provider")]
    UnsupportedInterval(Interval),

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),
}

impl ProviderError {
    /// Whether the failure says something about the provider's health
    /// rather than about the requested instrument
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Request(_) => true,
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Bar interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Interval {
    #[default]
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::OneDay => "1d",
        }
    }

    /// Yahoo chart API spelling
    pub fn as_yahoo(&self) -> &'static str {
        match self {
            Interval::OneHour => "60m",
            other => other.as_str(),
        }
    }

    /// Kite historical API spelling
    pub fn as_kite(&self) -> &'static str {
        match self {
            Interval::OneMinute => "minute",
            Interval::FiveMinutes => "5minute",
            Interval::FifteenMinutes => "15minute",
            Interval::ThirtyMinutes => "30minute",
            Interval::OneHour => "60minute",
            Interval::OneDay => "day",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" | "minute" => Ok(Interval::OneMinute),
            "5m" | "5minute" => Ok(Interval::FiveMinutes),
            "15m" | "15minute" => Ok(Interval::FifteenMinutes),
            "30m" | "30minute" => Ok(Interval::ThirtyMinutes),
            "1h" | "60m" | "60minute" => Ok(Interval::OneHour),
            "1d" | "day" => Ok(Interval::OneDay),
            _ => Err(format!(
                "Unknown interval: {}. Use 1m, 5m, 15m, 30m, 1h or 1d",
                s
            )),
        }
    }
}

/// How much history to fetch, and at what resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarRequest {
    /// Lookback in calendar days
    pub period_days: u32,
    pub interval: Interval,
}

impl Default for BarRequest {
    fn default() -> Self {
        Self {
            period_days: 1,
            interval: Interval::OneMinute,
        }
    }
}

impl BarRequest {
    pub fn with_period_days(mut self, days: u32) -> Self {
        self.period_days = days.max(1);
        self
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }
}

/// Source of intraday bars for one instrument
#[async_trait]
pub trait BarProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Bars in strictly increasing timestamp order. An empty vector means the
    /// provider has no data for the ticker.
    async fn fetch_bars(
        &self,
        ticker: &Ticker,
        request: &BarRequest,
    ) -> Result<Vec<Bar>, ProviderError>;
}

/// Source of the ticker universe
#[async_trait]
pub trait ListProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn tickers(&self) -> Result<Vec<String>, ProviderError>;
}

/// Sort by timestamp and drop bars that do not move time forward
///
/// Providers occasionally repeat the last candle of a page; keeping the first
/// occurrence leaves a strictly increasing series.
pub fn clean_series(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    let before = bars.len();
    bars.dedup_by_key(|b| b.timestamp);
    if bars.len() != before {
        tracing::debug!(dropped = before - bars.len(), "Dropped duplicate bars");
    }
    bars
}
