//! Yahoo Finance chart API provider
//!
//! `GET {base}/v8/finance/chart/{ticker}?range={N}d&interval={interval}`

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{clean_series, BarProvider, BarRequest, ProviderError};
use crate::common::RequestGuard;
use crate::{Bar, Ticker};

pub const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

pub struct YahooBarProvider {
    client: Client,
    base_url: String,
    guard: RequestGuard,
}

impl YahooBarProvider {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(YAHOO_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            guard: RequestGuard::default(),
        })
    }

    pub fn with_guard(mut self, guard: RequestGuard) -> Self {
        self.guard = guard;
        self
    }

    async fn request(&self, ticker: &Ticker, request: &BarRequest) -> Result<String, ProviderError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker.as_str());
        let response = self
            .client
            .get(&url)
            .query(&[
                ("range", format!("{}d", request.period_days)),
                ("interval", request.interval.as_yahoo().to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        // 404 carries a chart error body naming the symbol
        if !status.is_success() && status.as_u16() != 404 {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl BarProvider for YahooBarProvider {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn fetch_bars(
        &self,
        ticker: &Ticker,
        request: &BarRequest,
    ) -> Result<Vec<Bar>, ProviderError> {
        let body = self.guard.run(|| self.request(ticker, request)).await?;
        parse_chart(&body, ticker)
    }
}

/// Decode a chart response, dropping bars with null fields or failing validation
pub fn parse_chart(body: &str, ticker: &Ticker) -> Result<Vec<Bar>, ProviderError> {
    let response: ChartResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    if let Some(error) = response.chart.error {
        return Err(if error.code.eq_ignore_ascii_case("Not Found") {
            ProviderError::UnknownInstrument(ticker.to_string())
        } else {
            ProviderError::Parse(format!("{}: {}", error.code, error.description))
        });
    }

    let Some(data) = response.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();

    let mut bars = Vec::with_capacity(data.timestamp.len());
    let mut invalid_count = 0;
    for (i, &ts) in data.timestamp.iter().enumerate() {
        let at = |values: &[Option<f64>]| values.get(i).copied().flatten();
        let fields = (
            DateTime::from_timestamp(ts, 0),
            at(&quote.open),
            at(&quote.high),
            at(&quote.low),
            at(&quote.close),
            at(&quote.volume),
        );
        let (Some(timestamp), Some(o), Some(h), Some(l), Some(c), Some(v)) = fields else {
            // minutes without trades come back as nulls
            continue;
        };
        match Bar::new(timestamp, o, h, l, c, v) {
            Ok(bar) => bars.push(bar),
            Err(_) => invalid_count += 1,
        }
    }

    if invalid_count > 0 {
        warn!(ticker = %ticker, invalid_count, "Skipped invalid bars from Yahoo");
    }
    debug!(ticker = %ticker, bars = bars.len(), "Fetched Yahoo bars");

    Ok(clean_series(bars))
}
