//! Zerodha Kite Connect historical candles
//!
//! Uses a pre-issued access token; the login flow is out of scope. Kite
//! addresses instruments by numeric token, so tickers are resolved through a
//! map taken from config or downloaded once from the instruments dump.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{clean_series, BarProvider, BarRequest, ProviderError};
use crate::common::RequestGuard;
use crate::indicators::ist;
use crate::{Bar, Ticker};

pub const KITE_BASE_URL: &str = "https://api.kite.trade";

/// Exchange segment of the instruments dump
const EXCHANGE: &str = "NSE";

const KITE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

#[derive(Clone)]
pub struct ZerodhaCredentials {
    pub api_key: String,
    pub access_token: String,
}

impl ZerodhaCredentials {
    pub fn new(api_key: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            access_token: access_token.into(),
        }
    }

    fn header(&self) -> String {
        format!("token {}:{}", self.api_key, self.access_token)
    }
}

impl std::fmt::Debug for ZerodhaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZerodhaCredentials")
            .field("api_key", &self.api_key)
            .field("access_token", &"***")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct KiteResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<CandleData>,
}

#[derive(Debug, Deserialize)]
struct CandleData {
    #[serde(default)]
    candles: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct InstrumentRow {
    instrument_token: u64,
    tradingsymbol: String,
    #[serde(default)]
    segment: String,
}

pub struct ZerodhaBarProvider {
    client: Client,
    base_url: String,
    credentials: ZerodhaCredentials,
    configured: HashMap<String, u64>,
    downloaded: OnceCell<HashMap<String, u64>>,
    guard: RequestGuard,
}

impl ZerodhaBarProvider {
    pub fn new(credentials: ZerodhaCredentials, timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(KITE_BASE_URL, credentials, timeout)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        credentials: ZerodhaCredentials,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        if credentials.api_key.is_empty() {
            return Err(ProviderError::MissingCredentials("KITE_API_KEY"));
        }
        if credentials.access_token.is_empty() {
            return Err(ProviderError::MissingCredentials("KITE_ACCESS_TOKEN"));
        }
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into(),
            credentials,
            configured: HashMap::new(),
            downloaded: OnceCell::new(),
            guard: RequestGuard::default(),
        })
    }

    /// Known trading symbol -> instrument token pairs; these skip the
    /// instruments download
    pub fn with_instruments(mut self, instruments: HashMap<String, u64>) -> Self {
        self.configured = instruments
            .into_iter()
            .map(|(symbol, token)| (symbol.to_uppercase(), token))
            .collect();
        self
    }

    pub fn with_guard(mut self, guard: RequestGuard) -> Self {
        self.guard = guard;
        self
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header("X-Kite-Version", "3")
            .header("Authorization", self.credentials.header())
    }

    async fn instrument_token(&self, ticker: &Ticker) -> Result<u64, ProviderError> {
        let symbol = ticker.base().to_uppercase();
        if let Some(token) = self.configured.get(&symbol) {
            return Ok(*token);
        }

        let downloaded = self
            .downloaded
            .get_or_try_init(|| self.download_instruments())
            .await?;
        downloaded
            .get(&symbol)
            .copied()
            .ok_or_else(|| ProviderError::UnknownInstrument(ticker.to_string()))
    }

    async fn download_instruments(&self) -> Result<HashMap<String, u64>, ProviderError> {
        let url = format!("{}/instruments/{}", self.base_url, EXCHANGE);
        let body = self
            .guard
            .run(|| async {
                let response = self.get(&url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ProviderError::Api {
                        status: status.as_u16(),
                        message: response.text().await.unwrap_or_default(),
                    });
                }
                Ok(response.bytes().await?)
            })
            .await?;

        let instruments = parse_instruments(&body)?;
        info!(count = instruments.len(), "Loaded Kite instrument map");
        Ok(instruments)
    }

    async fn request_candles(
        &self,
        token: u64,
        request: &BarRequest,
    ) -> Result<String, ProviderError> {
        let url = format!(
            "{}/instruments/historical/{}/{}",
            self.base_url,
            token,
            request.interval.as_kite()
        );
        let to = Utc::now().with_timezone(&ist());
        let from = to - ChronoDuration::days(i64::from(request.period_days));

        let response = self
            .get(&url)
            .query(&[
                ("from", from.format("%Y-%m-%d %H:%M:%S").to_string()),
                ("to", to.format("%Y-%m-%d %H:%M:%S").to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<KiteResponse>(&body)
                .ok()
                .and_then(|r| r.message)
                .unwrap_or(body);
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl BarProvider for ZerodhaBarProvider {
    fn name(&self) -> &str {
        "zerodha"
    }

    async fn fetch_bars(
        &self,
        ticker: &Ticker,
        request: &BarRequest,
    ) -> Result<Vec<Bar>, ProviderError> {
        let token = self.instrument_token(ticker).await?;
        debug!(ticker = %ticker, token, "Fetching Kite candles");
        let body = self
            .guard
            .run(|| self.request_candles(token, request))
            .await?;
        parse_candles(&body, ticker)
    }
}

/// Parse the `instruments` CSV dump into a symbol -> token map (equities only)
pub fn parse_instruments(content: &[u8]) -> Result<HashMap<String, u64>, ProviderError> {
    let mut reader = ::csv::Reader::from_reader(content);
    let mut instruments = HashMap::new();
    for row in reader.deserialize::<InstrumentRow>() {
        let row = row?;
        if row.segment.is_empty() || row.segment == EXCHANGE {
            instruments.insert(row.tradingsymbol.to_uppercase(), row.instrument_token);
        }
    }
    Ok(instruments)
}

/// Parse a historical candles response
pub fn parse_candles(body: &str, ticker: &Ticker) -> Result<Vec<Bar>, ProviderError> {
    let response: KiteResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    if response.status != "success" {
        return Err(ProviderError::Parse(
            response.message.unwrap_or_else(|| response.status.clone()),
        ));
    }

    let candles = response.data.map(|d| d.candles).unwrap_or_default();
    let mut bars = Vec::with_capacity(candles.len());
    let mut invalid_count = 0;

    for candle in &candles {
        match candle_to_bar(candle) {
            Some(bar) => bars.push(bar),
            None => invalid_count += 1,
        }
    }

    if invalid_count > 0 {
        warn!(ticker = %ticker, invalid_count, "Skipped invalid Kite candles");
    }
    Ok(clean_series(bars))
}

/// `[timestamp, open, high, low, close, volume, (oi)]`
fn candle_to_bar(candle: &[Value]) -> Option<Bar> {
    if candle.len() < 6 {
        return None;
    }
    let timestamp = DateTime::parse_from_str(candle[0].as_str()?, KITE_TIME_FORMAT)
        .ok()?
        .with_timezone(&Utc);
    let num = |i: usize| candle[i].as_f64();
    Bar::new(timestamp, num(1)?, num(2)?, num(3)?, num(4)?, num(5)?).ok()
}
