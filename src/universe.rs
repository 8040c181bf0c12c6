//! Ticker universe
//!
//! - [`RemoteCsvListProvider`]: index constituents CSV (NIFTY 50 by default)
//! - [`StaticListProvider`]: operator-supplied list
//! - [`CachedListProvider`]: TTL cache around any provider
//! - [`Universe::resolve`]: falls back to [`FALLBACK_TICKERS`] when the
//!   provider fails or returns nothing

use async_trait::async_trait;
use itertools::Itertools;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::providers::{ListProvider, ProviderError};
use crate::Ticker;

pub const NIFTY50_URL: &str = "https://www.niftyindices.com/IndexConstituent/ind_nifty50list.csv";

/// NSE suffix used by Yahoo Finance
pub const DEFAULT_SUFFIX: &str = ".NS";

/// Liquid NSE names used when the constituents list cannot be loaded
pub const FALLBACK_TICKERS: [&str; 10] = [
    "RELIANCE.NS",
    "TCS.NS",
    "HDFCBANK.NS",
    "INFY.NS",
    "ICICIBANK.NS",
    "TATAMOTORS.NS",
    "SBIN.NS",
    "BHARTIARTL.NS",
    "ITC.NS",
    "LT.NS",
];

/// Trim, uppercase and add the exchange suffix when the symbol has none
pub fn normalize_ticker(raw: &str, suffix: &str) -> Option<String> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return None;
    }
    if symbol.contains('.') || suffix.is_empty() {
        Some(symbol)
    } else {
        Some(format!("{}{}", symbol, suffix.to_uppercase()))
    }
}

// =============================================================================
// Providers
// =============================================================================

/// Fixed list of tickers
#[derive(Debug, Clone, Default)]
pub struct StaticListProvider {
    tickers: Vec<String>,
}

impl StaticListProvider {
    pub fn new<I, S>(tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tickers: tickers
                .into_iter()
                .filter_map(|t| normalize_ticker(t.as_ref(), ""))
                .unique()
                .collect(),
        }
    }

    /// Parse a comma separated list, adding `suffix` to bare symbols
    pub fn parse(list: &str, suffix: &str) -> Self {
        Self {
            tickers: list
                .split(',')
                .filter_map(|t| normalize_ticker(t, suffix))
                .unique()
                .collect(),
        }
    }
}

#[async_trait]
impl ListProvider for StaticListProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn tickers(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.tickers.clone())
    }
}

/// Index constituents CSV with a `Symbol` column
pub struct RemoteCsvListProvider {
    client: Client,
    url: String,
    suffix: String,
}

impl RemoteCsvListProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            suffix: DEFAULT_SUFFIX.to_string(),
        })
    }

    pub fn nifty50(timeout: Duration) -> Result<Self, ProviderError> {
        Self::new(NIFTY50_URL, timeout)
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }
}

#[async_trait]
impl ListProvider for RemoteCsvListProvider {
    fn name(&self) -> &str {
        &self.url
    }

    async fn tickers(&self) -> Result<Vec<String>, ProviderError> {
        debug!(url = %self.url, "Downloading constituents list");
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: format!("failed to download {}", self.url),
            });
        }
        let body = response.bytes().await?;
        parse_constituents(&body, &self.suffix)
    }
}

/// Read the `Symbol` column of a constituents CSV
pub fn parse_constituents(content: &[u8], suffix: &str) -> Result<Vec<String>, ProviderError> {
    let mut reader = ::csv::Reader::from_reader(content);
    let column = reader
        .headers()?
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("symbol"))
        .ok_or_else(|| ProviderError::Parse("constituents CSV has no Symbol column".into()))?;

    let mut tickers = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(ticker) = record.get(column).and_then(|s| normalize_ticker(s, suffix)) {
            tickers.push(ticker);
        }
    }
    Ok(tickers.into_iter().unique().collect())
}

/// Serves a provider's list from memory until the TTL expires
pub struct CachedListProvider<P> {
    inner: P,
    ttl: Duration,
    cache: Mutex<Option<(Instant, Vec<String>)>>,
}

impl<P: ListProvider> CachedListProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Drop the cached list so the next call refetches
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }
}

#[async_trait]
impl<P: ListProvider> ListProvider for CachedListProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn tickers(&self) -> Result<Vec<String>, ProviderError> {
        let mut cache = self.cache.lock().await;
        if let Some((fetched_at, tickers)) = cache.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                debug!(provider = self.inner.name(), "Ticker list served from cache");
                return Ok(tickers.clone());
            }
        }

        let tickers = self.inner.tickers().await?;
        *cache = Some((Instant::now(), tickers.clone()));
        Ok(tickers)
    }
}

// =============================================================================
// Resolution
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UniverseSource {
    Provider,
    Fallback,
}

/// Tickers to scan and where they came from
#[derive(Debug, Clone, Serialize)]
pub struct Universe {
    pub tickers: Vec<Ticker>,
    pub source: UniverseSource,
    /// Set when the fallback list was used
    pub warning: Option<String>,
}

impl Universe {
    /// Ask the provider for tickers; on failure or an empty list use
    /// [`FALLBACK_TICKERS`] and record why
    pub async fn resolve(provider: &dyn ListProvider) -> Self {
        let reason = match provider.tickers().await {
            Ok(tickers) if !tickers.is_empty() => {
                info!(provider = provider.name(), count = tickers.len(), "Loaded ticker universe");
                return Self {
                    tickers: tickers.into_iter().map(Ticker::from).collect(),
                    source: UniverseSource::Provider,
                    warning: None,
                };
            }
            Ok(_) => "provider returned no tickers".to_string(),
            Err(e) => e.to_string(),
        };

        let warning = format!(
            "Could not load tickers from {} ({}); using {} fallback tickers",
            provider.name(),
            reason,
            FALLBACK_TICKERS.len()
        );
        warn!("{}", warning);
        Self::fallback(Some(warning))
    }

    pub fn fallback(warning: Option<String>) -> Self {
        Self {
            tickers: FALLBACK_TICKERS.iter().map(Ticker::new).collect(),
            source: UniverseSource::Fallback,
            warning,
        }
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ListProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn tickers(&self) -> Result<Vec<String>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["TCS.NS".to_string()])
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl ListProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn tickers(&self) -> Result<Vec<String>, ProviderError> {
            Err(ProviderError::Api {
                status: 503,
                message: "down".into(),
            })
        }
    }

    #[test]
    fn test_normalize_ticker() {
        assert_eq!(normalize_ticker(" reliance ", ".NS").as_deref(), Some("RELIANCE.NS"));
        assert_eq!(normalize_ticker("INFY.NS", ".NS").as_deref(), Some("INFY.NS"));
        assert_eq!(normalize_ticker("AAPL", "").as_deref(), Some("AAPL"));
        assert_eq!(normalize_ticker("  ", ".NS"), None);
    }

    #[test]
    fn test_parse_constituents() {
        let csv = "\
Company Name,Industry,Symbol,Series,ISIN Code
Reliance Industries Ltd.,Oil Gas,RELIANCE,EQ,INE002A01018
Tata Consultancy Services Ltd.,IT,TCS,EQ,INE467B01029
Reliance Industries Ltd.,Oil Gas,RELIANCE,EQ,INE002A01018
";
        let tickers = parse_constituents(csv.as_bytes(), ".NS").unwrap();
        assert_eq!(tickers, vec!["RELIANCE.NS", "TCS.NS"]);
    }

    #[test]
    fn test_parse_constituents_requires_symbol_column() {
        let csv = "Name,Code\nFoo,1\n";
        assert!(matches!(
            parse_constituents(csv.as_bytes(), ".NS"),
            Err(ProviderError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_static_parse() {
        let provider = StaticListProvider::parse("reliance, TCS.NS,,reliance", ".NS");
        assert_eq!(provider.tickers().await.unwrap(), vec!["RELIANCE.NS", "TCS.NS"]);
    }

    #[tokio::test]
    async fn test_cache_serves_within_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = CachedListProvider::new(
            CountingProvider {
                calls: calls.clone(),
            },
            Duration::from_secs(60),
        );

        cached.tickers().await.unwrap();
        cached.tickers().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cached.invalidate().await;
        cached.tickers().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_expires() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = CachedListProvider::new(
            CountingProvider {
                calls: calls.clone(),
            },
            Duration::ZERO,
        );

        cached.tickers().await.unwrap();
        cached.tickers().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolve_falls_back_on_error() {
        let universe = Universe::resolve(&FailingProvider).await;
        assert_eq!(universe.source, UniverseSource::Fallback);
        assert_eq!(universe.len(), 10);
        assert_eq!(universe.tickers[0].as_str(), "RELIANCE.NS");
        assert!(universe.warning.unwrap().contains("failing"));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_on_empty() {
        let universe = Universe::resolve(&StaticListProvider::default()).await;
        assert_eq!(universe.source, UniverseSource::Fallback);
    }

    #[tokio::test]
    async fn test_resolve_uses_provider() {
        let universe = Universe::resolve(&StaticListProvider::new(["SBIN.NS"])).await;
        assert_eq!(universe.source, UniverseSource::Provider);
        assert!(universe.warning.is_none());
        assert_eq!(universe.tickers, vec![Ticker::new("SBIN.NS")]);
    }
}
