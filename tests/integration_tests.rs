//! Integration tests for the intraday scanner
//!
//! These tests drive the full pipeline (provider -> indicators -> evaluator ->
//! sizer -> report) through in-memory providers.

use approx::assert_relative_eq;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use intraday_sniper::indicators::{self, IndicatorSet, MIN_BARS};
use intraday_sniper::providers::{BarProvider, BarRequest, CsvBarProvider, ListProvider, ProviderError};
use intraday_sniper::risk::{self, PositionSizer, RiskConfig};
use intraday_sniper::scanner::{ErrorKind, OutcomeStatus, Scanner, ScannerConfig};
use intraday_sniper::signal::{self, DegenerateReason, Evaluation};
use intraday_sniper::universe::{StaticListProvider, UniverseSource, FALLBACK_TICKERS};
use intraday_sniper::{Bar, Money, Ticker};

// =============================================================================
// Test Utilities
// =============================================================================

/// 09:15 IST on a trading day
fn session_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 3, 45, 0).unwrap()
}

/// Steady uptrend with shallow pullbacks: close above VWAP, RSI well above 60
fn generate_bullish_bars(count: usize, base_price: f64, volume: f64) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let close = base_price + i as f64 * 0.4 + if i % 4 == 0 { -0.3 } else { 0.0 };
            Bar::new_unchecked(
                session_open() + Duration::minutes(i as i64),
                close - 0.1,
                close + 0.3,
                close - 0.3,
                close,
                volume + i as f64,
            )
        })
        .collect()
}

/// Steady downtrend: close below VWAP
fn generate_bearish_bars(count: usize, base_price: f64) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let close = base_price - i as f64 * 0.4;
            Bar::new_unchecked(
                session_open() + Duration::minutes(i as i64),
                close + 0.1,
                close + 0.3,
                close - 0.3,
                close,
                1_000.0,
            )
        })
        .collect()
}

enum MockResponse {
    Bars(Vec<Bar>),
    Fail,
    Slow(StdDuration, Vec<Bar>),
}

/// In-memory bar provider that also tracks peak concurrency
struct MockBarProvider {
    responses: HashMap<String, MockResponse>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl MockBarProvider {
    fn new() -> Self {
        Self {
            responses: HashMap::new(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    fn with(mut self, ticker: &str, response: MockResponse) -> Self {
        self.responses.insert(ticker.to_string(), response);
        self
    }
}

#[async_trait]
impl BarProvider for MockBarProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_bars(
        &self,
        ticker: &Ticker,
        _request: &BarRequest,
    ) -> Result<Vec<Bar>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = match self.responses.get(ticker.as_str()) {
            Some(MockResponse::Bars(bars)) => {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
                Ok(bars.clone())
            }
            Some(MockResponse::Slow(delay, bars)) => {
                tokio::time::sleep(*delay).await;
                Ok(bars.clone())
            }
            Some(MockResponse::Fail) => Err(ProviderError::Api {
                status: 503,
                message: "service unavailable".into(),
            }),
            None => Ok(Vec::new()),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

struct FailingListProvider;

#[async_trait]
impl ListProvider for FailingListProvider {
    fn name(&self) -> &str {
        "niftyindices"
    }

    async fn tickers(&self) -> Result<Vec<String>, ProviderError> {
        Err(ProviderError::Api {
            status: 403,
            message: "forbidden".into(),
        })
    }
}

fn tickers(names: &[&str]) -> Vec<Ticker> {
    names.iter().map(Ticker::new).collect()
}

fn scanner(provider: MockBarProvider, concurrency: usize) -> Scanner {
    Scanner::new(
        Arc::new(provider),
        ScannerConfig::default().with_concurrency(concurrency),
    )
}

fn last_bar_indicators(vwap: f64, rsi: f64, atr: f64) -> Vec<IndicatorSet> {
    let mut sets = vec![IndicatorSet::default(); MIN_BARS];
    sets[MIN_BARS - 1] = IndicatorSet {
        vwap: Some(vwap),
        rsi: Some(rsi),
        atr: Some(atr),
        avg_volume: None,
    };
    sets
}

fn flat_bars_closing_at(close: f64) -> Vec<Bar> {
    (0..MIN_BARS)
        .map(|i| {
            Bar::new_unchecked(
                session_open() + Duration::minutes(i as i64),
                close,
                close + 0.5,
                close - 0.5,
                close,
                1_000.0,
            )
        })
        .collect()
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[test]
fn test_scenario_signal_levels_and_sizing() {
    let bars = flat_bars_closing_at(100.0);
    let ind = last_bar_indicators(98.5, 65.0, 1.2);
    let ticker = Ticker::new("RELIANCE.NS");

    let signal = signal::evaluate(&ticker, &bars, &ind).expect("bullish setup");
    assert_eq!(signal.stop_loss, Money::from_decimal(dec!(98.20)));
    assert_eq!(signal.risk_per_share(), Money::from_decimal(dec!(1.80)));
    assert_eq!(signal.target, Money::from_decimal(dec!(103.60)));

    let sizer = PositionSizer::new(RiskConfig::new(50_000.0, 0.01).unwrap());
    let sized = sizer.apply(signal);
    assert_eq!(sized.quantity, 277);
}

#[test]
fn test_scenario_price_below_vwap() {
    let bars = flat_bars_closing_at(100.0);
    for rsi in [30.0, 61.0, 95.0] {
        let ind = last_bar_indicators(101.0, rsi, 1.2);
        assert!(signal::evaluate(&Ticker::new("TCS.NS"), &bars, &ind).is_none());
    }
}

#[test]
fn test_scenario_degenerate_risk() {
    let risk = RiskConfig::default();
    let price = Money::from_decimal(dec!(100.00));
    assert_eq!(risk::size(&risk, price, price), 0);

    let bars = flat_bars_closing_at(100.0);
    let ind = last_bar_indicators(98.5, 65.0, 0.0);
    assert_eq!(
        signal::assess(&Ticker::new("INFY.NS"), &bars, &ind),
        Evaluation::Degenerate(DegenerateReason::NonPositiveRisk)
    );
}

#[test]
fn test_generated_uptrend_signals() {
    let bars = generate_bullish_bars(40, 100.0, 500.0);
    let ind = indicators::compute(&bars);

    let last = ind.last().unwrap();
    assert!(bars.last().unwrap().close > last.vwap.unwrap());
    assert!(last.rsi.unwrap() > 60.0);
    assert_relative_eq!(
        last.avg_volume.unwrap(),
        (30..40).map(|i| 500.0 + i as f64).sum::<f64>() / 10.0,
        epsilon = 1e-9
    );

    let signal = signal::evaluate(&Ticker::new("SBIN.NS"), &bars, &ind).unwrap();
    assert!(signal.stop_loss < signal.price);
    assert!(signal.target > signal.price);
}

// =============================================================================
// Scanner
// =============================================================================

#[tokio::test]
async fn test_scan_counts_signals_failures_and_skips() {
    // N = 7, K = 2 fetch failures, M = 3 matches, 2 without setup
    let provider = MockBarProvider::new()
        .with("A.NS", MockResponse::Bars(generate_bullish_bars(40, 100.0, 500.0)))
        .with("B.NS", MockResponse::Fail)
        .with("C.NS", MockResponse::Bars(generate_bearish_bars(40, 200.0)))
        .with("D.NS", MockResponse::Bars(generate_bullish_bars(40, 50.0, 900.0)))
        .with("E.NS", MockResponse::Fail)
        .with("F.NS", MockResponse::Bars(generate_bullish_bars(40, 300.0, 700.0)))
        .with("G.NS", MockResponse::Bars(generate_bearish_bars(40, 80.0)));

    let list = tickers(&["A.NS", "B.NS", "C.NS", "D.NS", "E.NS", "F.NS", "G.NS"]);
    let report = scanner(provider, 3).scan(&list, &RiskConfig::default()).await;

    assert_eq!(report.signals.len(), 3);
    assert_eq!(report.summary.scanned, 7);
    assert_eq!(report.summary.signaled, 3);
    assert!(report.summary.failed >= 2);
    assert_eq!(report.summary.data_unavailable, 2);
    assert_eq!(report.summary.skipped(), 2);
    assert!(report.signals.iter().all(|s| s.quantity > 0));
}

#[tokio::test]
async fn test_scan_preserves_input_order() {
    // Earlier tickers respond slower so completion order is reversed
    let provider = MockBarProvider::new()
        .with(
            "SLOW.NS",
            MockResponse::Slow(StdDuration::from_millis(80), generate_bullish_bars(40, 100.0, 100.0)),
        )
        .with(
            "MID.NS",
            MockResponse::Slow(StdDuration::from_millis(40), generate_bullish_bars(40, 100.0, 200.0)),
        )
        .with(
            "FAST.NS",
            MockResponse::Slow(StdDuration::from_millis(1), generate_bullish_bars(40, 100.0, 300.0)),
        );

    let list = tickers(&["SLOW.NS", "MID.NS", "FAST.NS"]);
    let mut report = scanner(provider, 3).scan(&list, &RiskConfig::default()).await;

    let order: Vec<&str> = report.signals.iter().map(|s| s.ticker.as_str()).collect();
    assert_eq!(order, vec!["SLOW.NS", "MID.NS", "FAST.NS"]);
    let outcomes: Vec<&str> = report.outcomes.iter().map(|o| o.ticker.as_str()).collect();
    assert_eq!(outcomes, vec!["SLOW.NS", "MID.NS", "FAST.NS"]);

    assert_eq!(report.top_pick().unwrap().ticker.as_str(), "FAST.NS");
    report.sort_by_volume();
    assert_eq!(report.signals[0].ticker.as_str(), "FAST.NS");
}

#[tokio::test]
async fn test_scan_respects_concurrency_limit() {
    let mut provider = MockBarProvider::new();
    let names: Vec<String> = (0..12).map(|i| format!("T{}.NS", i)).collect();
    for name in &names {
        provider = provider.with(
            name,
            MockResponse::Slow(StdDuration::from_millis(20), generate_bearish_bars(40, 100.0)),
        );
    }
    let provider = Arc::new(provider);
    let scanner = Scanner::new(
        provider.clone(),
        ScannerConfig::default().with_concurrency(2),
    );

    let list: Vec<Ticker> = names.iter().map(Ticker::new).collect();
    let report = scanner.scan(&list, &RiskConfig::default()).await;

    assert_eq!(report.summary.no_setup, 12);
    assert!(provider.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn test_scan_times_out_slow_fetch() {
    let provider = MockBarProvider::new()
        .with(
            "HANG.NS",
            MockResponse::Slow(StdDuration::from_secs(5), generate_bullish_bars(40, 100.0, 1.0)),
        )
        .with("OK.NS", MockResponse::Bars(generate_bullish_bars(40, 100.0, 1.0)));
    let scanner = Scanner::new(
        Arc::new(provider),
        ScannerConfig::default().with_fetch_timeout(StdDuration::from_millis(50)),
    );

    let report = scanner
        .scan(&tickers(&["HANG.NS", "OK.NS"]), &RiskConfig::default())
        .await;

    assert_eq!(report.summary.signaled, 1);
    assert_eq!(report.summary.data_unavailable, 1);
    let hang = &report.outcomes[0];
    assert_eq!(hang.status, OutcomeStatus::Failed);
    assert_eq!(hang.kind, Some(ErrorKind::DataUnavailable));
    assert!(hang.error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_scan_skips_empty_and_short_series() {
    let provider = MockBarProvider::new()
        .with("SHORT.NS", MockResponse::Bars(generate_bullish_bars(MIN_BARS - 1, 100.0, 1.0)))
        .with("EMPTY.NS", MockResponse::Bars(Vec::new()));

    let report = scanner(provider, 4)
        .scan(&tickers(&["SHORT.NS", "EMPTY.NS", "UNKNOWN.NS"]), &RiskConfig::default())
        .await;

    assert!(report.signals.is_empty());
    assert_eq!(report.summary.data_unavailable, 3);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.kind == Some(ErrorKind::DataUnavailable)));
}

#[tokio::test]
async fn test_scan_evaluates_latest_session_only() {
    // Yesterday's strong uptrend followed by a short morning today
    let yesterday: Vec<Bar> = generate_bullish_bars(40, 100.0, 500.0)
        .into_iter()
        .map(|mut b| {
            b.timestamp -= Duration::days(1);
            b
        })
        .collect();
    let mut bars = yesterday;
    bars.extend(generate_bullish_bars(5, 120.0, 500.0));

    let provider = MockBarProvider::new().with("TWO.NS", MockResponse::Bars(bars));
    let report = scanner(provider, 1)
        .scan(&tickers(&["TWO.NS"]), &RiskConfig::default())
        .await;

    assert!(report.signals.is_empty());
    assert!(report.outcomes[0]
        .error
        .as_deref()
        .unwrap()
        .contains("only 5 bars"));
}

#[tokio::test]
async fn test_cancelled_scan_reports_unstarted_tickers() {
    let provider = MockBarProvider::new()
        .with("A.NS", MockResponse::Bars(generate_bullish_bars(40, 100.0, 1.0)))
        .with("B.NS", MockResponse::Bars(generate_bullish_bars(40, 100.0, 1.0)));
    let scanner = scanner(provider, 1);
    scanner.cancel_token().cancel();

    let report = scanner
        .scan(&tickers(&["A.NS", "B.NS"]), &RiskConfig::default())
        .await;

    assert!(report.is_cancelled());
    assert_eq!(report.summary.cancelled, 2);
    assert_eq!(report.summary.scanned, 0);
    assert_eq!(report.summary.failed, 0);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.status == OutcomeStatus::Cancelled));
}

#[tokio::test]
async fn test_cancel_mid_scan_drains_in_flight() {
    let mut provider = MockBarProvider::new();
    for i in 0..6 {
        provider = provider.with(
            &format!("T{}.NS", i),
            MockResponse::Slow(StdDuration::from_millis(60), generate_bearish_bars(40, 100.0)),
        );
    }
    let scanner = scanner(provider, 2);
    let cancel = scanner.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        cancel.cancel();
    });

    let list: Vec<Ticker> = (0..6).map(|i| Ticker::new(format!("T{}.NS", i))).collect();
    let report = scanner.scan(&list, &RiskConfig::default()).await;

    // the first two were in flight and finish; the rest never start
    assert_eq!(report.outcomes.len(), 6);
    assert_eq!(report.summary.no_setup, 2);
    assert_eq!(report.summary.cancelled, 4);
    assert_eq!(report.summary.scanned, 2);
}

#[tokio::test]
async fn test_scan_universe_falls_back() {
    let provider = MockBarProvider::new();
    let report = scanner(provider, 4)
        .scan_universe(&FailingListProvider, &RiskConfig::default())
        .await;

    assert_eq!(report.summary.scanned, FALLBACK_TICKERS.len());
    assert!(report.warning.unwrap().contains("niftyindices"));
}

#[tokio::test]
async fn test_static_universe_is_used() {
    let list = StaticListProvider::parse("sbin, itc", ".NS");
    let universe = intraday_sniper::universe::Universe::resolve(&list).await;
    assert_eq!(universe.source, UniverseSource::Provider);
    assert_eq!(universe.tickers, tickers(&["SBIN.NS", "ITC.NS"]));
}

// =============================================================================
// CSV snapshots
// =============================================================================

#[tokio::test]
async fn test_scan_from_csv_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let mut content = String::from("datetime,open,high,low,close,volume\n");
    for bar in generate_bullish_bars(40, 100.0, 500.0) {
        content.push_str(&format!(
            "{},{},{},{},{},{}\n",
            bar.timestamp.to_rfc3339(),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume
        ));
    }
    std::fs::write(dir.path().join("HDFCBANK.NS_1m.csv"), content).unwrap();

    let scanner = Scanner::new(
        Arc::new(CsvBarProvider::new(dir.path())),
        ScannerConfig::default(),
    );
    let report = scanner
        .scan(&tickers(&["HDFCBANK.NS", "MISSING.NS"]), &RiskConfig::default())
        .await;

    assert_eq!(report.summary.signaled, 1);
    assert_eq!(report.summary.data_unavailable, 1);
    assert_eq!(report.signals[0].ticker.as_str(), "HDFCBANK.NS");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["summary"]["signaled"], 1);
    assert_eq!(json["outcomes"][1]["kind"], "data_unavailable");
}
