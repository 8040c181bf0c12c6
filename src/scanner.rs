//! Universe scanner
//!
//! Per ticker: fetch bars -> latest session -> indicators -> evaluate -> size.
//! Fetches run on tokio with a bounded number in flight; each is wrapped in a
//! timeout. A failing ticker is recorded and the scan moves on. Results come
//! back in input order regardless of completion order.

use chrono::FixedOffset;
use ordered_float::OrderedFloat;
use serde::Serialize;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::indicators::{self, IndicatorEngine, MIN_BARS};
use crate::providers::{BarProvider, BarRequest, ListProvider, ProviderError};
use crate::risk::{PositionSizer, RiskConfig};
use crate::signal::{self, DegenerateReason, Evaluation};
use crate::universe::Universe;
use crate::{validate_series, SeriesError, Signal, Ticker};

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Errors
// =============================================================================

/// Coarse failure category used for counters and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Fetch failed, timed out, or the series is empty, short or invalid
    DataUnavailable,
    /// Indicators undefined or the stop is not below the entry
    ComputationDegenerate,
    /// Not evaluated because the scan was cancelled
    Cancelled,
}

/// Why one instrument produced no evaluation
#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] ProviderError),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("no bars returned")]
    EmptySeries,

    #[error("only {bars} bars in latest session, need {minimum}")]
    InsufficientData { bars: usize, minimum: usize },

    #[error("invalid series: {0}")]
    InvalidSeries(#[from] SeriesError),

    #[error("degenerate computation: {0}")]
    Degenerate(#[from] DegenerateReason),

    #[error("scan cancelled before this ticker started")]
    Cancelled,

    #[error("worker task failed: {0}")]
    Aborted(String),
}

impl InstrumentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstrumentError::Degenerate(_) => ErrorKind::ComputationDegenerate,
            InstrumentError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::DataUnavailable,
        }
    }
}

pub type InstrumentResult = Result<Option<Signal>, InstrumentError>;

// =============================================================================
// Cancellation
// =============================================================================

#[derive(Debug, Default)]
struct CancelState {
    flag: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag. Once set, no new fetches start.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.flag.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Signaled,
    NoSetup,
    Failed,
    Cancelled,
}

/// What happened to one ticker
#[derive(Debug, Clone, Serialize)]
pub struct TickerOutcome {
    pub ticker: Ticker,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TickerOutcome {
    pub fn from_result(ticker: Ticker, result: &InstrumentResult) -> Self {
        let (status, kind, error) = match result {
            Ok(Some(_)) => (OutcomeStatus::Signaled, None, None),
            Ok(None) => (OutcomeStatus::NoSetup, None, None),
            Err(InstrumentError::Cancelled) => {
                (OutcomeStatus::Cancelled, Some(ErrorKind::Cancelled), None)
            }
            Err(e) => (OutcomeStatus::Failed, Some(e.kind()), Some(e.to_string())),
        };
        Self {
            ticker,
            status,
            kind,
            error,
        }
    }
}

/// Counts over one scan; `scanned == signaled + no_setup + failed`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub scanned: usize,
    pub signaled: usize,
    pub no_setup: usize,
    /// `data_unavailable + degenerate`
    pub failed: usize,
    pub data_unavailable: usize,
    pub degenerate: usize,
    pub cancelled: usize,
}

impl ScanSummary {
    /// Cancelled tickers were never fetched, so they are not counted as scanned.
    pub fn record(&mut self, result: &InstrumentResult) {
        if !matches!(result, Err(e) if e.kind() == ErrorKind::Cancelled) {
            self.scanned += 1;
        }
        match result {
            Ok(Some(_)) => self.signaled += 1,
            Ok(None) => self.no_setup += 1,
            Err(e) => match e.kind() {
                ErrorKind::DataUnavailable => {
                    self.failed += 1;
                    self.data_unavailable += 1;
                }
                ErrorKind::ComputationDegenerate => {
                    self.failed += 1;
                    self.degenerate += 1;
                }
                ErrorKind::Cancelled => self.cancelled += 1,
            },
        }
    }

    /// Tickers evaluated without a setup
    pub fn skipped(&self) -> usize {
        self.no_setup
    }
}

/// Result of scanning a universe, in input order
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub signals: Vec<Signal>,
    pub outcomes: Vec<TickerOutcome>,
    pub summary: ScanSummary,
    /// Set when the universe fell back to the built-in list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ScanReport {
    /// Signal with the highest last-bar volume; ties go to the earlier ticker
    pub fn top_pick(&self) -> Option<&Signal> {
        self.signals
            .iter()
            .min_by_key(|s| Reverse(OrderedFloat(s.volume)))
    }

    /// Reorder signals by last-bar volume, highest first (stable)
    pub fn sort_by_volume(&mut self) {
        self.signals.sort_by_key(|s| Reverse(OrderedFloat(s.volume)));
    }

    pub fn is_cancelled(&self) -> bool {
        self.summary.cancelled > 0
    }
}

// =============================================================================
// Scanner
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ScannerConfig {
    /// Maximum fetches in flight; 1 scans sequentially
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    pub request: BarRequest,
    pub session_offset: FixedOffset,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            request: BarRequest::default(),
            session_offset: indicators::ist(),
        }
    }
}

impl ScannerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_request(mut self, request: BarRequest) -> Self {
        self.request = request;
        self
    }

    pub fn with_session_offset(mut self, offset: FixedOffset) -> Self {
        self.session_offset = offset;
        self
    }
}

/// Scans tickers against one bar provider
#[derive(Clone)]
pub struct Scanner {
    provider: Arc<dyn BarProvider>,
    engine: IndicatorEngine,
    config: ScannerConfig,
    cancel: CancelToken,
}

impl Scanner {
    pub fn new(provider: Arc<dyn BarProvider>, config: ScannerConfig) -> Self {
        Self {
            provider,
            engine: IndicatorEngine::default().with_session_offset(config.session_offset),
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Resolve the universe from `list` (falling back when needed) and scan it
    pub async fn scan_universe(&self, list: &dyn ListProvider, risk: &RiskConfig) -> ScanReport {
        let universe = Universe::resolve(list).await;
        let mut report = self.scan(&universe.tickers, risk).await;
        report.warning = universe.warning;
        report
    }

    pub async fn scan(&self, tickers: &[Ticker], risk: &RiskConfig) -> ScanReport {
        self.scan_with_progress(tickers, risk, |_| {}).await
    }

    /// Scan, calling `on_progress` as each ticker finishes (completion order)
    pub async fn scan_with_progress<F>(
        &self,
        tickers: &[Ticker],
        risk: &RiskConfig,
        on_progress: F,
    ) -> ScanReport
    where
        F: Fn(&TickerOutcome),
    {
        let started = Instant::now();
        let sizer = PositionSizer::new(*risk);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut results: Vec<Option<InstrumentResult>> = (0..tickers.len()).map(|_| None).collect();
        let mut tasks = JoinSet::new();

        info!(
            tickers = tickers.len(),
            provider = self.provider.name(),
            concurrency = self.config.concurrency,
            "Starting scan"
        );

        let record = |index: usize, result: InstrumentResult, results: &mut [Option<InstrumentResult>]| {
            on_progress(&TickerOutcome::from_result(tickers[index].clone(), &result));
            results[index] = Some(result);
        };

        for (index, ticker) in tickers.iter().enumerate() {
            // Acquire a worker slot, draining finished tasks while waiting
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break None,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        match joined {
                            Ok((i, result)) => record(i, result, &mut results),
                            Err(e) => warn!(error = %e, "Scan worker failed"),
                        }
                    }
                    permit = semaphore.clone().acquire_owned() => break permit.ok(),
                }
            };
            let Some(permit) = permit else {
                info!(remaining = tickers.len() - index, "Scan cancelled, not starting remaining tickers");
                break;
            };

            let scanner = self.clone();
            let ticker = ticker.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = scanner.scan_ticker(&ticker, &sizer).await;
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => record(index, result, &mut results),
                Err(e) => warn!(error = %e, "Scan worker failed"),
            }
        }

        let mut report = ScanReport::default();
        for (index, slot) in results.into_iter().enumerate() {
            let ticker = tickers[index].clone();
            let result = slot.unwrap_or_else(|| {
                if self.cancel.is_cancelled() {
                    Err(InstrumentError::Cancelled)
                } else {
                    Err(InstrumentError::Aborted("worker did not return".into()))
                }
            });
            report.summary.record(&result);
            report.outcomes.push(TickerOutcome::from_result(ticker, &result));
            if let Ok(Some(signal)) = result {
                report.signals.push(signal);
            }
        }

        let s = &report.summary;
        info!(
            scanned = s.scanned,
            signaled = s.signaled,
            no_setup = s.no_setup,
            failed = s.failed,
            data_unavailable = s.data_unavailable,
            degenerate = s.degenerate,
            cancelled = s.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scan complete"
        );
        report
    }

    /// Fetch, evaluate and size one ticker
    pub async fn scan_ticker(&self, ticker: &Ticker, sizer: &PositionSizer) -> InstrumentResult {
        if self.cancel.is_cancelled() {
            return Err(InstrumentError::Cancelled);
        }

        let result = self.evaluate_ticker(ticker, sizer).await;
        match &result {
            Ok(Some(signal)) => info!(
                ticker = %ticker,
                price = %signal.price,
                rsi = signal.rsi,
                quantity = signal.quantity,
                "Signal"
            ),
            Ok(None) => debug!(ticker = %ticker, "No setup"),
            Err(e) => warn!(ticker = %ticker, kind = ?e.kind(), error = %e, "Skipping ticker"),
        }
        result
    }

    async fn evaluate_ticker(&self, ticker: &Ticker, sizer: &PositionSizer) -> InstrumentResult {
        let fetch = self.provider.fetch_bars(ticker, &self.config.request);
        let bars = tokio::time::timeout(self.config.fetch_timeout, fetch)
            .await
            .map_err(|_| InstrumentError::Timeout(self.config.fetch_timeout))??;

        if bars.is_empty() {
            return Err(InstrumentError::EmptySeries);
        }
        validate_series(&bars)?;

        let session = indicators::latest_session(&bars, self.config.session_offset);
        if session.len() < MIN_BARS {
            return Err(InstrumentError::InsufficientData {
                bars: session.len(),
                minimum: MIN_BARS,
            });
        }

        let values = self.engine.compute(session);
        match signal::assess(ticker, session, &values) {
            Evaluation::Signaled(signal) => Ok(Some(sizer.apply(signal))),
            Evaluation::NoSetup => Ok(None),
            Evaluation::InsufficientData { bars, minimum } => {
                Err(InstrumentError::InsufficientData { bars, minimum })
            }
            Evaluation::Degenerate(reason) => Err(reason.into()),
        }
    }
}
