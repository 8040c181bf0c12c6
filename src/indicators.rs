//! Indicator engine: session VWAP, Wilder RSI and Wilder ATR
//!
//! All indicators are computed per trading session. A series handed to
//! [`IndicatorEngine::compute`] is split at session boundaries (calendar day in
//! the exchange's UTC offset) and each session is evaluated on its own, so
//! VWAP, RSI and ATR of one session never see bars of another.
//!
//! Values for bar `i` depend only on bars `0..=i` of the same session.

use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use ta::indicators::SimpleMovingAverage;
use ta::Next;

use crate::Bar;

/// Lookback for RSI
pub const RSI_PERIOD: usize = 14;

/// Lookback for ATR
pub const ATR_PERIOD: usize = 14;

/// Lookback for the trailing volume average
pub const VOLUME_PERIOD: usize = 10;

/// Minimum session length for stable indicator values
pub const MIN_BARS: usize = 20;

/// NSE/BSE trading sessions are dated in IST
pub const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Exchange offset used to date sessions (IST)
pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Derived values for one bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub vwap: Option<f64>,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub avg_volume: Option<f64>,
}

/// Indicator engine configuration
#[derive(Debug, Clone, Copy)]
pub struct IndicatorEngine {
    pub rsi_period: usize,
    pub atr_period: usize,
    pub volume_period: usize,
    pub session_offset: FixedOffset,
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self {
            rsi_period: RSI_PERIOD,
            atr_period: ATR_PERIOD,
            volume_period: VOLUME_PERIOD,
            session_offset: ist(),
        }
    }
}

impl IndicatorEngine {
    pub fn with_session_offset(mut self, offset: FixedOffset) -> Self {
        self.session_offset = offset;
        self
    }

    /// Compute indicators for every bar, one output per input bar
    pub fn compute(&self, series: &[Bar]) -> Vec<IndicatorSet> {
        let mut result = Vec::with_capacity(series.len());
        for range in session_ranges(series, self.session_offset) {
            result.extend(self.compute_session(&series[range]));
        }
        result
    }

    fn compute_session(&self, bars: &[Bar]) -> Vec<IndicatorSet> {
        let high: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let low: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volume: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let vwap_values = vwap(&high, &low, &close, &volume);
        let rsi_values = rsi(&close, self.rsi_period);
        let atr_values = atr(&high, &low, &close, self.atr_period);
        let volume_values = sma(&volume, self.volume_period);

        (0..bars.len())
            .map(|i| IndicatorSet {
                vwap: vwap_values[i],
                rsi: rsi_values[i],
                atr: atr_values[i],
                avg_volume: volume_values[i],
            })
            .collect()
    }
}

/// Compute indicators with the default engine (IST sessions, 14-bar lookbacks)
pub fn compute(series: &[Bar]) -> Vec<IndicatorSet> {
    IndicatorEngine::default().compute(series)
}

// =============================================================================
// Sessions
// =============================================================================

/// Calendar date of a bar in the exchange's offset
pub fn session_date(bar: &Bar, offset: FixedOffset) -> NaiveDate {
    bar.timestamp.with_timezone(&offset).date_naive()
}

/// Index ranges of consecutive bars sharing a session date
pub fn session_ranges(series: &[Bar], offset: FixedOffset) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for (_, session) in &series.iter().chunk_by(|b| session_date(b, offset)) {
        let len = session.count();
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Bars of the most recent session only
pub fn latest_session(series: &[Bar], offset: FixedOffset) -> &[Bar] {
    match session_ranges(series, offset).pop() {
        Some(range) => &series[range],
        None => series,
    }
}

// =============================================================================
// Moving averages
// =============================================================================

/// Simple moving average via the `ta` crate
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![None; values.len()];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let avg = indicator.next(value);
            (i + 1 >= period).then_some(avg)
        })
        .collect()
}

/// Wilder's smoothing: seeded by the SMA of the first `period` values, then
/// `next = (prev * (period - 1) + current) / period`
fn wilders_smooth(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![None; values.len()];
    }

    let mut result = Vec::with_capacity(values.len());
    let mut smoothed: Option<f64> = None;

    for i in 0..values.len() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = values[0..period].iter().sum();
            smoothed = Some(sum / period as f64);
            result.push(smoothed);
        } else if let Some(prev) = smoothed {
            let next = (prev * (period - 1) as f64 + values[i]) / period as f64;
            smoothed = Some(next);
            result.push(smoothed);
        } else {
            result.push(None);
        }
    }

    result
}

// =============================================================================
// Volatility
// =============================================================================

/// True range; the first bar has no previous close and uses high - low
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..high.len())
        .map(|i| {
            let hl = high[i] - low[i];
            if i == 0 {
                hl
            } else {
                let hc = (high[i] - close[i - 1]).abs();
                let lc = (low[i] - close[i - 1]).abs();
                hl.max(hc).max(lc)
            }
        })
        .collect()
}

/// Average True Range using Wilder's smoothing. First value at `period - 1`.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.len() != low.len() || high.len() != close.len() {
        return vec![None; close.len()];
    }
    wilders_smooth(&true_range(high, low, close), period)
}

// =============================================================================
// Momentum
// =============================================================================

/// Relative Strength Index using Wilder's smoothing.
///
/// Needs `period` close-to-close changes, so the first value is at index
/// `period`. If there are no losses RSI is 100, and 50 when price never moved.
pub fn rsi(close: &[f64], period: usize) -> Vec<Option<f64>> {
    if close.is_empty() || period == 0 {
        return vec![None; close.len()];
    }

    let (gains, losses): (Vec<f64>, Vec<f64>) = close
        .windows(2)
        .map(|w| {
            let change = w[1] - w[0];
            (change.max(0.0), (-change).max(0.0))
        })
        .unzip();

    let avg_gain = wilders_smooth(&gains, period);
    let avg_loss = wilders_smooth(&losses, period);

    let mut result = Vec::with_capacity(close.len());
    result.push(None);
    result.extend(
        avg_gain
            .into_iter()
            .zip(avg_loss)
            .map(|pair| match pair {
                (Some(gain), Some(loss)) => Some(rsi_from_averages(gain, loss)),
                _ => None,
            }),
    );
    result
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

// =============================================================================
// Volume
// =============================================================================

/// Cumulative VWAP over the given bars (one session).
///
/// Undefined until some volume has traded.
pub fn vwap(high: &[f64], low: &[f64], close: &[f64], volume: &[f64]) -> Vec<Option<f64>> {
    let mut cumulative_tp_vol = 0.0;
    let mut cumulative_vol = 0.0;
    let mut result = Vec::with_capacity(close.len());

    for i in 0..close.len() {
        let typical_price = (high[i] + low[i] + close[i]) / 3.0;
        cumulative_tp_vol += typical_price * volume[i];
        cumulative_vol += volume[i];

        if cumulative_vol > 0.0 {
            result.push(Some(cumulative_tp_vol / cumulative_vol));
        } else {
            result.push(None);
        }
    }

    result
}

// =============================================================================
// Tests
// =============================================================================
