//! Signal evaluator
//!
//! ## Entry rule (latest bar only)
//! 1. Close above session VWAP
//! 2. RSI(14) above 60
//!
//! ## Levels
//! - Stop loss: entry - 1.5 x ATR(14), rounded to 2 decimals
//! - Target: entry + 2 x (entry - stop), rounded to 2 decimals
//!
//! A setup whose stop is not below the entry (zero or negative ATR) is
//! treated as a data anomaly and produces no signal.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::indicators::{IndicatorSet, MIN_BARS};
use crate::{Bar, Money, Signal, Ticker};

/// RSI must be strictly above this level
pub const RSI_THRESHOLD: f64 = 60.0;

/// Stop distance in ATR multiples
pub const STOP_ATR_MULTIPLE: Decimal = dec!(1.5);

/// Target distance in multiples of the stop distance
pub const REWARD_RISK_RATIO: Decimal = dec!(2);

/// Why an otherwise evaluable instrument could not produce levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DegenerateReason {
    #[error("vwap undefined on latest bar")]
    VwapUndefined,

    #[error("rsi undefined on latest bar")]
    RsiUndefined,

    #[error("atr undefined on latest bar")]
    AtrUndefined,

    #[error("stop loss is not below entry price")]
    NonPositiveRisk,
}

/// Detailed evaluation result for one instrument
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Entry rule holds; quantity is not yet sized
    Signaled(Signal),
    /// Entry rule does not hold
    NoSetup,
    /// Series too short, or indicators do not line up with it
    InsufficientData { bars: usize, minimum: usize },
    /// Indicators undefined or risk distance not positive
    Degenerate(DegenerateReason),
}

impl Evaluation {
    pub fn into_signal(self) -> Option<Signal> {
        match self {
            Evaluation::Signaled(signal) => Some(signal),
            _ => None,
        }
    }
}

/// Evaluate the latest bar, returning a signal only when the entry rule holds
pub fn evaluate(ticker: &Ticker, series: &[Bar], indicators: &[IndicatorSet]) -> Option<Signal> {
    assess(ticker, series, indicators).into_signal()
}

/// Evaluate the latest bar and report why no signal was produced
pub fn assess(ticker: &Ticker, series: &[Bar], indicators: &[IndicatorSet]) -> Evaluation {
    if series.len() < MIN_BARS || indicators.len() != series.len() {
        return Evaluation::InsufficientData {
            bars: series.len(),
            minimum: MIN_BARS,
        };
    }

    let (Some(bar), Some(latest)) = (series.last(), indicators.last()) else {
        return Evaluation::InsufficientData {
            bars: series.len(),
            minimum: MIN_BARS,
        };
    };

    let Some(vwap) = latest.vwap.filter(|v| v.is_finite()) else {
        return Evaluation::Degenerate(DegenerateReason::VwapUndefined);
    };
    let Some(rsi) = latest.rsi.filter(|v| v.is_finite()) else {
        return Evaluation::Degenerate(DegenerateReason::RsiUndefined);
    };

    if !(bar.close > vwap && rsi > RSI_THRESHOLD) {
        return Evaluation::NoSetup;
    }

    let Some(atr) = latest.atr.filter(|v| v.is_finite()) else {
        return Evaluation::Degenerate(DegenerateReason::AtrUndefined);
    };

    let price = Money::from_f64(bar.close).round_dp(2);
    let stop_loss = (price - Money::from_f64(atr) * STOP_ATR_MULTIPLE).round_dp(2);
    let risk_per_share = price - stop_loss;
    if !risk_per_share.is_positive() {
        return Evaluation::Degenerate(DegenerateReason::NonPositiveRisk);
    }
    let target = (price + risk_per_share * REWARD_RISK_RATIO).round_dp(2);

    Evaluation::Signaled(Signal {
        ticker: ticker.clone(),
        price,
        vwap: Money::from_f64(vwap).round_dp(2),
        rsi: (rsi * 10.0).round() / 10.0,
        stop_loss,
        target,
        quantity: 0,
        volume: bar.volume,
        avg_volume: latest.avg_volume,
    })
}
