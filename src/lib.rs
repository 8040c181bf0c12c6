//! Intraday Sniper
//!
//! Scans a universe of NSE equities for an intraday momentum setup (close
//! above session VWAP with RSI(14) above 60) and turns each hit into trade
//! parameters: entry, ATR-based stop loss, 2R target and a position size
//! bounded by a risk budget.
//!
//! Pipeline per ticker:
//! ```text
//! BarProvider -> indicators::compute -> signal::assess -> PositionSizer
//! ```
//! [`scanner::Scanner`] runs the pipeline across a ticker list and collects
//! a [`scanner::ScanReport`].

pub mod common;
pub mod config;
pub mod indicators;
pub mod providers;
pub mod risk;
pub mod scanner;
pub mod signal;
pub mod types;
pub mod universe;

pub use config::{Config, DataSource};
pub use indicators::IndicatorSet;
pub use risk::{PositionSizer, RiskConfig};
pub use scanner::{CancelToken, ErrorKind, InstrumentError, ScanReport, ScanSummary, Scanner};
pub use types::*;
