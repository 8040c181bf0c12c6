//! Risk budget and position sizing
//!
//! Position sizing formula:
//! ```text
//! quantity = floor((budget * risk_pct) / (price - stop_loss))
//! ```
//!
//! If the stop is hit exactly, the loss on the position is at most
//! `budget * risk_pct`. All values are currency-agnostic as long as the
//! budget and prices share a denomination.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::{Money, Signal};

/// Default trading budget
pub const DEFAULT_BUDGET: f64 = 50_000.0;

/// Default risk per trade (1%)
pub const DEFAULT_RISK_PCT: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskConfigError {
    #[error("budget must be positive, got {0}")]
    NonPositiveBudget(f64),

    #[error("risk_pct must be in (0, 1], got {0}")]
    RiskPctOutOfRange(f64),
}

/// Operator-supplied risk budget, fixed for the duration of a scan
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskConfig {
    budget: f64,
    risk_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BUDGET,
            risk_pct: DEFAULT_RISK_PCT,
        }
    }
}

impl RiskConfig {
    pub fn new(budget: f64, risk_pct: f64) -> Result<Self, RiskConfigError> {
        Self::default().with_budget(budget)?.with_risk_pct(risk_pct)
    }

    /// Set the trading budget
    pub fn with_budget(mut self, budget: f64) -> Result<Self, RiskConfigError> {
        if !budget.is_finite() || budget <= 0.0 {
            return Err(RiskConfigError::NonPositiveBudget(budget));
        }
        self.budget = budget;
        Ok(self)
    }

    /// Set risk per trade as a fraction (e.g., 0.01 = 1%)
    pub fn with_risk_pct(mut self, risk_pct: f64) -> Result<Self, RiskConfigError> {
        if !risk_pct.is_finite() || risk_pct <= 0.0 || risk_pct > 1.0 {
            return Err(RiskConfigError::RiskPctOutOfRange(risk_pct));
        }
        self.risk_pct = risk_pct;
        Ok(self)
    }

    pub fn budget(&self) -> f64 {
        self.budget
    }

    pub fn risk_pct(&self) -> f64 {
        self.risk_pct
    }

    /// Maximum amount to lose on one trade
    pub fn risk_amount(&self) -> Money {
        let budget = Decimal::from_f64(self.budget).unwrap_or(Decimal::ZERO);
        let pct = Decimal::from_f64(self.risk_pct).unwrap_or(Decimal::ZERO);
        Money::from_decimal(budget * pct)
    }
}

/// Converts a risk budget and a stop distance into a share count
#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    risk: RiskConfig,
}

impl PositionSizer {
    pub fn new(risk: RiskConfig) -> Self {
        Self { risk }
    }

    pub fn risk(&self) -> &RiskConfig {
        &self.risk
    }

    /// Whole shares such that a stop-out loses at most the risk amount.
    /// Zero when `price <= stop_loss`.
    pub fn size(&self, price: Money, stop_loss: Money) -> u64 {
        size(&self.risk, price, stop_loss)
    }

    /// Fill in the quantity of an evaluated signal
    pub fn apply(&self, signal: Signal) -> Signal {
        let quantity = self.size(signal.price, signal.stop_loss);
        signal.with_quantity(quantity)
    }
}

/// Position size for a long entry at `price` with a stop at `stop_loss`
pub fn size(risk: &RiskConfig, price: Money, stop_loss: Money) -> u64 {
    let loss_per_share = price - stop_loss;
    if !loss_per_share.is_positive() {
        return 0;
    }

    (risk.risk_amount().inner() / loss_per_share.inner())
        .floor()
        .to_u64()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn money(d: Decimal) -> Money {
        Money::from_decimal(d)
    }

    #[test]
    fn test_defaults() {
        let risk = RiskConfig::default();
        assert_eq!(risk.budget(), 50_000.0);
        assert_eq!(risk.risk_pct(), 0.01);
        assert_eq!(risk.risk_amount(), money(dec!(500)));
    }

    #[test]
    fn test_rejects_invalid_budget() {
        assert_eq!(
            RiskConfig::new(0.0, 0.01),
            Err(RiskConfigError::NonPositiveBudget(0.0))
        );
        assert!(RiskConfig::new(-5.0, 0.01).is_err());
        assert!(RiskConfig::new(f64::NAN, 0.01).is_err());
    }

    #[test]
    fn test_rejects_invalid_risk_pct() {
        assert_eq!(
            RiskConfig::new(50_000.0, 0.0),
            Err(RiskConfigError::RiskPctOutOfRange(0.0))
        );
        assert!(RiskConfig::new(50_000.0, 1.5).is_err());
        assert!(RiskConfig::new(50_000.0, 1.0).is_ok());
    }

    #[test]
    fn test_sizing_scenario() {
        // 50,000 * 1% = 500; 500 / 1.80 = 277.7 -> 277
        let risk = RiskConfig::new(50_000.0, 0.01).unwrap();
        let qty = size(&risk, money(dec!(100.00)), money(dec!(98.20)));
        assert_eq!(qty, 277);
    }

    #[test]
    fn test_exact_division() {
        let risk = RiskConfig::new(100_000.0, 0.02).unwrap();
        let qty = size(&risk, money(dec!(100)), money(dec!(95)));
        assert_eq!(qty, 400);
    }

    #[test]
    fn test_zero_when_stop_not_below_price() {
        let risk = RiskConfig::default();
        assert_eq!(size(&risk, money(dec!(100)), money(dec!(100))), 0);
        assert_eq!(size(&risk, money(dec!(100)), money(dec!(101.5))), 0);
    }

    #[test]
    fn test_loss_bounded_by_risk_amount() {
        let risk = RiskConfig::new(75_000.0, 0.015).unwrap();
        let sizer = PositionSizer::new(risk);
        for (price, stop) in [(dec!(1523.45), dec!(1511.07)), (dec!(87.3), dec!(86.95))] {
            let qty = sizer.size(money(price), money(stop));
            let loss = Decimal::from(qty) * (price - stop);
            assert!(loss <= risk.risk_amount().inner());
            let one_more = Decimal::from(qty + 1) * (price - stop);
            assert!(one_more > risk.risk_amount().inner());
        }
    }
}
