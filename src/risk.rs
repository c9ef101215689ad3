//! Stop-loss and take-profit thresholds for an open long position.

use crate::error::{BacktestError, Result};
use serde::{Deserialize, Serialize};

/// Reason a risk rule closed a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

/// Percentage stop-loss and take-profit relative to the entry price.
///
/// Both fractions lie strictly between 0 and 1 (0.05 = 5%).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.05,
            take_profit_pct: 0.10,
        }
    }
}

impl RiskLimits {
    pub fn new(stop_loss_pct: f64, take_profit_pct: f64) -> Self {
        Self {
            stop_loss_pct,
            take_profit_pct,
        }
    }

    /// Reject fractions outside (0, 1).
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(BacktestError::InvalidConfig(format!(
                    "{} must be in (0, 1), got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Price at or below which the position is stopped out.
    pub fn stop_price(&self, entry_price: f64) -> f64 {
        entry_price * (1.0 - self.stop_loss_pct)
    }

    /// Price at or above which profits are taken.
    pub fn target_price(&self, entry_price: f64) -> f64 {
        entry_price * (1.0 + self.take_profit_pct)
    }

    /// Check a long position opened at `entry_price` against the current price.
    ///
    /// Stop-loss is checked first; with both fractions positive the two
    /// thresholds can never be hit at once.
    pub fn check(&self, entry_price: f64, current_price: f64) -> Option<ExitReason> {
        if current_price <= self.stop_price(entry_price) {
            Some(ExitReason::StopLoss)
        } else if current_price >= self.target_price(entry_price) {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }
}
