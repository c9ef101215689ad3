//! Core data types for the backtester.

use crate::error::{BacktestError, Result};
use chrono::{DateTime, Utc};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position change requested by a strategy for a single timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SignalDelta {
    /// Enter (or add to) a long position. Encoded as +1.
    Enter,
    /// No change. Encoded as 0.
    #[default]
    Hold,
    /// Exit the whole long position. Encoded as -1.
    Exit,
}

impl SignalDelta {
    /// Map a numeric signal value to a delta.
    ///
    /// Only exactly -1, 0 and +1 are accepted.
    pub fn from_value(value: f64) -> Option<Self> {
        if value == 1.0 {
            Some(SignalDelta::Enter)
        } else if value == 0.0 {
            Some(SignalDelta::Hold)
        } else if value == -1.0 {
            Some(SignalDelta::Exit)
        } else {
            None
        }
    }

    /// Numeric encoding of the delta.
    pub fn value(&self) -> i8 {
        match self {
            SignalDelta::Enter => 1,
            SignalDelta::Hold => 0,
            SignalDelta::Exit => -1,
        }
    }
}

impl TryFrom<i64> for SignalDelta {
    type Error = BacktestError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(SignalDelta::Enter),
            0 => Ok(SignalDelta::Hold),
            -1 => Ok(SignalDelta::Exit),
            other => Err(BacktestError::InvalidInput(format!(
                "signal value {} is outside {{-1, 0, 1}}",
                other
            ))),
        }
    }
}

impl fmt::Display for SignalDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// One row of the input series: a closing price and the signal for that day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestep {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub delta: SignalDelta,
}

impl Timestep {
    pub fn new(timestamp: DateTime<Utc>, close: f64, delta: SignalDelta) -> Self {
        Self {
            timestamp,
            close,
            delta,
        }
    }
}

/// Raw table rows carried alongside a series so auxiliary columns
/// can be written back untouched.
#[derive(Debug, Clone, Default)]
pub struct Passthrough {
    pub headers: StringRecord,
    pub records: Vec<StringRecord>,
}

/// Validated, ordered price and signal series.
///
/// Guaranteed non-empty, with finite positive closes and strictly
/// increasing timestamps.
#[derive(Debug, Clone)]
pub struct PriceSignalSeries {
    steps: Vec<Timestep>,
    passthrough: Option<Passthrough>,
}

impl PriceSignalSeries {
    /// Build a series, rejecting malformed input.
    pub fn new(steps: Vec<Timestep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(BacktestError::InvalidInput(
                "series must contain at least one timestep".to_string(),
            ));
        }

        for (i, step) in steps.iter().enumerate() {
            if !step.close.is_finite() || step.close <= 0.0 {
                return Err(BacktestError::InvalidInput(format!(
                    "close price at step {} ({}) must be a positive number, got {}",
                    i, step.timestamp, step.close
                )));
            }
        }

        if let Some(i) = steps
            .windows(2)
            .position(|w| w[1].timestamp <= w[0].timestamp)
        {
            return Err(BacktestError::InvalidInput(format!(
                "timestamps must be strictly increasing: step {} ({}) does not follow step {} ({})",
                i + 1,
                steps[i + 1].timestamp,
                i,
                steps[i].timestamp
            )));
        }

        Ok(Self {
            steps,
            passthrough: None,
        })
    }

    /// Attach the raw rows the series was read from.
    pub fn with_passthrough(mut self, passthrough: Passthrough) -> Result<Self> {
        if passthrough.records.len() != self.steps.len() {
            return Err(BacktestError::InvalidInput(format!(
                "passthrough has {} rows but the series has {}",
                passthrough.records.len(),
                self.steps.len()
            )));
        }
        self.passthrough = Some(passthrough);
        Ok(self)
    }

    pub fn steps(&self) -> &[Timestep] {
        &self.steps
    }

    pub fn passthrough(&self) -> Option<&Passthrough> {
        self.passthrough.as_ref()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false for a constructed series; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.steps.iter().map(|s| s.close).collect()
    }

    pub fn first_timestamp(&self) -> DateTime<Utc> {
        self.steps[0].timestamp
    }

    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.steps[self.steps.len() - 1].timestamp
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Why a fill happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillReason {
    /// Entry signal.
    Entry,
    /// Exit signal.
    Signal,
    /// Price fell to the stop-loss threshold.
    StopLoss,
    /// Price rose to the take-profit threshold.
    TakeProfit,
}

impl fmt::Display for FillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillReason::Entry => write!(f, "entry"),
            FillReason::Signal => write!(f, "signal"),
            FillReason::StopLoss => write!(f, "stop-loss"),
            FillReason::TakeProfit => write!(f, "take-profit"),
        }
    }
}

/// An executed market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// Index of the timestep the fill happened on.
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub quantity: u64,
    pub price: f64,
    pub reason: FillReason,
    /// Proceeds minus cost of the shares sold. Only set on sells.
    pub realized_pnl: Option<f64>,
}

impl Fill {
    pub fn is_exit(&self) -> bool {
        self.side == Side::Sell
    }

    /// Notional value of the fill.
    pub fn value(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

/// Mark-to-market account state at one timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cash: f64,
    pub shares: u64,
    /// Fractional decline from the running peak, always <= 0.
    pub drawdown: f64,
}
