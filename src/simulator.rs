//! Step-by-step order simulation over a price/signal series.
//!
//! Each timestep resolves to exactly one [`Transition`], checked in priority
//! order:
//!
//! 1. **Entry** - an enter signal with enough cash buys `share_size` shares at
//!    the close and records the close as the entry price.
//! 2. **Signal exit** - an exit signal while holding sells everything.
//! 3. **Risk exit** - while holding, a close at or beyond the stop-loss or
//!    take-profit threshold sells everything.
//! 4. **Hold** - nothing changes.
//!
//! After the transition the step's equity is `cash + shares * close`.
//!
//! Adding to an open position overwrites the entry price with the new close
//! instead of averaging the cost basis, so risk thresholds always track the
//! most recent entry. This is a known simplification.

use crate::error::{BacktestError, Result};
use crate::risk::{ExitReason, RiskLimits};
use crate::types::{Fill, FillReason, PriceSignalSeries, Side, SignalDelta, Timestep};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Parameters for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Starting cash.
    pub initial_balance: f64,
    /// Shares bought on every entry signal.
    pub share_size: u64,
    /// Stop-loss as a fraction of the entry price.
    pub stop_loss_pct: f64,
    /// Take-profit as a fraction of the entry price.
    pub take_profit_pct: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            share_size: 10,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.10,
        }
    }
}

impl SimulationConfig {
    pub fn with_risk(mut self, stop_loss_pct: f64, take_profit_pct: f64) -> Self {
        self.stop_loss_pct = stop_loss_pct;
        self.take_profit_pct = take_profit_pct;
        self
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits::new(self.stop_loss_pct, self.take_profit_pct)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.initial_balance.is_finite() || self.initial_balance <= 0.0 {
            return Err(BacktestError::InvalidConfig(format!(
                "initial_balance must be positive, got {}",
                self.initial_balance
            )));
        }
        if self.share_size == 0 {
            return Err(BacktestError::InvalidConfig(
                "share_size must be at least 1".to_string(),
            ));
        }
        self.risk_limits().validate()
    }
}

/// Account state carried from one step to the next.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub cash_balance: f64,
    pub shares_held: u64,
    /// Close at the most recent entry; 0 while flat.
    pub entry_price: f64,
    /// Cash paid for the shares currently held.
    pub position_cost: f64,
}

impl SimulationState {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            cash_balance: initial_balance,
            shares_held: 0,
            entry_price: 0.0,
            position_cost: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.shares_held == 0
    }

    /// Mark-to-market value at `price`.
    pub fn equity(&self, price: f64) -> f64 {
        self.cash_balance + self.shares_held as f64 * price
    }

    fn liquidate(&mut self, price: f64) {
        self.cash_balance += price * self.shares_held as f64;
        self.shares_held = 0;
        self.entry_price = 0.0;
        self.position_cost = 0.0;
    }
}

/// Which rule fired on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    Entry,
    SignalExit,
    RiskExit(ExitReason),
    Hold,
}

impl Transition {
    /// Whether the transition executed an order.
    pub fn is_trade(&self) -> bool {
        !matches!(self, Transition::Hold)
    }
}

/// Result of applying one timestep to a state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub state: SimulationState,
    pub transition: Transition,
    pub equity: f64,
}

/// Apply one timestep to `state`.
///
/// An entry whose share count would overflow `u64` is treated like an
/// unaffordable one.
pub fn step(
    state: &SimulationState,
    timestep: &Timestep,
    config: &SimulationConfig,
) -> StepOutcome {
    let price = timestep.close;
    let cost = price * config.share_size as f64;
    let mut next = *state;

    let entry_shares = if timestep.delta == SignalDelta::Enter && state.cash_balance >= cost {
        state.shares_held.checked_add(config.share_size)
    } else {
        None
    };

    let transition = if let Some(shares) = entry_shares {
        next.cash_balance -= cost;
        next.shares_held = shares;
        next.entry_price = price;
        next.position_cost += cost;
        Transition::Entry
    } else if timestep.delta == SignalDelta::Exit && !state.is_flat() {
        next.liquidate(price);
        Transition::SignalExit
    } else if let Some(reason) = risk_exit(state, price, config) {
        next.liquidate(price);
        Transition::RiskExit(reason)
    } else {
        Transition::Hold
    };

    StepOutcome {
        state: next,
        transition,
        equity: next.equity(price),
    }
}

fn risk_exit(state: &SimulationState, price: f64, config: &SimulationConfig) -> Option<ExitReason> {
    if state.is_flat() {
        return None;
    }
    config.risk_limits().check(state.entry_price, price)
}

/// Output of a full simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    /// Equity after each step, same length as the input.
    pub equity_curve: Vec<f64>,
    /// State after each step.
    pub states: Vec<SimulationState>,
    pub transitions: Vec<Transition>,
    pub fills: Vec<Fill>,
}

impl Simulation {
    pub fn final_state(&self) -> Option<&SimulationState> {
        self.states.last()
    }
}

/// Run the whole series through [`step`].
pub fn simulate(series: &PriceSignalSeries, config: &SimulationConfig) -> Result<Simulation> {
    config.validate()?;

    let n = series.len();
    let mut simulation = Simulation {
        equity_curve: Vec::with_capacity(n),
        states: Vec::with_capacity(n),
        transitions: Vec::with_capacity(n),
        fills: Vec::new(),
    };

    let mut state = SimulationState::new(config.initial_balance);

    for (i, timestep) in series.steps().iter().enumerate() {
        let outcome = step(&state, timestep, config);

        if let Some(fill) = fill_for(i, timestep, &state, &outcome, config) {
            debug!(
                "{} {} x{} @ {:.2} ({})",
                fill.timestamp.format("%Y-%m-%d"),
                fill.side,
                fill.quantity,
                fill.price,
                fill.reason
            );
            simulation.fills.push(fill);
        }

        state = outcome.state;
        simulation.equity_curve.push(outcome.equity);
        simulation.states.push(state);
        simulation.transitions.push(outcome.transition);
    }

    Ok(simulation)
}

fn fill_for(
    index: usize,
    timestep: &Timestep,
    before: &SimulationState,
    outcome: &StepOutcome,
    config: &SimulationConfig,
) -> Option<Fill> {
    let price = timestep.close;
    let (side, quantity, reason) = match outcome.transition {
        Transition::Hold => return None,
        Transition::Entry => (Side::Buy, config.share_size, FillReason::Entry),
        Transition::SignalExit => (Side::Sell, before.shares_held, FillReason::Signal),
        Transition::RiskExit(ExitReason::StopLoss) => {
            (Side::Sell, before.shares_held, FillReason::StopLoss)
        }
        Transition::RiskExit(ExitReason::TakeProfit) => {
            (Side::Sell, before.shares_held, FillReason::TakeProfit)
        }
    };

    let realized_pnl = match side {
        Side::Sell => Some(price * quantity as f64 - before.position_cost),
        Side::Buy => None,
    };

    Some(Fill {
        index,
        timestamp: timestep.timestamp,
        side,
        quantity,
        price,
        reason,
        realized_pnl,
    })
}
