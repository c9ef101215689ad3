//! Cicada - a single-asset signal backtester.
//!
//! # Overview
//!
//! Cicada takes a daily price series annotated with discrete trading signals
//! (+1 enter long, 0 hold, -1 exit) and simulates fixed-size market orders:
//!
//! - **Fixed sizing**: every entry buys the same number of shares, if affordable
//! - **Risk exits**: percentage stop-loss and take-profit relative to the entry price
//! - **Equity curve**: mark-to-market account value at every step
//! - **Metrics**: total return, annualized Sharpe ratio, maximum drawdown
//! - **Sweeps**: parallel runs over stop-loss / take-profit grids
//! - **Tabular I/O**: reads a date-indexed CSV, writes it back with a `Balance` column
//!
//! # Quick Start
//!
//! ```no_run
//! use cicada::{
//!     data::{load_csv, DataConfig},
//!     engine::Engine,
//!     simulator::SimulationConfig,
//! };
//!
//! let series = load_csv("strategy_output.csv", &DataConfig::default()).unwrap();
//! let engine = Engine::new(SimulationConfig::default());
//! let result = engine.run(&series).unwrap();
//!
//! println!("Return: {:.2}", result.metrics.total_return);
//! match result.metrics.sharpe_ratio {
//!     Some(sharpe) => println!("Sharpe: {:.2}", sharpe),
//!     None => println!("Sharpe: undefined"),
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Core data types (Timestep, PriceSignalSeries, Fill, EquityPoint)
//! - [`simulator`]: Per-step order simulation
//! - [`risk`]: Stop-loss and take-profit thresholds
//! - [`analytics`]: Performance metrics and reporting
//! - [`engine`]: Backtest runs and parallel parameter sweeps
//! - [`data`]: CSV loading and validation
//! - [`export`]: CSV and JSON output
//! - [`config`]: TOML configuration file support

pub mod analytics;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod export;
pub mod risk;
pub mod simulator;
pub mod types;

// Re-exports for convenience
pub use analytics::{
    compute_metrics, daily_returns, drawdown_series, max_drawdown, sharpe_ratio,
    PerformanceMetrics, ResultFormatter,
};
pub use engine::{BacktestResult, Engine, SweepResult};
pub use error::{BacktestError, Result};
pub use simulator::{simulate, step, SimulationConfig, SimulationState, Transition};
pub use types::{EquityPoint, Fill, FillReason, PriceSignalSeries, Side, SignalDelta, Timestep};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::analytics::{compute_metrics, PerformanceMetrics};
    pub use crate::data::{load_csv, DataConfig};
    pub use crate::engine::{BacktestResult, Engine};
    pub use crate::error::{BacktestError, Result};
    pub use crate::export::Exporter;
    pub use crate::simulator::{simulate, SimulationConfig};
    pub use crate::types::{PriceSignalSeries, SignalDelta, Timestep};
}
