//! Backtest execution engine.
//!
//! Runs the simulator over a series, hands the equity curve to the metrics
//! calculator and returns both together. Parameter sweeps run independent
//! backtests in parallel.

use crate::analytics::{compute_metrics, drawdown_series, PerformanceMetrics};
use crate::error::Result;
use crate::simulator::{simulate, SimulationConfig};
use crate::types::{EquityPoint, Fill, PriceSignalSeries};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{info, warn};

/// Results from a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Configuration used.
    pub config: SimulationConfig,
    /// Summary statistics.
    pub metrics: PerformanceMetrics,
    /// Equity curve, one point per input timestep.
    pub equity_curve: Vec<EquityPoint>,
    /// Executed orders.
    pub fills: Vec<Fill>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl BacktestResult {
    /// Equity values only.
    pub fn balances(&self) -> Vec<f64> {
        self.equity_curve.iter().map(|p| p.equity).collect()
    }

    pub fn total_return(&self) -> f64 {
        self.metrics.total_return
    }

    pub fn sharpe_ratio(&self) -> Option<f64> {
        self.metrics.sharpe_ratio
    }

    pub fn max_drawdown(&self) -> f64 {
        self.metrics.max_drawdown
    }
}

/// One configuration of a parameter sweep and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub config: SimulationConfig,
    pub result: BacktestResult,
}

/// The backtest engine.
pub struct Engine {
    config: SimulationConfig,
    show_progress: bool,
}

impl Engine {
    /// Create a new engine.
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            show_progress: false,
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(SimulationConfig::default())
    }

    /// Show a progress bar during sweeps.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run a backtest over `series`.
    pub fn run(&self, series: &PriceSignalSeries) -> Result<BacktestResult> {
        info!(
            "Running backtest: {} steps, balance {:.2}, {} shares per entry, stop {:.1}%, target {:.1}%",
            series.len(),
            self.config.initial_balance,
            self.config.share_size,
            self.config.stop_loss_pct * 100.0,
            self.config.take_profit_pct * 100.0
        );

        let simulation = simulate(series, &self.config)?;
        let metrics = compute_metrics(&simulation.equity_curve, self.config.initial_balance)
            .with_fills(&simulation.fills);

        let drawdowns = drawdown_series(&simulation.equity_curve);
        let equity_curve = series
            .steps()
            .iter()
            .zip(&simulation.states)
            .zip(simulation.equity_curve.iter().zip(drawdowns))
            .map(|((timestep, state), (&equity, drawdown))| EquityPoint {
                timestamp: timestep.timestamp,
                equity,
                cash: state.cash_balance,
                shares: state.shares_held,
                drawdown,
            })
            .collect();

        info!(
            "Backtest complete: final equity {:.2}, return {:.2}, {} fills",
            metrics.final_equity,
            metrics.total_return,
            simulation.fills.len()
        );

        Ok(BacktestResult {
            config: self.config.clone(),
            metrics,
            equity_curve,
            fills: simulation.fills,
            start_time: series.first_timestamp(),
            end_time: series.last_timestamp(),
        })
    }

    /// Run one backtest per configuration in parallel.
    ///
    /// Results keep the order of `configs`. Configurations that fail
    /// validation are logged and skipped.
    pub fn sweep(
        &self,
        series: &PriceSignalSeries,
        configs: Vec<SimulationConfig>,
    ) -> Result<Vec<SweepResult>> {
        info!("Running sweep over {} configurations", configs.len());

        let progress = if self.show_progress {
            let pb = ProgressBar::new(configs.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        let results: Vec<SweepResult> = configs
            .into_par_iter()
            .filter_map(|config| {
                let engine = Engine::new(config.clone());
                let outcome = engine.run(series);
                if let Some(ref pb) = progress {
                    pb.inc(1);
                }
                match outcome {
                    Ok(result) => Some(SweepResult { config, result }),
                    Err(e) => {
                        warn!("Sweep run failed for {:?}: {}", config, e);
                        None
                    }
                }
            })
            .collect();

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        Ok(results)
    }

    /// Sweep every stop-loss / take-profit pair on top of the engine's
    /// base configuration.
    pub fn sweep_risk_grid(
        &self,
        series: &PriceSignalSeries,
        stop_losses: &[f64],
        take_profits: &[f64],
    ) -> Result<Vec<SweepResult>> {
        let configs = stop_losses
            .iter()
            .flat_map(|&sl| {
                take_profits
                    .iter()
                    .map(move |&tp| self.config.clone().with_risk(sl, tp))
            })
            .collect();
        self.sweep(series, configs)
    }
}

/// Order sweep results by Sharpe ratio, best first; undefined ratios last.
pub fn sort_by_sharpe(results: &mut [SweepResult]) {
    results.sort_by(|a, b| {
        match (a.result.sharpe_ratio(), b.result.sharpe_ratio()) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BacktestError;
    use crate::types::{SignalDelta, Timestep};
    use chrono::TimeZone;

    fn create_test_series() -> PriceSignalSeries {
        let closes = [
            100.0, 101.0, 103.0, 102.0, 104.0, 98.0, 96.0, 99.0, 101.0, 103.0, 104.0, 102.0,
        ];
        let deltas = [1, 0, 0, -1, 1, 0, 0, 0, 1, 0, 0, -1];
        let steps = closes
            .iter()
            .zip(deltas)
            .enumerate()
            .map(|(i, (&close, delta))| {
                Timestep::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::days(i as i64),
                    close,
                    SignalDelta::try_from(delta).unwrap(),
                )
            })
            .collect();
        PriceSignalSeries::new(steps).unwrap()
    }

    #[test]
    fn test_engine_creation() {
        let engine = Engine::with_defaults();
        assert_eq!(engine.config().initial_balance, 10_000.0);
        assert_eq!(engine.config().share_size, 10);
    }

    #[test]
    fn test_run_equity_points() {
        let series = create_test_series();
        let result = Engine::with_defaults().run(&series).unwrap();

        assert_eq!(result.equity_curve.len(), series.len());
        assert_eq!(result.start_time, series.first_timestamp());
        assert_eq!(result.end_time, series.last_timestamp());
        for point in &result.equity_curve {
            assert!(point.drawdown <= 0.0);
            assert!(point.cash >= 0.0);
        }
        assert_eq!(
            result.metrics.total_return,
            result.balances().last().unwrap() - 10_000.0
        );
        assert_eq!(result.total_return(), result.metrics.total_return);
        assert_eq!(result.sharpe_ratio(), result.metrics.sharpe_ratio);
        assert_eq!(result.max_drawdown(), result.metrics.max_drawdown);
    }

    #[test]
    fn test_run_matches_expected_path() {
        let series = create_test_series();
        let result = Engine::with_defaults().run(&series).unwrap();
        // Enter at 100, exit at 102 on the signal, re-enter at 104, stopped out at 98.
        let exits: Vec<_> = result.fills.iter().filter(|f| f.is_exit()).collect();
        assert_eq!(exits[0].price, 102.0);
        assert_eq!(exits[1].price, 98.0);
        assert_eq!(result.metrics.round_trips, 3);
    }

    #[test]
    fn test_run_rejects_invalid_config() {
        let engine = Engine::new(SimulationConfig {
            initial_balance: -1.0,
            ..Default::default()
        });
        let result = engine.run(&create_test_series());
        assert!(matches!(result, Err(BacktestError::InvalidConfig(_))));
    }

    #[test]
    fn test_sweep_preserves_order_and_skips_invalid() {
        let series = create_test_series();
        let engine = Engine::with_defaults();
        let configs = vec![
            SimulationConfig::default().with_risk(0.02, 0.05),
            SimulationConfig::default().with_risk(2.0, 0.05),
            SimulationConfig::default().with_risk(0.10, 0.20),
        ];
        let results = engine.sweep(&series, configs).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].config.stop_loss_pct, 0.02);
        assert_eq!(results[1].config.stop_loss_pct, 0.10);
    }

    #[test]
    fn test_sweep_matches_single_runs() {
        let series = create_test_series();
        let engine = Engine::with_defaults();
        let results = engine
            .sweep_risk_grid(&series, &[0.03, 0.05], &[0.05, 0.10])
            .unwrap();
        assert_eq!(results.len(), 4);
        for entry in &results {
            let single = Engine::new(entry.config.clone()).run(&series).unwrap();
            assert_eq!(single, entry.result);
        }
    }

    #[test]
    fn test_sort_by_sharpe_puts_undefined_last() {
        let series = create_test_series();
        let engine = Engine::with_defaults();
        let mut results = engine
            .sweep_risk_grid(&series, &[0.02, 0.05], &[0.05])
            .unwrap();

        let flat = PriceSignalSeries::new(vec![Timestep::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            100.0,
            SignalDelta::Hold,
        )])
        .unwrap();
        let undefined = Engine::with_defaults().run(&flat).unwrap();
        results.insert(
            0,
            SweepResult {
                config: SimulationConfig::default(),
                result: undefined,
            },
        );

        sort_by_sharpe(&mut results);
        assert!(results.last().unwrap().result.metrics.sharpe_ratio.is_none());
        assert!(results[0].result.metrics.sharpe_ratio.is_some());
    }
}
