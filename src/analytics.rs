//! Performance metrics and reporting.

use crate::engine::{BacktestResult, SweepResult};
use crate::types::Fill;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};
use tracing::warn;

/// Trading days per year used to annualize daily figures.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Summary statistics for a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub initial_balance: f64,
    pub final_equity: f64,
    /// Final equity minus initial balance, in currency units.
    pub total_return: f64,
    pub total_return_pct: f64,
    /// Annualized Sharpe ratio. `None` when the return series has zero
    /// variance or fewer than one return, making the ratio undefined.
    pub sharpe_ratio: Option<f64>,
    /// Most negative `equity / running_peak - 1`, in [-1, 0].
    pub max_drawdown: f64,
    /// Annualized standard deviation of daily returns.
    pub volatility_annual: f64,
    pub trading_days: usize,
    /// Completed buy-then-sell cycles.
    pub round_trips: usize,
    pub winning_trips: usize,
    /// Percentage of round trips with positive realized P&L.
    pub win_rate: f64,
}

/// Compute return, Sharpe ratio and drawdown from an equity curve.
pub fn compute_metrics(equity_curve: &[f64], initial_balance: f64) -> PerformanceMetrics {
    let final_equity = equity_curve.last().copied().unwrap_or(initial_balance);
    let total_return = final_equity - initial_balance;
    let returns = daily_returns(equity_curve);

    let sharpe = sharpe_ratio(&returns, TRADING_DAYS_PER_YEAR);
    if sharpe.is_none() {
        warn!(
            "Sharpe ratio is undefined: {} returns with zero variance",
            returns.len()
        );
    }

    PerformanceMetrics {
        initial_balance,
        final_equity,
        total_return,
        total_return_pct: total_return / initial_balance * 100.0,
        sharpe_ratio: sharpe,
        max_drawdown: max_drawdown(equity_curve),
        volatility_annual: population_std_dev(&returns)
            .map(|sd| sd * TRADING_DAYS_PER_YEAR.sqrt())
            .unwrap_or(0.0),
        trading_days: equity_curve.len(),
        round_trips: 0,
        winning_trips: 0,
        win_rate: 0.0,
    }
}

impl PerformanceMetrics {
    /// Fill in round-trip statistics from the fill log.
    pub fn with_fills(mut self, fills: &[Fill]) -> Self {
        let exits: Vec<f64> = fills.iter().filter_map(|f| f.realized_pnl).collect();
        self.round_trips = exits.len();
        self.winning_trips = exits.iter().filter(|&&pnl| pnl > 0.0).count();
        self.win_rate = if exits.is_empty() {
            0.0
        } else {
            self.winning_trips as f64 / exits.len() as f64 * 100.0
        };
        self
    }
}

/// Step-over-step fractional returns: `equity[i] / equity[i-1] - 1`.
pub fn daily_returns(equity_curve: &[f64]) -> Vec<f64> {
    if equity_curve.len() < 2 {
        return vec![];
    }
    equity_curve.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population (ddof = 0) standard deviation.
fn population_std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Annualized Sharpe ratio: `mean(r) / std(r) * sqrt(annualization_factor)`.
///
/// Uses the population standard deviation. Returns `None` for an empty
/// series or one with zero variance.
pub fn sharpe_ratio(returns: &[f64], annualization_factor: f64) -> Option<f64> {
    let m = mean(returns)?;
    let sd = population_std_dev(returns)?;
    if sd == 0.0 || !sd.is_finite() {
        return None;
    }
    Some(m / sd * annualization_factor.sqrt())
}

/// `equity[i] / max(equity[..=i]) - 1` for every step.
pub fn drawdown_series(equity_curve: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    equity_curve
        .iter()
        .map(|&equity| {
            peak = peak.max(equity);
            equity / peak - 1.0
        })
        .collect()
}

/// Most negative drawdown; 0 when equity never falls below a prior high.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    drawdown_series(equity_curve)
        .into_iter()
        .fold(0.0_f64, |a, b| a.min(b))
}

fn format_sharpe(sharpe: Option<f64>) -> String {
    match sharpe {
        Some(value) => format!("{:.2}", value),
        None => "undefined".to_string(),
    }
}

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print a results report to stdout.
    pub fn print_report(result: &BacktestResult) {
        let metrics = &result.metrics;

        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " BACKTEST RESULTS ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!(
            "  Period:          {} to {}",
            result.start_time.format("%Y-%m-%d"),
            result.end_time.format("%Y-%m-%d")
        );
        println!("  Trading Days:    {}", metrics.trading_days);
        println!("  Share Size:      {}", result.config.share_size);
        println!(
            "  Stop / Target:   {:.1}% / {:.1}%",
            result.config.stop_loss_pct * 100.0,
            result.config.take_profit_pct * 100.0
        );
        println!();

        println!("{}", "Performance".bold().underline());
        println!("  Initial Balance: ${:>12.2}", metrics.initial_balance);
        println!(
            "  Final Equity:    ${:>12.2}  {}",
            metrics.final_equity,
            Self::format_pct_change(metrics.total_return_pct)
        );
        println!("  Total Return:    ${:>12.2}", metrics.total_return);
        println!();

        println!("{}", "Risk Metrics".bold().underline());
        println!("  Max Drawdown:    {:>12.2}%", metrics.max_drawdown * 100.0);
        println!(
            "  Volatility:      {:>12.2}%",
            metrics.volatility_annual * 100.0
        );
        println!("  Sharpe Ratio:    {:>12}", format_sharpe(metrics.sharpe_ratio));
        println!();

        println!("{}", "Trade Statistics".bold().underline());
        println!("  Fills:           {:>12}", result.fills.len());
        println!("  Round Trips:     {:>12}", metrics.round_trips);
        println!(
            "  Winning Trips:   {:>12}  ({:.1}%)",
            metrics.winning_trips, metrics.win_rate
        );
        println!();

        println!("{}", "═".repeat(60).blue());
    }

    fn format_pct_change(pct: f64) -> String {
        if pct >= 0.0 {
            format!("(+{:.2}%)", pct).green().to_string()
        } else {
            format!("({:.2}%)", pct).red().to_string()
        }
    }

    /// Print sweep results as a table.
    pub fn print_sweep_table(results: &[SweepResult]) {
        let mut builder = Builder::new();
        builder.push_record([
            "Stop %", "Target %", "Return", "Return %", "Max DD %", "Sharpe", "Trips", "Win Rate",
        ]);

        for entry in results {
            let metrics = &entry.result.metrics;
            builder.push_record([
                format!("{:.1}", entry.config.stop_loss_pct * 100.0),
                format!("{:.1}", entry.config.take_profit_pct * 100.0),
                format!("{:.2}", metrics.total_return),
                format!("{:.2}", metrics.total_return_pct),
                format!("{:.2}", entry.result.max_drawdown() * 100.0),
                format_sharpe(entry.result.sharpe_ratio()),
                metrics.round_trips.to_string(),
                format!("{:.1}%", metrics.win_rate),
            ]);
        }

        let table = builder.build().with(Style::rounded()).to_string();
        println!("{}", table);
    }

    /// Print the fill log as a table.
    pub fn print_fills(fills: &[Fill], limit: usize) {
        if fills.is_empty() {
            println!("No fills.");
            return;
        }

        let shown = if limit > 0 && limit < fills.len() {
            &fills[..limit]
        } else {
            fills
        };

        let mut builder = Builder::new();
        builder.push_record(["#", "Date", "Side", "Qty", "Price", "Value", "Reason", "P&L"]);
        for (i, fill) in shown.iter().enumerate() {
            builder.push_record([
                (i + 1).to_string(),
                fill.timestamp.format("%Y-%m-%d").to_string(),
                fill.side.to_string(),
                fill.quantity.to_string(),
                format!("{:.2}", fill.price),
                format!("{:.2}", fill.value()),
                fill.reason.to_string(),
                fill.realized_pnl.map(|pnl| format!("{:+.2}", pnl)).unwrap_or_default(),
            ]);
        }

        let table = builder.build().with(Style::rounded()).to_string();
        println!("{}", table);

        if shown.len() < fills.len() {
            println!("... and {} more fills", fills.len() - shown.len());
        }
    }

    /// Export results to JSON.
    pub fn to_json(result: &BacktestResult) -> String {
        serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string())
    }

    /// Export headline metrics as a CSV line.
    pub fn to_csv_line(result: &BacktestResult) -> String {
        let metrics = &result.metrics;
        format!(
            "{:.2},{},{:.4},{:.4},{:.2},{:.2},{:.2},{},{:.6},{},{:.1}",
            metrics.initial_balance,
            result.config.share_size,
            result.config.stop_loss_pct,
            result.config.take_profit_pct,
            metrics.final_equity,
            metrics.total_return,
            metrics.total_return_pct,
            metrics
                .sharpe_ratio
                .map(|s| format!("{:.4}", s))
                .unwrap_or_default(),
            metrics.max_drawdown,
            metrics.round_trips,
            metrics.win_rate
        )
    }

    /// CSV header matching [`ResultFormatter::to_csv_line`].
    pub fn csv_header() -> &'static str {
        "initial_balance,share_size,stop_loss_pct,take_profit_pct,final_equity,total_return,total_return_pct,sharpe_ratio,max_drawdown,round_trips,win_rate"
    }
}
