//! Command-line interface for the backtester.

use cicada::analytics::ResultFormatter;
use cicada::config::BacktestFileConfig;
use cicada::data::{load_csv, DataConfig};
use cicada::engine::{sort_by_sharpe, BacktestResult, Engine};
use cicada::error::{BacktestError, Result};
use cicada::export::{ExportConfig, Exporter};
use cicada::simulator::SimulationConfig;
use cicada::types::{PriceSignalSeries, SignalDelta};

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Cicada - a single-asset signal backtester.
#[derive(Parser)]
#[command(name = "cicada")]
#[command(version)]
#[command(about = "Backtest +1/0/-1 trading signals with fixed sizing, stop-loss and take-profit")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Report format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Backtest a signal table and write it back with a Balance column
    Run {
        /// Input CSV with Close and Position columns
        #[arg(default_value = "strategy_output.csv")]
        input: PathBuf,

        /// Output CSV path
        #[arg(default_value = "backtest_output.csv")]
        output: PathBuf,

        /// Initial balance
        #[arg(short, long, default_value = "10000")]
        balance: f64,

        /// Shares bought per entry signal
        #[arg(short, long, default_value = "10")]
        shares: u64,

        /// Stop-loss as a fraction of the entry price
        #[arg(long, default_value = "0.05")]
        stop_loss: f64,

        /// Take-profit as a fraction of the entry price
        #[arg(long, default_value = "0.1")]
        take_profit: f64,

        /// Also write the fill log to this CSV file
        #[arg(long)]
        fills: Option<PathBuf>,

        /// Also write a JSON summary to this file
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Run a backtest from a configuration file
    RunConfig {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Generate an example configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "backtest.toml")]
        output: PathBuf,
    },

    /// Validate a signal table
    Validate {
        /// Path to CSV data file
        #[arg(short, long)]
        data: PathBuf,
    },

    /// Run a stop-loss / take-profit grid in parallel
    Sweep {
        /// Path to CSV data file
        #[arg(short, long)]
        data: PathBuf,

        /// Stop-loss fractions to try
        #[arg(long, value_delimiter = ',', default_value = "0.02,0.05,0.1")]
        stop_losses: Vec<f64>,

        /// Take-profit fractions to try
        #[arg(long, value_delimiter = ',', default_value = "0.05,0.1,0.2")]
        take_profits: Vec<f64>,

        /// Initial balance
        #[arg(short, long, default_value = "10000")]
        balance: f64,

        /// Shares bought per entry signal
        #[arg(short, long, default_value = "10")]
        shares: u64,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Failed to set tracing subscriber: {}", e);
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run {
            input,
            output,
            balance,
            shares,
            stop_loss,
            take_profit,
            fills,
            summary,
        } => {
            let config = SimulationConfig {
                initial_balance: *balance,
                share_size: *shares,
                stop_loss_pct: *stop_loss,
                take_profit_pct: *take_profit,
            };
            let series = load_csv(input, &DataConfig::default())?;
            let result = Engine::new(config).run(&series)?;
            let outputs = Outputs {
                table: output,
                fills: fills.as_deref(),
                summary: summary.as_deref(),
                export: ExportConfig::default(),
            };
            write_outputs(&series, &result, &outputs)?;
            report(&result, cli.format);
            Ok(())
        }

        Commands::RunConfig { config } => run_from_config(config, cli.format),

        Commands::Init { output } => init_config(output),

        Commands::Validate { data } => validate_data(data),

        Commands::Sweep {
            data,
            stop_losses,
            take_profits,
            balance,
            shares,
        } => run_sweep(data, stop_losses, take_profits, *balance, *shares, cli.format),
    }
}

struct Outputs<'a> {
    table: &'a Path,
    fills: Option<&'a Path>,
    summary: Option<&'a Path>,
    export: ExportConfig,
}

fn write_outputs(
    series: &PriceSignalSeries,
    result: &BacktestResult,
    outputs: &Outputs,
) -> Result<()> {
    let exporter = Exporter::with_config(series, result, outputs.export.clone())?;
    exporter.export_backtest_csv(outputs.table)?;
    if let Some(path) = outputs.fills {
        exporter.export_fills_csv(path)?;
    }
    if let Some(path) = outputs.summary {
        exporter.export_summary_json(path)?;
    }
    Ok(())
}

fn report(result: &BacktestResult, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            ResultFormatter::print_report(result);
            ResultFormatter::print_fills(&result.fills, 20);
        }
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(result)),
        OutputFormat::Csv => {
            println!("{}", ResultFormatter::csv_header());
            println!("{}", ResultFormatter::to_csv_line(result));
        }
    }
}

fn run_from_config(config_path: &Path, format: OutputFormat) -> Result<()> {
    let file_config = BacktestFileConfig::load(config_path)?;

    let series = load_csv(&file_config.data.input, &file_config.to_data_config()?)?;
    let result = Engine::new(file_config.to_simulation_config()).run(&series)?;

    let outputs = Outputs {
        table: &file_config.data.output,
        fills: file_config.output.fills.as_deref(),
        summary: file_config.output.summary.as_deref(),
        export: file_config.to_export_config()?,
    };
    write_outputs(&series, &result, &outputs)?;
    report(&result, format);
    Ok(())
}

fn init_config(output: &Path) -> Result<()> {
    if output.exists() {
        return Err(BacktestError::InvalidConfig(format!(
            "{} already exists",
            output.display()
        )));
    }
    fs::write(output, BacktestFileConfig::example())?;
    println!("Created configuration file: {}", output.display());
    Ok(())
}

fn run_sweep(
    data_path: &Path,
    stop_losses: &[f64],
    take_profits: &[f64],
    balance: f64,
    shares: u64,
    format: OutputFormat,
) -> Result<()> {
    let series = load_csv(data_path, &DataConfig::default())?;
    let base = SimulationConfig {
        initial_balance: balance,
        share_size: shares,
        ..Default::default()
    };

    info!(
        "Sweeping {} stop-loss x {} take-profit values",
        stop_losses.len(),
        take_profits.len()
    );
    let engine = Engine::new(base).with_progress(format == OutputFormat::Text);
    let mut results = engine.sweep_risk_grid(&series, stop_losses, take_profits)?;
    sort_by_sharpe(&mut results);

    match format {
        OutputFormat::Text => {
            println!("\nSweep results (sorted by Sharpe ratio):\n");
            ResultFormatter::print_sweep_table(&results);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Csv => {
            println!("{}", ResultFormatter::csv_header());
            for entry in &results {
                println!("{}", ResultFormatter::to_csv_line(&entry.result));
            }
        }
    }

    Ok(())
}

fn validate_data(data_path: &Path) -> Result<()> {
    println!("Validating data file: {}", data_path.display());

    let series = load_csv(data_path, &DataConfig::default())?;
    let closes = series.closes();
    let count = |delta: SignalDelta| series.steps().iter().filter(|s| s.delta == delta).count();

    println!("\nData Summary:");
    println!("  Rows: {}", series.len());
    println!("  Start: {}", series.first_timestamp());
    println!("  End: {}", series.last_timestamp());

    let min_price = closes.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max_price = closes.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    println!("  Price Range: {:.2} - {:.2}", min_price, max_price);
    println!(
        "  Signals: {} enter, {} exit, {} hold",
        count(SignalDelta::Enter),
        count(SignalDelta::Exit),
        count(SignalDelta::Hold)
    );
    if let Some(passthrough) = series.passthrough() {
        println!("  Columns: {}", passthrough.headers.iter().collect::<Vec<_>>().join(", "));
    }

    println!("\nValidation: PASSED");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run_defaults() {
        let cli = Cli::try_parse_from(["cicada", "run"]).unwrap();
        match cli.command {
            Commands::Run {
                input,
                output,
                balance,
                shares,
                stop_loss,
                take_profit,
                fills,
                summary,
            } => {
                assert_eq!(input, PathBuf::from("strategy_output.csv"));
                assert_eq!(output, PathBuf::from("backtest_output.csv"));
                assert_eq!(balance, 10_000.0);
                assert_eq!(shares, 10);
                assert_eq!(stop_loss, 0.05);
                assert_eq!(take_profit, 0.1);
                assert!(fills.is_none());
                assert!(summary.is_none());
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "cicada",
            "-v",
            "--format",
            "json",
            "run",
            "in.csv",
            "out.csv",
            "--balance",
            "500",
            "--stop-loss",
            "0.02",
        ]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_sweep() {
        let cli = Cli::try_parse_from([
            "cicada",
            "sweep",
            "-d",
            "in.csv",
            "--stop-losses",
            "0.01,0.03",
        ])
        .unwrap();
        match cli.command {
            Commands::Sweep {
                stop_losses,
                take_profits,
                ..
            } => {
                assert_eq!(stop_losses, vec![0.01, 0.03]);
                assert_eq!(take_profits, vec![0.05, 0.1, 0.2]);
            }
            _ => panic!("expected sweep command"),
        }
    }

    #[test]
    fn test_cli_parse_other_commands() {
        assert!(Cli::try_parse_from(["cicada", "init"]).is_ok());
        assert!(Cli::try_parse_from(["cicada", "validate", "-d", "x.csv"]).is_ok());
        assert!(Cli::try_parse_from(["cicada", "run-config", "-c", "b.toml"]).is_ok());
        assert!(Cli::try_parse_from(["cicada", "validate"]).is_err());
    }
}
